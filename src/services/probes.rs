use crate::core::probes::ImageProbes;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Image-backed implementation of the probe contracts. Every probe
/// degrades to None with a warning; a file the `image` crate cannot read
/// is a review concern, not a run-stopper.
pub struct ImageProbeService {
    hasher: Hasher,
}

impl ImageProbeService {
    pub fn new() -> Self {
        Self {
            // Gradient = difference hash: 64 bits over an 8x8 grid.
            hasher: HasherConfig::new().hash_alg(HashAlg::Gradient).to_hasher(),
        }
    }

    /// SHA-256 content hash, streamed so large TIFFs never load whole.
    /// The scanner collaborator normally supplies hashes; this helper
    /// exists for tests and repair tooling.
    pub fn compute_content_hash(&self, file_path: &Path) -> Result<String, ProbeError> {
        let file = File::open(file_path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buffer = [0; 8192];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }
}

impl ImageProbes for ImageProbeService {
    fn dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        match image::image_dimensions(path) {
            Ok(dimensions) => Some(dimensions),
            Err(e) => match image::open(path) {
                Ok(img) => Some((img.width(), img.height())),
                Err(_) => {
                    log::warn!("could not read dimensions for {}: {}", path.display(), e);
                    None
                }
            },
        }
    }

    fn luminance(&self, path: &Path) -> Option<f64> {
        let img = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                log::warn!("could not read {} for luminance: {}", path.display(), e);
                return None;
            }
        };

        let gray = img.to_luma8();
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let sum: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
        let mean = sum as f64 / (width as u64 * height as u64) as f64;
        Some(mean / 255.0)
    }

    fn dhash(&self, path: &Path) -> Option<Vec<u8>> {
        match image::open(path) {
            Ok(img) => Some(self.hasher.hash_image(&img).as_bytes().to_vec()),
            Err(e) => {
                log::warn!("could not read {} for dhash: {}", path.display(), e);
                None
            }
        }
    }
}

impl Default for ImageProbeService {
    fn default() -> Self {
        Self::new()
    }
}
