use crate::core::processor::ProcessedGroup;
use crate::database::models::{bucket_prefix, BucketFile, BucketJoinKey, JoinKeyType};
use crate::database::repositories::BucketRepository;
use crate::database::DatabaseError;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Sidecar document mirroring one bucket's resolved variant list plus the
/// review reasons accumulated this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarDocument {
    pub bucket_prefix: String,
    pub group_key: String,
    pub needs_review: bool,
    pub needs_review_reasons: Vec<String>,
    pub variants: Vec<SidecarVariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarVariant {
    pub sha256: String,
    pub role: String,
    pub is_primary: bool,
    pub path: String,
    pub original_relpath: String,
    pub original_filename: String,
    pub width: i64,
    pub height: i64,
    pub luminance: Option<f64>,
    pub notes: Vec<String>,
}

/// Terminal sink of the assignment run: writes the resolved group as
/// bucket rows, join keys, and a sidecar document. Every write is an
/// upsert; re-running an unchanged group is a no-op.
pub struct BucketMaterializer {
    sidecar_dir: Option<PathBuf>,
}

impl BucketMaterializer {
    pub fn new(sidecar_dir: Option<PathBuf>) -> Self {
        Self { sidecar_dir }
    }

    /// Persist one processed group. Groups without a canonical candidate
    /// cannot mint a bucket and are skipped with a warning.
    pub fn materialize(
        &self,
        conn: &mut Connection,
        processed: &ProcessedGroup,
    ) -> Result<Option<String>, DatabaseError> {
        let group = &processed.group;
        let Some(bucket_id) = processed.canonical_sha256.clone() else {
            log::warn!(
                "group {} has no canonical candidate, nothing to materialize",
                group.group_key
            );
            return Ok(None);
        };
        let prefix = bucket_prefix(&bucket_id);
        let source = group
            .candidates
            .first()
            .map(|c| c.source.clone())
            .unwrap_or_default();

        let variant_rows: Vec<BucketFile> = group
            .candidates
            .iter()
            .filter_map(|candidate| {
                candidate.role.map(|role| BucketFile {
                    bucket_id: bucket_id.clone(),
                    file_sha256: candidate.sha256.clone(),
                    role,
                    is_primary: candidate.is_primary,
                    notes: candidate.notes.clone(),
                })
            })
            .collect();

        let tx = conn.transaction()?;
        {
            let buckets = BucketRepository::new(&tx);
            buckets.upsert_bucket(&bucket_id, &prefix, &source)?;
            buckets.replace_bucket_files(&bucket_id, &variant_rows)?;

            let mut keys: Vec<(JoinKeyType, String)> =
                vec![(JoinKeyType::GroupKey, group.group_key.clone())];
            if let Some(token) = &group.fastfoto_token {
                keys.push((JoinKeyType::Fastfoto, token.clone()));
            }
            for candidate in &group.candidates {
                if candidate.role.is_some_and(|r| r.is_front()) {
                    if let Some(img) = &candidate.img_token {
                        keys.push((JoinKeyType::ImgToken, img.clone()));
                    }
                }
            }
            for (key_type, key_value) in keys {
                buckets.upsert_join_key(&BucketJoinKey {
                    bucket_id: bucket_id.clone(),
                    source: source.clone(),
                    key_type,
                    key_value,
                })?;
            }
        }
        tx.commit()?;

        if let Some(dir) = &self.sidecar_dir {
            let doc = self.build_sidecar(processed, &prefix);
            if let Err(e) = write_sidecar(dir, &prefix, &doc) {
                log::warn!("sidecar write failed for bucket {}: {}", prefix, e);
            }
        }

        log::debug!(
            "materialized bucket {} ({} variants) for group {}",
            prefix,
            group.candidates.len(),
            group.group_key
        );
        Ok(Some(bucket_id))
    }

    fn build_sidecar(&self, processed: &ProcessedGroup, prefix: &str) -> SidecarDocument {
        let group = &processed.group;
        let needs_review =
            !group.needs_review_reasons.is_empty() || group.candidates.iter().any(|c| c.needs_review);

        SidecarDocument {
            bucket_prefix: prefix.to_string(),
            group_key: group.group_key.clone(),
            needs_review,
            needs_review_reasons: group.needs_review_reasons.clone(),
            variants: group
                .candidates
                .iter()
                .filter(|c| c.role.is_some())
                .map(|c| SidecarVariant {
                    sha256: c.sha256.clone(),
                    role: c.role.map(|r| r.as_str().to_string()).unwrap_or_default(),
                    is_primary: c.is_primary,
                    path: c.path.clone(),
                    original_relpath: c.original_relpath.clone(),
                    original_filename: c.original_filename.clone(),
                    width: c.width,
                    height: c.height,
                    luminance: c.luminance,
                    notes: c.notes.clone(),
                })
                .collect(),
        }
    }
}

/// Temp-file-and-rename so readers never observe a half-written document.
fn write_sidecar(dir: &Path, prefix: &str, doc: &SidecarDocument) -> anyhow::Result<()> {
    fs::create_dir_all(dir)?;
    let final_path = dir.join(format!("{}.json", prefix));
    let tmp_path = dir.join(format!("{}.json.tmp", prefix));

    let payload = serde_json::to_vec_pretty(doc)?;
    fs::write(&tmp_path, payload)?;
    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::candidate::CandidateBuilder;
    use crate::core::grouper::group_candidates;
    use crate::core::processor::{Disposition, GroupProcessor};
    use crate::database::models::{File, VariantRole};
    use crate::database::repositories::{BucketRepository, FileRepository};
    use crate::database::Database;
    use tempfile::TempDir;

    fn file(name: &str, width: i64, height: i64) -> File {
        File {
            sha256: format!("sha_{}", name.replace('.', "_")),
            path: format!("/archive/{}", name),
            original_filename: name.to_string(),
            original_relpath: format!("batch1/{}", name),
            width,
            height,
            size: 4096,
            source: "family".to_string(),
        }
    }

    fn processed_group(names_and_dims: &[(&str, i64, i64)]) -> ProcessedGroup {
        let builder = CandidateBuilder::default();
        let candidates = names_and_dims
            .iter()
            .map(|(name, w, h)| builder.build(&file(name, *w, *h), None))
            .collect();
        let mut groups = group_candidates("family", candidates);
        assert_eq!(groups.len(), 1);
        GroupProcessor::new().process(groups.remove(0))
    }

    #[test]
    fn test_materialize_writes_bucket_and_join_keys() {
        let mut db = Database::open_in_memory().unwrap();
        let processed = processed_group(&[
            ("FastFoto_000123.tif", 2000, 3000),
            ("FastFoto_000123_b.tif", 2000, 3000),
        ]);
        assert_eq!(processed.disposition, Disposition::Materialize);

        let materializer = BucketMaterializer::new(None);
        let bucket_id = materializer
            .materialize(db.connection_mut(), &processed)
            .unwrap()
            .unwrap();
        assert_eq!(bucket_id, "sha_FastFoto_000123_tif");

        let buckets = BucketRepository::new(db.connection());
        let bucket = buckets.find_by_id(&bucket_id).unwrap().unwrap();
        assert_eq!(bucket.bucket_prefix, "sha_FastFoto");
        assert_eq!(bucket.source, "family");

        let files = buckets.files_for_bucket(&bucket_id).unwrap();
        assert_eq!(files.len(), 2);
        let primary = files.iter().find(|f| f.is_primary).unwrap();
        assert_eq!(primary.role, VariantRole::RawFront);

        assert!(buckets
            .key_exists("family", crate::database::models::JoinKeyType::Fastfoto, "000123")
            .unwrap());
        assert!(buckets
            .key_exists(
                "family",
                crate::database::models::JoinKeyType::GroupKey,
                "fastfoto_000123"
            )
            .unwrap());
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let mut db = Database::open_in_memory().unwrap();
        let materializer = BucketMaterializer::new(None);

        let first = processed_group(&[("FastFoto_000123.tif", 2000, 3000)]);
        let id1 = materializer
            .materialize(db.connection_mut(), &first)
            .unwrap()
            .unwrap();

        let second = processed_group(&[("FastFoto_000123.tif", 2000, 3000)]);
        let id2 = materializer
            .materialize(db.connection_mut(), &second)
            .unwrap()
            .unwrap();
        assert_eq!(id1, id2);

        let buckets = BucketRepository::new(db.connection());
        assert_eq!(buckets.all_for_source("family").unwrap().len(), 1);
        assert_eq!(buckets.files_for_bucket(&id1).unwrap().len(), 1);
    }

    #[test]
    fn test_sidecar_written_atomically_with_variants() {
        let temp_dir = TempDir::new().unwrap();
        let mut db = Database::open_in_memory().unwrap();
        let materializer = BucketMaterializer::new(Some(temp_dir.path().to_path_buf()));

        let processed = processed_group(&[
            ("FastFoto_000123.tif", 2000, 3000),
            ("FastFoto_000123_b.tif", 2000, 3000),
        ]);
        materializer
            .materialize(db.connection_mut(), &processed)
            .unwrap();

        let sidecar_path = temp_dir.path().join("sha_FastFoto.json");
        assert!(sidecar_path.exists());
        assert!(!temp_dir.path().join("sha_FastFoto.json.tmp").exists());

        let doc: SidecarDocument =
            serde_json::from_str(&std::fs::read_to_string(&sidecar_path).unwrap()).unwrap();
        assert_eq!(doc.group_key, "fastfoto_000123");
        assert!(!doc.needs_review);
        assert_eq!(doc.variants.len(), 2);
        let primary = doc.variants.iter().find(|v| v.is_primary).unwrap();
        assert_eq!(primary.role, "raw_front");
    }

    #[test]
    fn test_roleless_candidates_are_not_written() {
        let mut db = Database::open_in_memory().unwrap();
        // Register files so nothing depends on dangling rows.
        let repo = FileRepository::new(db.connection());
        repo.upsert(&file("FastFoto_000777.tif", 100, 100)).unwrap();
        repo.upsert(&file("FastFoto_000777.xyz", 100, 100)).unwrap();

        let processed = processed_group(&[
            ("FastFoto_000777.tif", 100, 100),
            ("FastFoto_000777.xyz", 100, 100),
        ]);
        let materializer = BucketMaterializer::new(None);
        let bucket_id = materializer
            .materialize(db.connection_mut(), &processed)
            .unwrap()
            .unwrap();

        let buckets = BucketRepository::new(db.connection());
        assert_eq!(buckets.files_for_bucket(&bucket_id).unwrap().len(), 1);
    }
}
