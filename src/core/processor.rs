use crate::core::candidate::stem_tokens;
use crate::core::grouper::BucketGroup;
use crate::database::models::VariantRole;
use std::collections::HashSet;

/// What an assignment run should do with a processed group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A canonical front exists: write the bucket.
    Materialize,
    /// No anchor and every candidate is an AI front: queue for later.
    EnqueuePending,
    /// No anchor, mixed membership: report and forget.
    Unassigned,
}

#[derive(Debug)]
pub struct ProcessedGroup {
    pub group: BucketGroup,
    pub canonical_sha256: Option<String>,
    pub disposition: Disposition,
}

/// Per-group anchor selection and review-condition detection.
pub struct GroupProcessor {
    flip_threshold: f64,
    front_markers: HashSet<String>,
}

impl GroupProcessor {
    pub fn new() -> Self {
        Self {
            flip_threshold: 0.15,
            front_markers: ["f", "front", "recto"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_flip_threshold(mut self, threshold: f64) -> Self {
        self.flip_threshold = threshold;
        self
    }

    pub fn process(&self, mut group: BucketGroup) -> ProcessedGroup {
        // AI variants grouped by anything weaker than a FastFoto key get
        // an informational annotation; it never blocks materialization.
        let has_fastfoto_key = group.group_key.starts_with("fastfoto_");
        for candidate in group.candidates.iter_mut() {
            if candidate.role == Some(VariantRole::AiFrontV1) && !has_fastfoto_key {
                candidate.note("ai_no_fastfoto_token");
            }
        }

        let front_idx = best_index(&group, VariantRole::RawFront);
        let back_idx = best_index(&group, VariantRole::RawBack);

        // Flip suspect: a "front" markedly brighter than its back
        // historically correlates with a wrong-side-up scan.
        if let (Some(fi), Some(bi)) = (front_idx, back_idx) {
            if let (Some(front_luma), Some(back_luma)) =
                (group.candidates[fi].luminance, group.candidates[bi].luminance)
            {
                if front_luma - back_luma > self.flip_threshold {
                    group.add_reason("luminance_flip_suspect");
                    group.candidates[fi].needs_review = true;
                    group.candidates[bi].needs_review = true;
                }
            }
        }

        // Multiple raw fronts with no explicit front marker anywhere:
        // resolution alone cannot be trusted to break the tie.
        let raw_front_count = group
            .candidates
            .iter()
            .filter(|c| c.role == Some(VariantRole::RawFront))
            .count();
        if raw_front_count > 1 {
            let any_marked = group
                .candidates
                .iter()
                .filter(|c| c.role == Some(VariantRole::RawFront))
                .any(|c| self.has_front_marker(&c.original_filename));
            if !any_marked {
                group.add_reason("ambiguous_multiple_fronts");
            }
        }

        // Canonical anchor: best raw front, else best proxy front.
        let canonical_idx = front_idx.or_else(|| best_index(&group, VariantRole::ProxyFront));
        let canonical_sha256 = match canonical_idx {
            Some(idx) => {
                group.candidates[idx].is_primary = true;
                Some(group.candidates[idx].sha256.clone())
            }
            None => {
                group.add_reason("no_canonical_front");
                for candidate in group.candidates.iter_mut() {
                    if candidate.role == Some(VariantRole::RawBack) {
                        candidate.needs_review = true;
                    }
                }
                None
            }
        };

        let disposition = if canonical_sha256.is_some() {
            Disposition::Materialize
        } else if !group.candidates.is_empty()
            && group
                .candidates
                .iter()
                .all(|c| c.role == Some(VariantRole::AiFrontV1))
        {
            Disposition::EnqueuePending
        } else {
            Disposition::Unassigned
        };

        ProcessedGroup {
            group,
            canonical_sha256,
            disposition,
        }
    }

    fn has_front_marker(&self, filename: &str) -> bool {
        let stem = filename
            .rsplit_once('.')
            .map(|(s, _)| s)
            .unwrap_or(filename)
            .to_lowercase();
        stem_tokens(&stem)
            .iter()
            .any(|t| self.front_markers.contains(t))
    }
}

impl Default for GroupProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the highest-resolution candidate with the given role. Strictly
/// greater resolution replaces; ties keep the first seen, which keeps
/// selection stable across identical runs.
fn best_index(group: &BucketGroup, role: VariantRole) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, candidate) in group.candidates.iter().enumerate() {
        if candidate.role != Some(role) {
            continue;
        }
        match best {
            None => best = Some(idx),
            Some(current) => {
                if candidate.resolution() > group.candidates[current].resolution() {
                    best = Some(idx);
                }
            }
        }
    }
    best
}
