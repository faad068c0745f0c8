use crate::core::candidate::Candidate;
use std::collections::HashMap;

/// Source label whose scans are correlated by IMG capture sequence
/// instead of derived group keys: front and back passes of a negative
/// strip share the physical scan number, not the filename shape.
pub const NEGATIVES_SOURCE: &str = "negatives";

/// Ephemeral aggregate of candidates sharing a grouping key within one
/// source. Review reasons accumulate for the current run only.
#[derive(Debug, Clone)]
pub struct BucketGroup {
    pub group_key: String,
    pub fastfoto_token: Option<String>,
    pub img_tokens: Vec<String>,
    pub needs_review_reasons: Vec<String>,
    pub candidates: Vec<Candidate>,
}

impl BucketGroup {
    fn new(group_key: String) -> Self {
        Self {
            group_key,
            fastfoto_token: None,
            img_tokens: Vec::new(),
            needs_review_reasons: Vec::new(),
            candidates: Vec::new(),
        }
    }

    pub fn add_reason(&mut self, reason: &str) {
        if !self.needs_review_reasons.iter().any(|r| r == reason) {
            self.needs_review_reasons.push(reason.to_string());
        }
    }

    fn push(&mut self, candidate: Candidate) {
        if self.fastfoto_token.is_none() {
            self.fastfoto_token = candidate.fastfoto_token.clone();
        }
        if let Some(img) = &candidate.img_token {
            if !self.img_tokens.contains(img) {
                self.img_tokens.push(img.clone());
            }
        }
        self.candidates.push(candidate);
    }
}

/// Partition candidates (already ordered by original_relpath) into groups.
/// Output order is deterministic: sorted by `(fastfoto_token, group_key)`
/// so a preview of the first N groups is stable across runs.
pub fn group_candidates(source: &str, candidates: Vec<Candidate>) -> Vec<BucketGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<BucketGroup> = Vec::new();

    for candidate in candidates {
        let key = effective_key(source, &candidate);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(BucketGroup::new(key));
            groups.len() - 1
        });
        groups[slot].push(candidate);
    }

    groups.sort_by(|a, b| {
        let a_key = (a.fastfoto_token.as_deref().unwrap_or(""), a.group_key.as_str());
        let b_key = (b.fastfoto_token.as_deref().unwrap_or(""), b.group_key.as_str());
        a_key.cmp(&b_key)
    });
    groups
}

fn effective_key(source: &str, candidate: &Candidate) -> String {
    if source == NEGATIVES_SOURCE {
        if let Some(img) = &candidate.img_token {
            if !img.is_empty() {
                return img.clone();
            }
        }
    }
    candidate.group_key.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::candidate::CandidateBuilder;
    use crate::database::models::File;

    fn file(source: &str, name: &str) -> File {
        File {
            sha256: format!("sha_of_{}", name),
            path: format!("/archive/{}", name),
            original_filename: name.to_string(),
            original_relpath: format!("batch1/{}", name),
            width: 1200,
            height: 800,
            size: 4096,
            source: source.to_string(),
        }
    }

    fn candidates(source: &str, names: &[&str]) -> Vec<Candidate> {
        let builder = CandidateBuilder::default();
        names
            .iter()
            .map(|name| builder.build(&file(source, name), None))
            .collect()
    }

    #[test]
    fn test_grouping_by_group_key() {
        let groups = group_candidates(
            "family",
            candidates(
                "family",
                &[
                    "FastFoto_000123.tif",
                    "FastFoto_000123_b.tif",
                    "FastFoto_000456.tif",
                ],
            ),
        );

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_key, "fastfoto_000123");
        assert_eq!(groups[0].candidates.len(), 2);
        assert_eq!(groups[0].fastfoto_token.as_deref(), Some("000123"));
        assert_eq!(groups[1].group_key, "fastfoto_000456");
    }

    #[test]
    fn test_negatives_source_keys_by_img_token() {
        let groups = group_candidates(
            "negatives",
            candidates(
                "negatives",
                &["roll3_IMG20230101_1234.tif", "roll7_IMG20230101_1234_b.tif"],
            ),
        );

        // Different fallback keys, same physical scan number: one group.
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_key, "img20230101_1234");
        assert_eq!(groups[0].candidates.len(), 2);
    }

    #[test]
    fn test_non_negatives_source_ignores_img_token_keying() {
        let groups = group_candidates(
            "family",
            candidates(
                "family",
                &["roll3_IMG20230101_1234.tif", "roll7_IMG20230101_1234_b.tif"],
            ),
        );
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_deterministic_order() {
        let names = &[
            "zebra_party.tif",
            "FastFoto_000999.tif",
            "FastFoto_000111.tif",
            "alpha_day.tif",
        ];
        let groups = group_candidates("family", candidates("family", names));
        let keys: Vec<&str> = groups.iter().map(|g| g.group_key.as_str()).collect();
        // Tokenless groups sort first on the empty fastfoto key, then by
        // group key; fastfoto groups follow in token order.
        assert_eq!(
            keys,
            vec!["alpha_day", "zebra_party", "fastfoto_000111", "fastfoto_000999"]
        );

        // Input order must not matter.
        let mut reversed: Vec<&str> = names.to_vec();
        reversed.reverse();
        let groups2 = group_candidates("family", candidates("family", &reversed));
        let keys2: Vec<&str> = groups2.iter().map(|g| g.group_key.as_str()).collect();
        assert_eq!(keys, keys2);
    }

    #[test]
    fn test_img_token_union() {
        let groups = group_candidates(
            "family",
            candidates(
                "family",
                &[
                    "FastFoto_000123_IMG20230101_1111.tif",
                    "FastFoto_000123_IMG20230101_2222.tif",
                    "FastFoto_000123_IMG20230101_1111.jpg",
                ],
            ),
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].img_tokens,
            vec!["img20230101_1111".to_string(), "img20230101_2222".to_string()]
        );
    }
}
