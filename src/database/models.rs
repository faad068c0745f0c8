use serde::{Deserialize, Serialize};

/// Immutable scanned artifact, produced by the external scanner. Referenced
/// by sha256 everywhere; this engine never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub sha256: String,
    pub path: String,
    pub original_filename: String,
    pub original_relpath: String,
    pub width: i64,
    pub height: i64,
    pub size: i64,
    pub source: String,
}

impl File {
    /// Filename stem (no extension), used for token work.
    pub fn stem(&self) -> &str {
        match self.original_filename.rsplit_once('.') {
            Some((stem, _ext)) if !stem.is_empty() => stem,
            _ => &self.original_filename,
        }
    }

    /// Lowercased file extension, empty when absent.
    pub fn extension(&self) -> String {
        match self.original_filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
            _ => String::new(),
        }
    }
}

/// Persisted bucket: one logical physical photograph. Identity is the
/// sha256 of the canonical (anchor) variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub bucket_id: String,
    pub bucket_prefix: String,
    pub source: String,
    pub preferred_variant: Option<String>,
}

/// Length of the display prefix taken from the bucket id. Collision risk
/// at this length is accepted.
pub const BUCKET_PREFIX_LEN: usize = 12;

pub fn bucket_prefix(bucket_id: &str) -> String {
    bucket_id.chars().take(BUCKET_PREFIX_LEN).collect()
}

/// Join row attaching one file to a bucket under a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketFile {
    pub bucket_id: String,
    pub file_sha256: String,
    pub role: VariantRole,
    pub is_primary: bool,
    pub notes: Vec<String>,
}

/// Queued variant that no anchor-bearing group has claimed yet. Keyed by
/// sha256: a file can be pending for only one reason at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingVariant {
    pub file_sha256: String,
    pub source: String,
    pub role: VariantRole,
    pub join_key: String,
    pub fastfoto_token: Option<String>,
    pub img_token: Option<String>,
    pub notes: Vec<String>,
    pub created_at: String,
}

/// Derived read-side index `(source, key_type, key_value) -> bucket_id`.
/// Rebuilt on every materialization, never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketJoinKey {
    pub bucket_id: String,
    pub source: String,
    pub key_type: JoinKeyType,
    pub key_value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantRole {
    RawFront,
    RawBack,
    ProxyFront,
    ProxyBack,
    AiFrontV1,
}

impl VariantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantRole::RawFront => "raw_front",
            VariantRole::RawBack => "raw_back",
            VariantRole::ProxyFront => "proxy_front",
            VariantRole::ProxyBack => "proxy_back",
            VariantRole::AiFrontV1 => "ai_front_v1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raw_front" => Some(VariantRole::RawFront),
            "raw_back" => Some(VariantRole::RawBack),
            "proxy_front" => Some(VariantRole::ProxyFront),
            "proxy_back" => Some(VariantRole::ProxyBack),
            "ai_front_v1" => Some(VariantRole::AiFrontV1),
            _ => None,
        }
    }

    pub fn is_front(&self) -> bool {
        matches!(self, VariantRole::RawFront | VariantRole::ProxyFront)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKeyType {
    Fastfoto,
    GroupKey,
    ImgToken,
}

impl JoinKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinKeyType::Fastfoto => "fastfoto",
            JoinKeyType::GroupKey => "group_key",
            JoinKeyType::ImgToken => "img_token",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fastfoto" => Some(JoinKeyType::Fastfoto),
            "group_key" => Some(JoinKeyType::GroupKey),
            "img_token" => Some(JoinKeyType::ImgToken),
            _ => None,
        }
    }
}

/// Strength tier of a reconciliation match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "HIGH",
            Confidence::Medium => "MEDIUM",
            Confidence::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Match,
    Ambiguous,
    NoSignal,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Match => "match",
            ResolutionStatus::Ambiguous => "ambiguous",
            ResolutionStatus::NoSignal => "no_signal",
        }
    }
}

/// Notes travel as JSON lists inside TEXT columns.
pub fn notes_to_json(notes: &[String]) -> String {
    serde_json::to_string(notes).unwrap_or_else(|_| "[]".to_string())
}

pub fn notes_from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [
            VariantRole::RawFront,
            VariantRole::RawBack,
            VariantRole::ProxyFront,
            VariantRole::ProxyBack,
            VariantRole::AiFrontV1,
        ] {
            assert_eq!(VariantRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(VariantRole::parse("thumbnail"), None);
    }

    #[test]
    fn test_file_stem_and_extension() {
        let file = File {
            sha256: "ab".into(),
            path: "/archive/FastFoto_0001.tif".into(),
            original_filename: "FastFoto_0001.tif".into(),
            original_relpath: "batch1/FastFoto_0001.tif".into(),
            width: 100,
            height: 100,
            size: 10,
            source: "family".into(),
        };
        assert_eq!(file.stem(), "FastFoto_0001");
        assert_eq!(file.extension(), "tif");

        let bare = File {
            original_filename: "noext".into(),
            ..file.clone()
        };
        assert_eq!(bare.stem(), "noext");
        assert_eq!(bare.extension(), "");

        let dotfile = File {
            original_filename: ".hidden".into(),
            ..file
        };
        assert_eq!(dotfile.stem(), ".hidden");
        assert_eq!(dotfile.extension(), "");
    }

    #[test]
    fn test_bucket_prefix_truncation() {
        assert_eq!(bucket_prefix("aabbccddeeff00112233"), "aabbccddeeff");
        assert_eq!(bucket_prefix("abcd"), "abcd");
    }

    #[test]
    fn test_notes_json_round_trip() {
        let notes = vec!["attached_from_pending".to_string(), "manual".to_string()];
        let raw = notes_to_json(&notes);
        assert_eq!(notes_from_json(&raw), notes);
        assert!(notes_from_json("not json").is_empty());
    }
}
