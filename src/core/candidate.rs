use crate::core::tokens::TokenExtractor;
use crate::database::models::{File, VariantRole};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Operator-authored rule applied with absolute precedence over derived
/// values. First matching rule in file order wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRule {
    #[serde(rename = "match")]
    pub match_value: String,
    pub match_type: MatchType,
    #[serde(default)]
    pub force_group_key: Option<String>,
    #[serde(default)]
    pub force_role: Option<VariantRole>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Basename,
    Contains,
    Sha256,
}

impl OverrideRule {
    pub fn matches(&self, file: &File) -> bool {
        match self.match_type {
            MatchType::Basename => self
                .match_value
                .eq_ignore_ascii_case(&file.original_filename),
            MatchType::Contains => file
                .original_relpath
                .to_lowercase()
                .contains(&self.match_value.to_lowercase()),
            MatchType::Sha256 => self.match_value == file.sha256,
        }
    }

    /// Load rules from a JSON array file. Malformed rows are skipped with
    /// a warning instead of aborting the run.
    pub fn load_all<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<OverrideRule>> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&raw)?;

        let mut rules = Vec::new();
        for (index, row) in rows.into_iter().enumerate() {
            match serde_json::from_value::<OverrideRule>(row) {
                Ok(rule) if rule.match_value.is_empty() => {
                    log::warn!("override rule {} has an empty match field, skipping", index);
                }
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    log::warn!("override rule {} is malformed ({}), skipping", index, e);
                }
            }
        }
        Ok(rules)
    }
}

/// One file's derived grouping view for a single assignment run. Computed
/// fresh every run, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub sha256: String,
    pub path: String,
    pub original_filename: String,
    pub original_relpath: String,
    pub width: i64,
    pub height: i64,
    pub source: String,

    pub group_key: String,
    pub role: Option<VariantRole>,
    pub luminance: Option<f64>,
    pub fastfoto_token: Option<String>,
    pub img_token: Option<String>,
    pub override_rule: Option<OverrideRule>,
    pub needs_review: bool,
    pub notes: Vec<String>,
    pub is_primary: bool,
}

impl Candidate {
    pub fn resolution(&self) -> i64 {
        self.width * self.height
    }

    pub fn note(&mut self, note: &str) {
        if !self.notes.iter().any(|n| n == note) {
            self.notes.push(note.to_string());
        }
    }
}

/// Derives a grouping key, role, and notes for each scanned file. Marker
/// and keyword sets are construction parameters so deployments can extend
/// them without touching the derivation logic.
pub struct CandidateBuilder {
    extractor: TokenExtractor,
    overrides: Vec<OverrideRule>,
    back_markers: HashSet<String>,
    front_markers: HashSet<String>,
    quality_tokens: HashSet<String>,
    ai_keywords: Vec<String>,
}

fn string_set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl CandidateBuilder {
    pub fn new(overrides: Vec<OverrideRule>) -> Self {
        Self {
            extractor: TokenExtractor::new(),
            overrides,
            back_markers: string_set(&["b", "back", "rear", "verso"]),
            front_markers: string_set(&["f", "front", "recto"]),
            quality_tokens: string_set(&[
                "scan", "scanned", "copy", "dup", "edit", "edited", "final", "hq", "lq", "web",
                "thumb", "small", "large", "ai", "enhanced", "restored", "colorize", "colorized",
                "remaster", "remastered",
            ]),
            ai_keywords: vec![
                "enhanced".to_string(),
                "restored".to_string(),
                "coloriz".to_string(),
                "remaster".to_string(),
                "pro_4k".to_string(),
                "pro4k".to_string(),
            ],
        }
    }

    pub fn extractor(&self) -> &TokenExtractor {
        &self.extractor
    }

    pub fn build(&self, file: &File, luminance: Option<f64>) -> Candidate {
        let stem = file.stem().to_lowercase();
        let tokens = stem_tokens(&stem);

        let rule = self.overrides.iter().find(|r| r.matches(file)).cloned();

        let fastfoto_token = self.extractor.fastfoto(&file.original_filename);
        let img_token = self
            .extractor
            .img(&file.original_filename)
            .into_iter()
            .next();

        let mut notes = Vec::new();
        if let Some(rule) = &rule {
            notes.push("override_applied".to_string());
            if let Some(rule_notes) = &rule.notes {
                notes.push(rule_notes.clone());
            }
        }

        let group_key = self.derive_group_key(file, rule.as_ref(), fastfoto_token.as_deref(), &tokens);
        let role = self.derive_role(file, rule.as_ref(), &stem, &tokens, &mut notes);

        Candidate {
            sha256: file.sha256.clone(),
            path: file.path.clone(),
            original_filename: file.original_filename.clone(),
            original_relpath: file.original_relpath.clone(),
            width: file.width,
            height: file.height,
            source: file.source.clone(),
            group_key,
            role,
            luminance,
            fastfoto_token,
            img_token,
            override_rule: rule,
            needs_review: false,
            notes,
            is_primary: false,
        }
    }

    fn derive_group_key(
        &self,
        file: &File,
        rule: Option<&OverrideRule>,
        fastfoto_token: Option<&str>,
        tokens: &[String],
    ) -> String {
        if let Some(forced) = rule.and_then(|r| r.force_group_key.as_deref()) {
            return forced.to_string();
        }
        if let Some(id) = fastfoto_token {
            return format!("fastfoto_{}", id);
        }
        if let Some(uuid) = self.extractor.uuid(&file.original_filename) {
            return uuid;
        }
        self.fallback_key(&file.stem().to_lowercase(), tokens)
    }

    /// Key built from whatever stem tokens survive marker/quality/ordinal
    /// filtering; degrades to the raw token list, then the whole stem.
    /// AI markers count as quality tokens so an enhanced output shares
    /// its original's key.
    fn fallback_key(&self, stem: &str, tokens: &[String]) -> String {
        let mut filtered: Vec<&str> = Vec::new();
        for token in tokens {
            if self.back_markers.contains(token)
                || self.front_markers.contains(token)
                || self.quality_tokens.contains(token)
                || is_ordinal(token)
            {
                continue;
            }
            // Collapse consecutive repeats.
            if filtered.last() == Some(&token.as_str()) {
                continue;
            }
            filtered.push(token);
        }

        if !filtered.is_empty() {
            filtered.join("_")
        } else if !tokens.is_empty() {
            tokens.join("_")
        } else {
            stem.to_string()
        }
    }

    fn derive_role(
        &self,
        file: &File,
        rule: Option<&OverrideRule>,
        stem: &str,
        tokens: &[String],
        notes: &mut Vec<String>,
    ) -> Option<VariantRole> {
        if let Some(forced) = rule.and_then(|r| r.force_role) {
            return Some(forced);
        }

        let is_back = self.has_back_marker(stem, tokens);
        match file.extension().as_str() {
            "tif" | "tiff" => Some(if is_back {
                VariantRole::RawBack
            } else {
                VariantRole::RawFront
            }),
            "jpg" | "jpeg" | "png" => {
                if is_back {
                    Some(VariantRole::ProxyBack)
                } else if self.has_ai_keyword(tokens) {
                    Some(VariantRole::AiFrontV1)
                } else {
                    Some(VariantRole::ProxyFront)
                }
            }
            _ => {
                notes.push("role_undetermined".to_string());
                None
            }
        }
    }

    fn has_back_marker(&self, stem: &str, tokens: &[String]) -> bool {
        stem.ends_with("_b") || tokens.iter().any(|t| self.back_markers.contains(t))
    }

    fn has_ai_keyword(&self, tokens: &[String]) -> bool {
        if tokens.iter().any(|t| t == "ai") {
            return true;
        }
        let joined = tokens.join("_");
        self.ai_keywords.iter().any(|kw| joined.contains(kw))
    }
}

impl Default for CandidateBuilder {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Lowercased stem split on non-alphanumerics, empty parts dropped.
pub fn stem_tokens(stem: &str) -> Vec<String> {
    stem.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}

/// Ordinal tokens are short all-digit runs (scan counters, copy numbers).
fn is_ordinal(token: &str) -> bool {
    token.len() <= 3 && token.chars().all(|c| c.is_ascii_digit())
}
