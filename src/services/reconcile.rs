use crate::core::candidate::Candidate;
use crate::core::grouper::BucketGroup;
use crate::core::probes::{hamming_distance, ImageProbes};
use crate::core::tokens::TokenExtractor;
use crate::database::models::{
    bucket_prefix, BucketFile, Confidence, JoinKeyType, PendingVariant, ResolutionStatus,
    VariantRole,
};
use crate::database::repositories::{BucketRepository, FileRepository, PendingVariantRepository};
use crate::database::DatabaseError;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Verdict for one still-pending row from the resolution cascade.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub file_sha256: String,
    pub source: String,
    pub role: VariantRole,
    pub status: ResolutionStatus,
    pub confidence: Option<Confidence>,
    pub reason: String,
    pub bucket_ids: Vec<String>,
}

/// Best perceptual match for a pending image. Seeds a human decision;
/// never applied automatically.
#[derive(Debug, Clone, Serialize)]
pub struct PhashCandidate {
    pub file_sha256: String,
    pub bucket_id: String,
    pub bucket_prefix: String,
    pub distance: u32,
}

/// Operator row: attach this pending file to that bucket, no questions
/// asked (beyond existence and source checks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOverride {
    pub pending_sha256: String,
    pub target_bucket_prefix: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverrideOutcome {
    pub pending_sha256: String,
    pub target_bucket_prefix: String,
    pub applied: bool,
    pub reason: Option<String>,
}

/// Maintains the queue of variants without an anchor: enqueues them when
/// a group cannot mint a bucket, re-attaches them once a matching group
/// goes live, and audits whatever is still stuck.
pub struct PendingReconciler {
    extractor: TokenExtractor,
}

impl PendingReconciler {
    pub fn new() -> Self {
        Self {
            extractor: TokenExtractor::new(),
        }
    }

    /// Queue every AI candidate of a group that cannot materialize. Files
    /// already attached to a bucket are never re-enqueued.
    pub fn enqueue_group(
        &self,
        conn: &Connection,
        group: &BucketGroup,
    ) -> Result<usize, DatabaseError> {
        let buckets = BucketRepository::new(conn);
        let pending = PendingVariantRepository::new(conn);
        let mut enqueued = 0;

        for candidate in &group.candidates {
            if candidate.role != Some(VariantRole::AiFrontV1) {
                continue;
            }
            if buckets.variant_exists(&candidate.sha256)? {
                log::debug!(
                    "{} already attached to a bucket, not enqueueing",
                    candidate.sha256
                );
                continue;
            }
            pending.upsert(&PendingVariant {
                file_sha256: candidate.sha256.clone(),
                source: candidate.source.clone(),
                role: VariantRole::AiFrontV1,
                join_key: group.group_key.clone(),
                fastfoto_token: candidate
                    .fastfoto_token
                    .clone()
                    .or_else(|| group.fastfoto_token.clone()),
                img_token: candidate.img_token.clone(),
                notes: candidate.notes.clone(),
                created_at: Utc::now().to_rfc3339(),
            })?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Pending rows a live group would claim, without mutating anything.
    pub fn find_attachable(
        &self,
        conn: &Connection,
        group: &BucketGroup,
    ) -> Result<Vec<PendingVariant>, DatabaseError> {
        let Some(source) = group.candidates.first().map(|c| c.source.clone()) else {
            return Ok(Vec::new());
        };
        let front_img_tokens: Vec<String> = group
            .candidates
            .iter()
            .filter(|c| c.role.is_some_and(|r| r.is_front()))
            .filter_map(|c| c.img_token.clone())
            .collect();

        let pending = PendingVariantRepository::new(conn);
        pending.find_attachable(
            &source,
            group.fastfoto_token.as_deref(),
            &group.group_key,
            &front_img_tokens,
        )
    }

    /// Immediately before a bucket write: pull matching pending rows into
    /// the group's candidate list and delete them from the queue. This is
    /// how an AI output scanned in a later batch joins its original bucket
    /// on the next run.
    pub fn attach_pending(
        &self,
        conn: &Connection,
        group: &mut BucketGroup,
    ) -> Result<usize, DatabaseError> {
        let matches = self.find_attachable(conn, group)?;
        if matches.is_empty() {
            return Ok(0);
        }

        let files = FileRepository::new(conn);
        let pending = PendingVariantRepository::new(conn);
        let mut attached = 0;

        for row in matches {
            if group.candidates.iter().any(|c| c.sha256 == row.file_sha256) {
                // Already part of this run's group; just drop the queue row.
                pending.delete(&row.file_sha256)?;
                continue;
            }
            let Some(file) = files.find_by_sha256(&row.file_sha256)? else {
                log::warn!(
                    "pending row {} has no files entry, leaving it queued",
                    row.file_sha256
                );
                continue;
            };

            let mut notes = row.notes.clone();
            if !notes.iter().any(|n| n == "attached_from_pending") {
                notes.push("attached_from_pending".to_string());
            }
            group.candidates.push(Candidate {
                sha256: file.sha256.clone(),
                path: file.path.clone(),
                original_filename: file.original_filename.clone(),
                original_relpath: file.original_relpath.clone(),
                width: file.width,
                height: file.height,
                source: file.source.clone(),
                group_key: group.group_key.clone(),
                role: Some(row.role),
                luminance: None,
                fastfoto_token: row.fastfoto_token.clone(),
                img_token: row.img_token.clone(),
                override_rule: None,
                needs_review: false,
                notes,
                is_primary: false,
            });
            pending.delete(&row.file_sha256)?;
            attached += 1;
        }

        if attached > 0 {
            log::info!(
                "attached {} pending variant(s) to group {}",
                attached,
                group.group_key
            );
        }
        Ok(attached)
    }

    /// Re-add variants that joined this bucket through the pending queue
    /// or a manual override in an earlier run. The bucket rewrite is
    /// derived from this run's candidates, which cannot re-derive
    /// out-of-band attachments; without this carry-forward a re-run would
    /// silently drop them.
    pub fn preserve_attached(
        &self,
        conn: &Connection,
        group: &mut BucketGroup,
        bucket_id: &str,
    ) -> Result<usize, DatabaseError> {
        let buckets = BucketRepository::new(conn);
        let files = FileRepository::new(conn);
        let mut preserved = 0;

        for row in buckets.files_for_bucket(bucket_id)? {
            if group.candidates.iter().any(|c| c.sha256 == row.file_sha256) {
                continue;
            }
            let out_of_band = row
                .notes
                .iter()
                .any(|n| n == "attached_from_pending" || n == "manual_override");
            if !out_of_band {
                continue;
            }
            let Some(file) = files.find_by_sha256(&row.file_sha256)? else {
                continue;
            };
            group.candidates.push(Candidate {
                sha256: file.sha256.clone(),
                path: file.path.clone(),
                original_filename: file.original_filename.clone(),
                original_relpath: file.original_relpath.clone(),
                width: file.width,
                height: file.height,
                source: file.source.clone(),
                group_key: group.group_key.clone(),
                role: Some(row.role),
                luminance: None,
                fastfoto_token: None,
                img_token: None,
                override_rule: None,
                needs_review: false,
                notes: row.notes.clone(),
                is_primary: false,
            });
            preserved += 1;
        }
        Ok(preserved)
    }

    /// On-demand audit of everything still pending, trying strategies in
    /// strict priority order and stopping at the first that speaks.
    pub fn resolve_pending(
        &self,
        conn: &Connection,
        source: Option<&str>,
    ) -> Result<Vec<Resolution>, DatabaseError> {
        let buckets = BucketRepository::new(conn);
        let files = FileRepository::new(conn);
        let pending = PendingVariantRepository::new(conn);

        // Prefix map for strategy A. Collisions at 12 hex chars are
        // accepted; every colliding bucket is listed.
        let mut prefix_map: HashMap<String, Vec<String>> = HashMap::new();
        for (prefix, bucket_id) in buckets.all_prefixes()? {
            prefix_map.entry(prefix).or_default().push(bucket_id);
        }

        // Normalized canonical-front stems for strategy D.
        let mut stem_map: HashMap<String, Vec<String>> = HashMap::new();
        for (bucket_id, front) in buckets.canonical_fronts()? {
            let normalized = normalize_token(front.stem());
            let entry = stem_map.entry(normalized).or_default();
            if !entry.contains(&bucket_id) {
                entry.push(bucket_id);
            }
        }

        let rows = match source {
            Some(source) => pending.all_for_source(source)?,
            None => pending.all()?,
        };

        let mut resolutions = Vec::new();
        for row in rows {
            let filename = files
                .find_by_sha256(&row.file_sha256)?
                .map(|f| f.original_filename);
            resolutions.push(self.resolve_row(&buckets, &row, filename.as_deref(), &prefix_map, &stem_map)?);
        }
        Ok(resolutions)
    }

    fn resolve_row(
        &self,
        buckets: &BucketRepository<'_>,
        row: &PendingVariant,
        filename: Option<&str>,
        prefix_map: &HashMap<String, Vec<String>>,
        stem_map: &HashMap<String, Vec<String>>,
    ) -> Result<Resolution, DatabaseError> {
        let verdict = |status, confidence, reason: &str, bucket_ids: Vec<String>| Resolution {
            file_sha256: row.file_sha256.clone(),
            source: row.source.clone(),
            role: row.role,
            status,
            confidence,
            reason: reason.to_string(),
            bucket_ids,
        };

        // A. A hex token naming a bucket prefix outranks everything.
        if let Some(name) = filename {
            for token in self.extractor.hex_tokens(name) {
                if let Some(bucket_ids) = prefix_map.get(&token) {
                    return Ok(verdict(
                        ResolutionStatus::Match,
                        Some(Confidence::High),
                        "bucket_prefix",
                        bucket_ids.clone(),
                    ));
                }
            }
        }

        // B. Stored or freshly-parsed FastFoto id against the join-key
        // index. Same-source hits win over cross-source ones.
        let fastfoto = row
            .fastfoto_token
            .clone()
            .or_else(|| filename.and_then(|name| self.extractor.fastfoto(name)));
        if let Some(token) = fastfoto {
            let hits = buckets.buckets_for_key(JoinKeyType::Fastfoto, &token)?;
            if !hits.is_empty() {
                let same_source: Vec<String> = hits
                    .iter()
                    .filter(|(_, s)| *s == row.source)
                    .map(|(b, _)| b.clone())
                    .collect();
                let bucket_ids = if same_source.is_empty() {
                    hits.into_iter().map(|(b, _)| b).collect()
                } else {
                    same_source
                };
                return Ok(verdict(
                    ResolutionStatus::Match,
                    Some(Confidence::High),
                    "fastfoto_token",
                    bucket_ids,
                ));
            }
        }

        if let Some(img) = row.img_token.as_deref() {
            // C. IMG token against the join-key index.
            let hits = buckets.buckets_for_key(JoinKeyType::ImgToken, &img.to_lowercase())?;
            match hits.len() {
                0 => {}
                1 => {
                    return Ok(verdict(
                        ResolutionStatus::Match,
                        Some(Confidence::High),
                        "img_token",
                        hits.into_iter().map(|(b, _)| b).collect(),
                    ));
                }
                _ => {
                    return Ok(verdict(
                        ResolutionStatus::Ambiguous,
                        Some(Confidence::Low),
                        "img_token_conflict",
                        hits.into_iter().map(|(b, _)| b).collect(),
                    ));
                }
            }

            // D. Normalized-stem fallback against canonical filenames.
            if let Some(bucket_ids) = stem_map.get(&normalize_token(img)) {
                return Ok(if bucket_ids.len() == 1 {
                    verdict(
                        ResolutionStatus::Match,
                        Some(Confidence::Medium),
                        "img_token_stem_match",
                        bucket_ids.clone(),
                    )
                } else {
                    verdict(
                        ResolutionStatus::Ambiguous,
                        Some(Confidence::Low),
                        "img_token_stem_conflict",
                        bucket_ids.clone(),
                    )
                });
            }
        }

        // E. Nothing spoke.
        Ok(verdict(
            ResolutionStatus::NoSignal,
            None,
            "no_matching_tokens",
            Vec::new(),
        ))
    }

    /// Optional last-resort pass: difference-hash every still-pending
    /// image against every canonical front and report the closest bucket
    /// when it is within `max_distance` bits. Read-only by design.
    pub fn phash_pass(
        &self,
        conn: &Connection,
        probes: &dyn ImageProbes,
        max_distance: u32,
        source: Option<&str>,
    ) -> Result<Vec<PhashCandidate>, DatabaseError> {
        let buckets = BucketRepository::new(conn);
        let files = FileRepository::new(conn);
        let pending = PendingVariantRepository::new(conn);

        let mut front_hashes: Vec<(String, Vec<u8>)> = Vec::new();
        for (bucket_id, front) in buckets.canonical_fronts()? {
            if let Some(hash) = probes.dhash(Path::new(&front.path)) {
                front_hashes.push((bucket_id, hash));
            }
        }

        let rows = match source {
            Some(source) => pending.all_for_source(source)?,
            None => pending.all()?,
        };

        let mut candidates = Vec::new();
        for row in rows {
            let Some(file) = files.find_by_sha256(&row.file_sha256)? else {
                continue;
            };
            let Some(hash) = probes.dhash(Path::new(&file.path)) else {
                continue;
            };

            let mut best: Option<(&str, u32)> = None;
            for (bucket_id, front_hash) in &front_hashes {
                let distance = hamming_distance(&hash, front_hash);
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((bucket_id, distance));
                }
            }
            if let Some((bucket_id, distance)) = best {
                if distance <= max_distance {
                    candidates.push(PhashCandidate {
                        file_sha256: row.file_sha256.clone(),
                        bucket_id: bucket_id.to_string(),
                        bucket_prefix: bucket_prefix(bucket_id),
                        distance,
                    });
                }
            }
        }
        Ok(candidates)
    }

    /// Apply operator overrides with unconditional precedence. Misses are
    /// reported per row, never thrown; one bad row must not sink a batch.
    pub fn apply_overrides(
        &self,
        conn: &Connection,
        overrides: &[PendingOverride],
    ) -> Result<Vec<OverrideOutcome>, DatabaseError> {
        let buckets = BucketRepository::new(conn);
        let pending = PendingVariantRepository::new(conn);

        let mut outcomes = Vec::new();
        for row in overrides {
            let outcome = |applied, reason: Option<&str>| OverrideOutcome {
                pending_sha256: row.pending_sha256.clone(),
                target_bucket_prefix: row.target_bucket_prefix.clone(),
                applied,
                reason: reason.map(|r| r.to_string()),
            };

            let Some(variant) = pending.find_by_sha256(&row.pending_sha256)? else {
                outcomes.push(outcome(false, Some("pending_not_found")));
                continue;
            };

            let mut targets = buckets.find_by_prefix(&row.target_bucket_prefix)?;
            if let Some(wanted_source) = &row.source {
                targets.retain(|b| &b.source == wanted_source);
            }
            let Some(target) = targets.first() else {
                outcomes.push(outcome(false, Some("bucket_not_found")));
                continue;
            };
            if targets.len() > 1 {
                log::warn!(
                    "bucket prefix {} is ambiguous ({} buckets), using {}",
                    row.target_bucket_prefix,
                    targets.len(),
                    target.bucket_id
                );
            }

            let mut notes = variant.notes.clone();
            notes.push("manual_override".to_string());
            buckets.insert_bucket_file_ignore(&BucketFile {
                bucket_id: target.bucket_id.clone(),
                file_sha256: variant.file_sha256.clone(),
                role: variant.role,
                is_primary: false,
                notes,
            })?;
            pending.delete(&variant.file_sha256)?;
            outcomes.push(outcome(true, None));
        }
        Ok(outcomes)
    }

    /// Pending rows annotated with whether a live join key already claims
    /// them (the next assignment run would attach these).
    pub fn pending_with_claimed(
        &self,
        conn: &Connection,
        source: Option<&str>,
    ) -> Result<Vec<(PendingVariant, bool)>, DatabaseError> {
        let buckets = BucketRepository::new(conn);
        let pending = PendingVariantRepository::new(conn);

        let rows = match source {
            Some(source) => pending.all_for_source(source)?,
            None => pending.all()?,
        };

        let mut annotated = Vec::new();
        for row in rows {
            let mut claimed = buckets.key_exists(&row.source, JoinKeyType::GroupKey, &row.join_key)?;
            if !claimed {
                if let Some(token) = row.fastfoto_token.as_deref() {
                    claimed = buckets.key_exists(&row.source, JoinKeyType::Fastfoto, token)?;
                }
            }
            if !claimed {
                if let Some(img) = row.img_token.as_deref() {
                    claimed = buckets.key_exists(&row.source, JoinKeyType::ImgToken, img)?;
                }
            }
            annotated.push((row, claimed));
        }
        Ok(annotated)
    }
}

impl Default for PendingReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingOverride {
    /// Load operator override rows from a JSON array file, skipping
    /// malformed rows with a warning.
    pub fn load_all<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<PendingOverride>> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&raw)?;

        let mut overrides = Vec::new();
        for (index, row) in rows.into_iter().enumerate() {
            match serde_json::from_value::<PendingOverride>(row) {
                Ok(row) => overrides.push(row),
                Err(e) => log::warn!("pending override {} is malformed ({}), skipping", index, e),
            }
        }
        Ok(overrides)
    }
}

/// Lowercase, non-alphanumerics to `_`, collapse runs, trim ends. The
/// same normalization is applied to IMG tokens and canonical stems so
/// they can meet in the middle.
pub fn normalize_token(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut last_was_underscore = false;
    for c in token.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_underscore = false;
        } else if !last_was_underscore {
            out.push('_');
            last_was_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}
