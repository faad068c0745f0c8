use crate::core::candidate::{CandidateBuilder, OverrideRule};
use crate::core::grouper::group_candidates;
use crate::core::probes::ImageProbes;
use crate::core::processor::{Disposition, GroupProcessor};
use crate::database::models::bucket_prefix;
use crate::database::repositories::FileRepository;
use crate::database::{Database, DatabaseError};
use crate::services::materialize::BucketMaterializer;
use crate::services::reconcile::PendingReconciler;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssignError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Knobs for one assignment run. Mirrors the operational defaults; every
/// threshold is explicit so tests and deployments can pin them.
#[derive(Debug, Clone)]
pub struct AssignConfig {
    pub source: String,
    pub dry_run: bool,
    /// Process only the first N groups (deterministic order).
    pub preview: Option<usize>,
    pub luminance_flip_threshold: f64,
    pub phash_max_distance: u32,
    pub sidecar_dir: Option<PathBuf>,
    /// End-of-run CSV audit reports land here when set.
    pub report_dir: Option<PathBuf>,
}

impl AssignConfig {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dry_run: false,
            preview: None,
            luminance_flip_threshold: 0.15,
            phash_max_distance: 10,
            sidecar_dir: None,
            report_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssignReport {
    pub source: String,
    pub files_seen: usize,
    pub groups_processed: usize,
    pub buckets_written: usize,
    pub pending_enqueued: usize,
    pub pending_attached: usize,
    pub review_buckets: Vec<ReviewBucket>,
    pub unassigned: Vec<UnassignedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewBucket {
    pub bucket_prefix: String,
    pub group_key: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnassignedFile {
    pub sha256: String,
    pub original_relpath: String,
    pub group_key: String,
    pub reason: String,
}

/// One single-threaded, single-pass assignment run over one source:
/// candidates, groups, anchor selection, pending attachment, bucket
/// writes. Interruption is safe; every write is an idempotent upsert.
pub struct AssignmentService<'p> {
    config: AssignConfig,
    builder: CandidateBuilder,
    processor: GroupProcessor,
    reconciler: PendingReconciler,
    materializer: BucketMaterializer,
    probes: Option<&'p dyn ImageProbes>,
}

impl<'p> AssignmentService<'p> {
    pub fn new(config: AssignConfig, overrides: Vec<OverrideRule>) -> Self {
        let processor = GroupProcessor::new().with_flip_threshold(config.luminance_flip_threshold);
        let materializer = BucketMaterializer::new(config.sidecar_dir.clone());
        Self {
            builder: CandidateBuilder::new(overrides),
            processor,
            reconciler: PendingReconciler::new(),
            materializer,
            probes: None,
            config,
        }
    }

    pub fn with_probes(mut self, probes: &'p dyn ImageProbes) -> Self {
        self.probes = Some(probes);
        self
    }

    pub fn config(&self) -> &AssignConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &PendingReconciler {
        &self.reconciler
    }

    pub fn run(&self, db: &mut Database) -> Result<AssignReport, AssignError> {
        let source = self.config.source.clone();
        let files = FileRepository::new(db.connection()).all_for_source(&source)?;
        log::info!("assigning {} files for source {}", files.len(), source);

        let mut report = AssignReport {
            source: source.clone(),
            files_seen: files.len(),
            ..Default::default()
        };

        let mut candidates = Vec::with_capacity(files.len());
        for file in &files {
            let luminance = self.probe_luminance(&file.extension(), &file.path);
            candidates.push(self.builder.build(file, luminance));
        }

        let mut groups = group_candidates(&source, candidates);
        if let Some(limit) = self.config.preview {
            groups.truncate(limit);
        }

        for group in groups {
            let mut processed = self.processor.process(group);
            report.groups_processed += 1;

            // Files whose extension resolves to no role can never attach.
            for candidate in processed.group.candidates.iter().filter(|c| c.role.is_none()) {
                report.unassigned.push(UnassignedFile {
                    sha256: candidate.sha256.clone(),
                    original_relpath: candidate.original_relpath.clone(),
                    group_key: processed.group.group_key.clone(),
                    reason: "role_undetermined".to_string(),
                });
            }

            match processed.disposition {
                Disposition::Materialize => {
                    if self.config.dry_run {
                        let would_attach = self
                            .reconciler
                            .find_attachable(db.connection(), &processed.group)?;
                        report.pending_attached += would_attach.len();
                        report.buckets_written += 1;
                        self.note_review(&mut report, &processed);
                        continue;
                    }

                    report.pending_attached += self
                        .reconciler
                        .attach_pending(db.connection(), &mut processed.group)?;
                    if let Some(bucket_id) = processed.canonical_sha256.clone() {
                        self.reconciler.preserve_attached(
                            db.connection(),
                            &mut processed.group,
                            &bucket_id,
                        )?;
                    }
                    if self
                        .materializer
                        .materialize(db.connection_mut(), &processed)?
                        .is_some()
                    {
                        report.buckets_written += 1;
                        self.note_review(&mut report, &processed);
                    }
                }
                Disposition::EnqueuePending => {
                    if self.config.dry_run {
                        report.pending_enqueued += processed.group.candidates.len();
                    } else {
                        report.pending_enqueued += self
                            .reconciler
                            .enqueue_group(db.connection(), &processed.group)?;
                    }
                }
                Disposition::Unassigned => {
                    let reason = if processed.group.needs_review_reasons.is_empty() {
                        "no_canonical_front".to_string()
                    } else {
                        processed.group.needs_review_reasons.join(";")
                    };
                    for candidate in processed.group.candidates.iter().filter(|c| c.role.is_some()) {
                        report.unassigned.push(UnassignedFile {
                            sha256: candidate.sha256.clone(),
                            original_relpath: candidate.original_relpath.clone(),
                            group_key: processed.group.group_key.clone(),
                            reason: reason.clone(),
                        });
                    }
                }
            }
        }

        if !self.config.dry_run {
            if let Some(dir) = self.config.report_dir.clone() {
                if let Err(e) = self.write_run_reports(db, &report, &dir) {
                    log::warn!("audit report write failed for source {}: {}", source, e);
                }
            }
        }

        log::info!(
            "source {}: {} groups, {} buckets written, {} pending enqueued, {} attached, {} unassigned{}",
            source,
            report.groups_processed,
            report.buckets_written,
            report.pending_enqueued,
            report.pending_attached,
            report.unassigned.len(),
            if self.config.dry_run { " (dry run)" } else { "" },
        );
        Ok(report)
    }

    /// CSV audit trail for the run: review flags, unassigned files, and
    /// the pending queue as it stands afterwards. Failures degrade to a
    /// warning; the run's database state is already committed.
    fn write_run_reports(
        &self,
        db: &Database,
        report: &AssignReport,
        dir: &Path,
    ) -> anyhow::Result<()> {
        use crate::services::reports;
        std::fs::create_dir_all(dir)?;

        let mut out = std::fs::File::create(dir.join("needs_review_buckets.csv"))?;
        reports::write_needs_review_report(&mut out, &report.review_buckets)?;

        let mut out = std::fs::File::create(dir.join("unassigned_files.csv"))?;
        reports::write_unassigned_report(&mut out, &report.unassigned)?;

        let pending = self
            .reconciler
            .pending_with_claimed(db.connection(), Some(&self.config.source))?;
        let mut out = std::fs::File::create(dir.join("pending_variants.csv"))?;
        reports::write_pending_report(&mut out, &pending)?;

        let rows: Vec<crate::database::models::PendingVariant> =
            pending.into_iter().map(|(variant, _)| variant).collect();
        let mut out = std::fs::File::create(dir.join("ai_orphans.csv"))?;
        reports::write_ai_orphans_report(&mut out, &rows)?;
        Ok(())
    }

    /// Separate read-only perceptual pass over whatever is still pending
    /// for this source. Returns an empty report when no probes are wired.
    pub fn phash_report(
        &self,
        db: &Database,
    ) -> Result<Vec<crate::services::reconcile::PhashCandidate>, AssignError> {
        let Some(probes) = self.probes else {
            return Ok(Vec::new());
        };
        Ok(self.reconciler.phash_pass(
            db.connection(),
            probes,
            self.config.phash_max_distance,
            Some(&self.config.source),
        )?)
    }

    /// Luminance is probed for TIFFs only, and never in dry-run mode: it
    /// exists purely for flip detection on real assignment passes.
    fn probe_luminance(&self, extension: &str, path: &str) -> Option<f64> {
        if self.config.dry_run || !matches!(extension, "tif" | "tiff") {
            return None;
        }
        self.probes.and_then(|p| p.luminance(Path::new(path)))
    }

    fn note_review(&self, report: &mut AssignReport, processed: &crate::core::processor::ProcessedGroup) {
        let group = &processed.group;
        let needs_review =
            !group.needs_review_reasons.is_empty() || group.candidates.iter().any(|c| c.needs_review);
        if !needs_review {
            return;
        }
        let prefix = processed
            .canonical_sha256
            .as_deref()
            .map(bucket_prefix)
            .unwrap_or_default();
        report.review_buckets.push(ReviewBucket {
            bucket_prefix: prefix,
            group_key: group.group_key.clone(),
            reasons: group.needs_review_reasons.clone(),
        });
    }
}
