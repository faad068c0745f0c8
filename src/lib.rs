pub mod core;
pub mod database;
pub mod services;

pub use crate::core::candidate::{Candidate, CandidateBuilder, MatchType, OverrideRule};
pub use crate::core::grouper::{group_candidates, BucketGroup, NEGATIVES_SOURCE};
pub use crate::core::probes::ImageProbes;
pub use crate::core::processor::{Disposition, GroupProcessor, ProcessedGroup};
pub use crate::core::tokens::TokenExtractor;
pub use crate::database::models::{
    Bucket, BucketFile, BucketJoinKey, Confidence, File, JoinKeyType, PendingVariant,
    ResolutionStatus, VariantRole,
};
pub use crate::database::{Database, DatabaseError};
pub use crate::services::assign::{AssignConfig, AssignError, AssignReport, AssignmentService};
pub use crate::services::materialize::{BucketMaterializer, SidecarDocument};
pub use crate::services::probes::ImageProbeService;
pub use crate::services::reconcile::{
    OverrideOutcome, PendingOverride, PendingReconciler, PhashCandidate, Resolution,
};
