pub mod assign;
pub mod materialize;
pub mod probes;
pub mod reconcile;
pub mod reports;

pub use assign::{AssignConfig, AssignReport, AssignmentService};
pub use materialize::BucketMaterializer;
pub use probes::ImageProbeService;
pub use reconcile::PendingReconciler;
