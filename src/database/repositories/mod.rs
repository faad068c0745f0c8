pub mod bucket;
pub mod file;
pub mod pending;

pub use bucket::BucketRepository;
pub use file::FileRepository;
pub use pending::PendingVariantRepository;
