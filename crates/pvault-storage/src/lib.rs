//! pvault-storage: OpenDAL storage abstraction for backup archives

pub mod blob;
pub mod health;
pub mod location;
pub mod operator;

pub use blob::BlobStore;
pub use health::check_health;
pub use location::BackupLocation;
pub use operator::{build_for_location, build_fs_operator, build_memory_operator, build_s3_operator, S3Target};
