//! pvault-backup: collection, sealing, and restore of directory resources
//!
//! Pipeline: [`Collector`] → [`StagingArchive`] → [`sealer::seal`] →
//! object store, and [`RestoreOrchestrator`] for the way back.

pub mod collector;
pub mod directory;
pub mod memory;
pub mod restore;
pub mod sealer;
pub mod staging;

pub use collector::{CollectionResult, Collector, ResourceFailure};
pub use directory::Directory;
pub use memory::MemoryDirectory;
pub use restore::{ArchiveSource, BackupSource, RestoreOrchestrator, RestoreReport, StoreSource};
pub use staging::{StagedFile, StagingArchive};
