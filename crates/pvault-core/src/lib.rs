//! pvault-core: shared record types, configuration schema, and error types

pub mod config;
pub mod error;
pub mod types;

pub use error::{VaultError, VaultResult};
