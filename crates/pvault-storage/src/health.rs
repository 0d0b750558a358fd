//! Reachability probe run before a backup starts collecting

use opendal::Operator;
use pvault_core::{VaultError, VaultResult};
use tracing::debug;

/// List the directory that will receive the archive.
///
/// A missing directory is fine (writes create it); any other error means
/// the backend cannot be reached with the current credentials.
pub async fn check_health(op: &Operator, key: &str) -> VaultResult<()> {
    let dir = match key.rfind('/') {
        Some(idx) => &key[..=idx],
        None => "/",
    };
    match op.list(dir).await {
        Ok(entries) => {
            debug!(dir, entries = entries.len(), "storage reachable");
            Ok(())
        }
        Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::Storage(format!(
            "storage health check failed for {dir}: {e}"
        ))),
    }
}
