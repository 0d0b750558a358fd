//! Concurrent per-resource collection into a [`StagingArchive`]
//!
//! One unit of work per matching resource:
//!   describe → list members → list each member's groups → stage
//!   `metadata.json`, `resource-config.json`, `members.json`
//!
//! Units run on a bounded Tokio task pool. A failing unit is recorded and the
//! rest keep going; its files never reach the archive because a unit commits
//! all three files at once after they are assembled.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use pvault_core::types::{
    BackupMetadata, MembersExport, ResourceSummary, MEMBERS_FILE, METADATA_FILE,
    RESOURCE_CONFIG_FILE,
};
use pvault_core::{VaultError, VaultResult};
use regex::Regex;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directory::Directory;
use crate::staging::{StagedFile, StagingArchive};

pub const DEFAULT_CONCURRENCY: usize = 8;

/// A resource whose collection failed, with the cause
#[derive(Debug)]
pub struct ResourceFailure {
    pub resource_id: String,
    pub error: anyhow::Error,
}

/// Outcome of [`Collector::collect_all`]. Both lists are sorted by resource id.
#[derive(Debug, Default)]
pub struct CollectionResult {
    pub succeeded: Vec<String>,
    pub failures: Vec<ResourceFailure>,
}

impl CollectionResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.resource_id.as_str()).collect()
    }
}

impl fmt::Display for CollectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded.len(),
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "\n  {}: {:#}", failure.resource_id, failure.error)?;
        }
        Ok(())
    }
}

enum UnitOutcome {
    Staged,
    Failed(anyhow::Error),
    Cancelled,
}

pub struct Collector {
    directory: Arc<dyn Directory>,
    concurrency: usize,
}

impl Collector {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Maximum number of resources collected at once (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Collect every resource whose name matches `pattern`.
    ///
    /// Errors only when nothing matched, the listing itself failed, or the run
    /// was cancelled; per-resource failures land in the result.
    pub async fn collect_all(
        &self,
        pattern: &Regex,
        cancel: &CancellationToken,
    ) -> VaultResult<(CollectionResult, StagingArchive)> {
        let resources = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(VaultError::Cancelled),
            listed = self.directory.list_resources(pattern) => listed?,
        };
        if resources.is_empty() {
            return Err(VaultError::NoMatch(pattern.as_str().to_string()));
        }
        info!(
            resources = resources.len(),
            concurrency = self.concurrency,
            pattern = %pattern,
            "collecting resources"
        );

        let archive = Arc::new(Mutex::new(StagingArchive::new()));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut units = JoinSet::new();
        let mut task_ids = HashMap::new();

        for resource in resources {
            let directory = self.directory.clone();
            let archive = archive.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let resource_id = resource.id.clone();

            let handle = units.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return UnitOutcome::Cancelled,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(e) => return UnitOutcome::Failed(e.into()),
                    },
                };

                let assembled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return UnitOutcome::Cancelled,
                    files = collect_resource(directory.as_ref(), &resource) => files,
                };

                match assembled {
                    Ok(files) => {
                        archive.lock().await.put_resource(&resource.id, files);
                        UnitOutcome::Staged
                    }
                    Err(e) => UnitOutcome::Failed(e),
                }
            });
            task_ids.insert(handle.id(), resource_id);
        }

        let mut result = CollectionResult::default();
        while let Some(joined) = units.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => {
                    let id = e.id();
                    (id, UnitOutcome::Failed(anyhow::anyhow!("collection task failed: {e}")))
                }
            };
            let resource_id = task_ids.remove(&task_id).unwrap_or_default();

            match outcome {
                UnitOutcome::Staged => {
                    debug!(resource_id = %resource_id, "resource staged");
                    result.succeeded.push(resource_id);
                }
                UnitOutcome::Failed(error) => {
                    warn!(resource_id = %resource_id, error = %format!("{error:#}"), "resource collection failed");
                    result.failures.push(ResourceFailure { resource_id, error });
                }
                UnitOutcome::Cancelled => {}
            }
        }

        if cancel.is_cancelled() {
            warn!("collection cancelled, discarding staged data");
            return Err(VaultError::Cancelled);
        }

        result.succeeded.sort();
        result
            .failures
            .sort_by(|a, b| a.resource_id.cmp(&b.resource_id));

        let archive = match Arc::try_unwrap(archive) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().await.clone(),
        };

        info!(
            succeeded = result.succeeded.len(),
            failed = result.failures.len(),
            files = archive.file_count(),
            "collection finished"
        );
        Ok((result, archive))
    }
}

/// Gather one resource's three files. Nothing is staged on error.
async fn collect_resource(
    directory: &dyn Directory,
    resource: &ResourceSummary,
) -> anyhow::Result<Vec<StagedFile>> {
    let id = resource.id.as_str();

    let config = directory
        .describe_resource(id)
        .await
        .context("describing resource")?;

    let mut members = directory
        .list_members(id)
        .await
        .context("listing members")?;
    for member in &mut members {
        member.groups = directory
            .list_member_groups(id, &member.username)
            .await
            .with_context(|| format!("listing groups of {}", member.username))?;
    }
    debug!(resource_id = %id, members = members.len(), "resource described");

    let metadata = BackupMetadata::new(id);
    Ok(vec![
        StagedFile::new(METADATA_FILE, serde_json::to_vec_pretty(&metadata)?),
        StagedFile::new(RESOURCE_CONFIG_FILE, serde_json::to_vec_pretty(&config)?),
        StagedFile::new(
            MEMBERS_FILE,
            serde_json::to_vec_pretty(&MembersExport { members })?,
        ),
    ])
}
