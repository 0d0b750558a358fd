//! Rebuilding resources and members from a backup
//!
//! Restore is sequential and tolerant: an unreadable `metadata.json` becomes a
//! warning, a failing resource is recorded and skipped, a failing member does
//! not stop its siblings, and a failed group membership is only logged.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use pvault_core::types::{
    BackupMetadata, MembersExport, ResourceConfig, MEMBERS_FILE, METADATA_FILE,
    RESOURCE_CONFIG_FILE,
};
use pvault_core::{VaultError, VaultResult};
use pvault_crypto::{DetectionPolicy, EnvelopeCipher};
use pvault_storage::BlobStore;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::ResourceFailure;
use crate::directory::Directory;
use crate::sealer;
use crate::staging::StagingArchive;

/// Where restore reads backed-up files from.
#[async_trait]
pub trait BackupSource: Send + Sync {
    /// Backup locations whose resource id matches `pattern`, sorted.
    async fn candidates(&self, pattern: &Regex) -> VaultResult<Vec<String>>;

    /// Plaintext contents of `file_name` in backup location `candidate`.
    async fn read_file(&self, candidate: &str, file_name: &str) -> VaultResult<Vec<u8>>;
}

/// A tree of per-resource directories in object storage:
/// `<prefix><resourceId>/<fileName>`.
pub struct StoreSource {
    store: BlobStore,
    prefix: String,
    cipher: Option<EnvelopeCipher>,
    policy: DetectionPolicy,
}

impl StoreSource {
    pub fn new(store: BlobStore, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            cipher: None,
            policy: DetectionPolicy::default(),
        }
    }

    /// Decrypt blobs that look framed with `cipher`.
    pub fn with_cipher(mut self, cipher: EnvelopeCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_policy(mut self, policy: DetectionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl BackupSource for StoreSource {
    async fn candidates(&self, pattern: &Regex) -> VaultResult<Vec<String>> {
        let metadata_key = Regex::new(&format!("(^|/){}$", regex::escape(METADATA_FILE)))
            .map_err(|e| VaultError::Other(e.into()))?;
        let keys = self
            .store
            .list_keys_by_pattern(&self.prefix, &metadata_key)
            .await?;

        Ok(keys
            .into_iter()
            .filter_map(|key| {
                let dir = key.strip_suffix(METADATA_FILE)?.strip_suffix('/')?;
                let resource_id = dir.rsplit('/').next()?;
                pattern.is_match(resource_id).then(|| dir.to_string())
            })
            .collect())
    }

    async fn read_file(&self, candidate: &str, file_name: &str) -> VaultResult<Vec<u8>> {
        let key = format!("{candidate}/{file_name}");
        let bytes = self.store.read_blob(&key).await?;
        if !self.policy.looks_encrypted(&bytes) {
            return Ok(bytes);
        }
        let cipher = self.cipher.as_ref().ok_or_else(|| {
            VaultError::KeyUnavailable(format!("{key} is encrypted but no KMS key is configured"))
        })?;
        cipher.decrypt_bytes(&bytes).await
    }
}

/// A sealed archive opened in memory.
pub struct ArchiveSource {
    archive: StagingArchive,
}

impl ArchiveSource {
    pub fn new(archive: StagingArchive) -> Self {
        Self { archive }
    }

    /// Decrypt (if framed) and unpack a sealed archive.
    pub async fn open(
        bytes: &[u8],
        cipher: Option<&EnvelopeCipher>,
        policy: DetectionPolicy,
    ) -> VaultResult<Self> {
        Ok(Self::new(sealer::open(bytes, cipher, policy).await?))
    }

    /// Fetch and open the archive stored at `key`.
    pub async fn load(
        store: &BlobStore,
        key: &str,
        cipher: Option<&EnvelopeCipher>,
        policy: DetectionPolicy,
    ) -> VaultResult<Self> {
        let bytes = store.read_blob(key).await?;
        Self::open(&bytes, cipher, policy).await
    }
}

#[async_trait]
impl BackupSource for ArchiveSource {
    async fn candidates(&self, pattern: &Regex) -> VaultResult<Vec<String>> {
        Ok(self
            .archive
            .resource_ids()
            .filter(|id| pattern.is_match(id))
            .map(str::to_string)
            .collect())
    }

    async fn read_file(&self, candidate: &str, file_name: &str) -> VaultResult<Vec<u8>> {
        self.archive
            .file(candidate, file_name)
            .map(|f| f.content().to_vec())
            .ok_or_else(|| {
                VaultError::Storage(format!("{candidate}/{file_name} is not in the archive"))
            })
    }
}

#[derive(Debug)]
pub struct MemberFailure {
    pub username: String,
    pub error: VaultError,
}

#[derive(Debug)]
pub struct GroupFailure {
    pub username: String,
    pub group: String,
    pub error: VaultError,
}

#[derive(Debug)]
pub struct RestoredResource {
    /// Id recorded in the backup
    pub source_id: String,
    /// Id assigned by the directory on creation
    pub new_id: String,
    pub name: String,
    pub members_restored: usize,
    pub member_failures: Vec<MemberFailure>,
    pub group_failures: Vec<GroupFailure>,
}

/// A backup location that was skipped or only partly restored
#[derive(Debug)]
pub struct RestoreWarning {
    pub location: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<RestoredResource>,
    pub warnings: Vec<RestoreWarning>,
    pub failures: Vec<ResourceFailure>,
    pub cancelled: bool,
}

impl RestoreReport {
    /// True when every candidate and member was restored. Group-membership
    /// failures do not count.
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.warnings.is_empty()
            && self.failures.is_empty()
            && self.restored.iter().all(|r| r.member_failures.is_empty())
    }
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} restored, {} failed, {} warnings",
            self.restored.len(),
            self.failures.len(),
            self.warnings.len()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        for r in &self.restored {
            write!(
                f,
                "\n  {} -> {} ({}): {} members",
                r.source_id, r.new_id, r.name, r.members_restored
            )?;
            for m in &r.member_failures {
                write!(f, "\n    member {}: {}", m.username, m.error)?;
            }
            for g in &r.group_failures {
                write!(f, "\n    group {} for {}: {}", g.group, g.username, g.error)?;
            }
        }
        for failure in &self.failures {
            write!(f, "\n  failed {}: {:#}", failure.resource_id, failure.error)?;
        }
        for warning in &self.warnings {
            write!(f, "\n  warning {}: {}", warning.location, warning.message)?;
        }
        Ok(())
    }
}

pub struct RestoreOrchestrator {
    directory: Arc<dyn Directory>,
}

impl RestoreOrchestrator {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Restore every backup location in `source` whose resource id matches `pattern`.
    pub async fn restore_all(
        &self,
        source: &dyn BackupSource,
        pattern: &Regex,
        cancel: &CancellationToken,
    ) -> VaultResult<RestoreReport> {
        let candidates = source.candidates(pattern).await?;
        if candidates.is_empty() {
            return Err(VaultError::NoMatch(pattern.as_str().to_string()));
        }
        info!(backups = candidates.len(), "restoring backups");

        let mut report = RestoreReport::default();
        for location in candidates {
            if cancel.is_cancelled() {
                warn!("restore cancelled");
                report.cancelled = true;
                break;
            }

            let metadata = match read_metadata(source, &location).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    let message = format!("{e:#}");
                    warn!(location = %location, error = %message, "skipping backup");
                    report.warnings.push(RestoreWarning { location, message });
                    continue;
                }
            };

            match self.restore_resource(source, &location, &metadata, &mut report).await {
                Ok(restored) => {
                    info!(
                        source_id = %restored.source_id,
                        new_id = %restored.new_id,
                        members = restored.members_restored,
                        "resource restored"
                    );
                    report.restored.push(restored);
                }
                Err(error) => {
                    warn!(resource_id = %metadata.resource_id, error = %format!("{error:#}"), "resource restore failed");
                    report.failures.push(ResourceFailure {
                        resource_id: metadata.resource_id.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            restored = report.restored.len(),
            failed = report.failures.len(),
            warnings = report.warnings.len(),
            "restore finished"
        );
        Ok(report)
    }

    async fn restore_resource(
        &self,
        source: &dyn BackupSource,
        location: &str,
        metadata: &BackupMetadata,
        report: &mut RestoreReport,
    ) -> anyhow::Result<RestoredResource> {
        if !metadata.lists(RESOURCE_CONFIG_FILE) {
            anyhow::bail!("metadata does not list {RESOURCE_CONFIG_FILE}");
        }
        let config_bytes = source
            .read_file(location, RESOURCE_CONFIG_FILE)
            .await
            .context("reading resource config")?;
        let config: ResourceConfig =
            serde_json::from_slice(&config_bytes).context("parsing resource config")?;

        let new_id = self
            .directory
            .create_resource(&config)
            .await
            .context("creating resource")?;

        let mut restored = RestoredResource {
            source_id: metadata.resource_id.clone(),
            new_id,
            name: config.name.clone(),
            members_restored: 0,
            member_failures: Vec::new(),
            group_failures: Vec::new(),
        };

        if !metadata.lists(MEMBERS_FILE) {
            debug!(location, "backup has no member export");
            return Ok(restored);
        }
        let members = match read_members(source, location).await {
            Ok(members) => members,
            Err(e) => {
                let message = format!("resource restored without members: {e:#}");
                warn!(location, error = %message, "member export unreadable");
                report.warnings.push(RestoreWarning {
                    location: location.to_string(),
                    message,
                });
                return Ok(restored);
            }
        };

        for member in &members.members {
            if let Err(error) = self.directory.create_member(&restored.new_id, member).await {
                warn!(username = %member.username, error = %error, "member restore failed");
                restored.member_failures.push(MemberFailure {
                    username: member.username.clone(),
                    error,
                });
                continue;
            }
            restored.members_restored += 1;

            for group in &member.groups {
                if let Err(error) = self
                    .directory
                    .add_member_to_group(&restored.new_id, &member.username, group)
                    .await
                {
                    warn!(
                        username = %member.username,
                        group = %group,
                        error = %error,
                        "adding member to group failed"
                    );
                    restored.group_failures.push(GroupFailure {
                        username: member.username.clone(),
                        group: group.clone(),
                        error,
                    });
                }
            }
        }

        Ok(restored)
    }
}

async fn read_metadata(source: &dyn BackupSource, location: &str) -> anyhow::Result<BackupMetadata> {
    let bytes = source
        .read_file(location, METADATA_FILE)
        .await
        .context("reading metadata")?;
    serde_json::from_slice(&bytes).context("parsing metadata")
}

async fn read_members(source: &dyn BackupSource, location: &str) -> anyhow::Result<MembersExport> {
    let bytes = source
        .read_file(location, MEMBERS_FILE)
        .await
        .context("reading member export")?;
    serde_json::from_slice(&bytes).context("parsing member export")
}
