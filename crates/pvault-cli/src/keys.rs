//! KMS selection, envelope cipher construction, and data-key files

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use pvault_core::config::VaultConfig;
use pvault_crypto::{
    is_local_key_id, local_key_id, parse_wrapped_key, DataKey, EnvelopeCipher, GeneratedDataKey,
    KeyManagement, KeySpec, LocalKms,
};
use pvault_storage::{build_for_location, BackupLocation, BlobStore};
use rand::RngCore;
use tracing::{debug, info};

/// Size of the dummy wrapped key produced by `generate-datakey --test`
pub const TEST_WRAPPED_KEY_LEN: usize = 128;

/// True when the configured key id is served by the local key file.
fn uses_local_kms(config: &VaultConfig) -> bool {
    config.kms.backend == "local" || is_local_key_id(&config.kms.key_id)
}

/// Key id as key management expects it (`local:<name>` for the local backend).
pub fn effective_key_id(config: &VaultConfig) -> String {
    if uses_local_kms(config) {
        local_key_id(&config.kms.key_id)
    } else {
        config.kms.key_id.clone()
    }
}

pub async fn build_kms(config: &VaultConfig) -> Result<Arc<dyn KeyManagement>> {
    if uses_local_kms(config) {
        let path = config
            .kms
            .local_key_file
            .as_deref()
            .context("kms.local_key_file must be set to use a local key")?;
        let kms = LocalKms::load(path)
            .with_context(|| format!("loading local key file {}", path.display()))?;
        let wanted = effective_key_id(config);
        if kms.key_id() != wanted {
            anyhow::bail!(
                "local key file {} holds {}, but {} was requested",
                path.display(),
                kms.key_id(),
                wanted
            );
        }
        debug!(key_id = %wanted, "using local key management");
        return Ok(Arc::new(kms));
    }

    match config.kms.backend.as_str() {
        "aws" => {
            #[cfg(feature = "aws")]
            return Ok(Arc::new(pvault_aws::AwsKms::new(config.kms_region()).await));
            #[cfg(not(feature = "aws"))]
            anyhow::bail!(
                "AWS KMS requires the aws feature: cargo build -p pvault-cli --features aws"
            )
        }
        other => anyhow::bail!("unknown kms.backend {other:?} (expected aws or local)"),
    }
}

/// Read and parse the wrapped data key stored at `uri`.
pub async fn read_data_key(config: &VaultConfig, uri: &str) -> Result<Vec<u8>> {
    let location = BackupLocation::parse(uri)?;
    let op = build_for_location(&config.storage, &location)?;
    let bytes = BlobStore::new(op)
        .read_blob(&location.key())
        .await
        .with_context(|| format!("reading data key {location}"))?;
    Ok(parse_wrapped_key(&bytes)?)
}

/// The envelope cipher for this run, or `None` when encryption is disabled.
///
/// With `kms.data_key_path` set, the stored wrapped key is reused for every
/// archive; otherwise key management generates a fresh data key per archive.
pub async fn build_cipher(config: &VaultConfig) -> Result<Option<EnvelopeCipher>> {
    if !config.kms.enabled {
        return Ok(None);
    }
    if config.kms.key_id.is_empty() {
        anyhow::bail!("KMS encryption is enabled but no key id is set (--kms-key-id or KMS_KEY_ID)");
    }

    let kms = build_kms(config).await?;
    let key_id = effective_key_id(config);
    let cipher = match config.kms.data_key_path.as_deref() {
        Some(uri) => {
            let wrapped = read_data_key(config, uri).await?;
            EnvelopeCipher::with_data_key(kms, key_id, wrapped)
        }
        None => EnvelopeCipher::new(kms, key_id),
    };
    info!(key_id = %cipher.key_id(), reuse_data_key = cipher.has_data_key(), "KMS encryption enabled");
    Ok(Some(cipher))
}

/// Random key material for `generate-datakey --test`. The wrapped form is
/// noise and cannot be unwrapped by any KMS.
pub fn test_data_key(spec: KeySpec) -> GeneratedDataKey {
    let mut wrapped = vec![0u8; TEST_WRAPPED_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut wrapped);
    GeneratedDataKey {
        plaintext: DataKey::random(spec),
        wrapped,
    }
}

pub fn test_key_id(key_id: &str) -> String {
    format!("{key_id}-TEST")
}

/// Write `bytes` to `location`; local files are created owner-only.
pub async fn write_output(config: &VaultConfig, location: &BackupLocation, bytes: Vec<u8>) -> Result<()> {
    match location {
        BackupLocation::File { path } => write_private_file(path, &bytes),
        BackupLocation::S3 { .. } => {
            let op = build_for_location(&config.storage, location)?;
            BlobStore::new(op)
                .write_blob(&location.key(), bytes)
                .await
                .with_context(|| format!("writing {location}"))
        }
    }
}

pub fn write_private_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    pvault_crypto::write_private(path, bytes)
        .with_context(|| format!("writing {}", path.display()))
}
