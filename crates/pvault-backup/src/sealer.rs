//! Packing staged files into a tar.gz container, optionally sealed
//!
//! Container layout: one tar entry per file at `<resourceId>/<fileName>`,
//! resources in id order, files in insertion order. When a cipher is given
//! the gzip stream becomes the plaintext of an envelope frame.

use std::io::Read;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pvault_core::{VaultError, VaultResult};
use pvault_crypto::{DetectionPolicy, EnvelopeCipher};
use pvault_storage::BlobStore;
use tar::{Archive, Builder as TarBuilder, EntryType, Header};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::staging::StagingArchive;

/// Default gzip level for archives
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Serialize the archive as tar+gzip.
pub fn pack(archive: &StagingArchive) -> VaultResult<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::new(DEFAULT_COMPRESSION_LEVEL));
    let mut tar = TarBuilder::new(encoder);

    for (resource_id, files) in archive.snapshot() {
        for file in files {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(file.content().len() as u64);
            header.set_mode(0o600);
            header.set_mtime(0);
            let path = format!("{resource_id}/{}", file.name());
            tar.append_data(&mut header, &path, file.content())?;
        }
    }

    let encoder = tar.into_inner()?;
    Ok(encoder.finish()?)
}

/// Parse a tar+gzip container back into an archive.
///
/// Every regular entry must sit at exactly `<resourceId>/<fileName>`.
pub fn unpack(bytes: &[u8]) -> VaultResult<StagingArchive> {
    let mut tar = Archive::new(GzDecoder::new(bytes));
    let mut archive = StagingArchive::new();

    let entries = tar
        .entries()
        .map_err(|e| VaultError::Format(format!("not a tar.gz archive: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| VaultError::Format(format!("corrupt archive: {e}")))?;
        if entry.header().entry_type().is_dir() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| VaultError::Format(format!("invalid entry path: {e}")))?
            .to_string_lossy()
            .into_owned();
        let (resource_id, file_name) = split_entry_path(&path)?;

        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        archive.put(resource_id, file_name, content);
    }
    Ok(archive)
}

fn split_entry_path(path: &str) -> VaultResult<(&str, &str)> {
    let invalid = || VaultError::Format(format!("unexpected archive entry: {path}"));
    let (resource_id, file_name) = path.split_once('/').ok_or_else(invalid)?;
    let valid = |part: &str| !part.is_empty() && part != "." && part != "..";
    if !valid(resource_id) || !valid(file_name) || file_name.contains('/') {
        return Err(invalid());
    }
    Ok((resource_id, file_name))
}

/// Pack the archive and, if a cipher is given, encrypt and frame it.
pub async fn seal(archive: &StagingArchive, cipher: Option<&EnvelopeCipher>) -> VaultResult<Vec<u8>> {
    let packed = pack(archive)?;
    let Some(cipher) = cipher else {
        return Ok(packed);
    };
    let sealed = cipher.encrypt_to_bytes(&packed).await?;
    debug!(
        packed = packed.len(),
        sealed = sealed.len(),
        key_id = %cipher.key_id(),
        "archive sealed"
    );
    Ok(sealed)
}

/// Seal the archive and write it to `key`. Returns the number of bytes written.
///
/// Nothing is written once `cancel` has fired.
pub async fn seal_and_store(
    archive: &StagingArchive,
    cipher: Option<&EnvelopeCipher>,
    store: &BlobStore,
    key: &str,
    cancel: &CancellationToken,
) -> VaultResult<usize> {
    if cancel.is_cancelled() {
        return Err(VaultError::Cancelled);
    }
    let sealed = seal(archive, cipher).await?;
    if cancel.is_cancelled() {
        return Err(VaultError::Cancelled);
    }
    let len = sealed.len();
    store.write_blob(key, sealed).await?;
    info!(
        key,
        bytes = len,
        resources = archive.len(),
        encrypted = cipher.is_some(),
        "archive stored"
    );
    Ok(len)
}

/// Write the archive as a tree of `<prefix><resourceId>/<fileName>` blobs,
/// each sealed separately when a cipher is given. Returns the number of blobs written.
///
/// Stops with [`VaultError::Cancelled`] before the next blob once `cancel` fires;
/// blobs already written stay in place.
pub async fn store_tree(
    archive: &StagingArchive,
    cipher: Option<&EnvelopeCipher>,
    store: &BlobStore,
    prefix: &str,
    cancel: &CancellationToken,
) -> VaultResult<usize> {
    let mut written = 0;
    for (resource_id, files) in archive.snapshot() {
        for file in files {
            if cancel.is_cancelled() {
                warn!(prefix, written, "backup tree cancelled");
                return Err(VaultError::Cancelled);
            }
            let bytes = match cipher {
                Some(cipher) => cipher.encrypt_to_bytes(file.content()).await?,
                None => file.content().to_vec(),
            };
            if cancel.is_cancelled() {
                warn!(prefix, written, "backup tree cancelled");
                return Err(VaultError::Cancelled);
            }
            store
                .write_blob(&format!("{prefix}{resource_id}/{}", file.name()), bytes)
                .await?;
            written += 1;
        }
    }
    info!(
        prefix,
        blobs = written,
        resources = archive.len(),
        encrypted = cipher.is_some(),
        "backup tree stored"
    );
    Ok(written)
}

/// Inverse of [`seal`]: decrypt if the bytes look framed, then unpack.
pub async fn open(
    bytes: &[u8],
    cipher: Option<&EnvelopeCipher>,
    policy: DetectionPolicy,
) -> VaultResult<StagingArchive> {
    if !policy.looks_encrypted(bytes) {
        return unpack(bytes);
    }
    let cipher = cipher.ok_or_else(|| {
        VaultError::KeyUnavailable("archive is encrypted but no KMS key is configured".into())
    })?;
    let packed = cipher.decrypt_bytes(bytes).await?;
    unpack(&packed)
}
