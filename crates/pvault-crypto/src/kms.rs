//! Key-management seam and the file-backed local implementation
//!
//! Local wrapped-key format (binary):
//! ```text
//! ["pvault-kek1"][12 bytes: nonce][data key ciphertext][16 bytes: tag]
//! AAD = key id
//! ```

use std::path::Path;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use chrono::{SecondsFormat, Utc};
use pvault_core::{VaultError, VaultResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use crate::keys::{DataKey, GeneratedDataKey, KeySpec};
use crate::{NONCE_SIZE, TAG_SIZE};

/// A key-management service that generates and unwraps data keys.
///
/// Implementations must never persist or log plaintext key material.
#[async_trait]
pub trait KeyManagement: Send + Sync {
    /// Generate a fresh data key under `key_id`, returning plaintext and wrapped forms.
    async fn generate_data_key(&self, key_id: &str, spec: KeySpec)
        -> VaultResult<GeneratedDataKey>;

    /// Recover the plaintext of a data key previously wrapped under `key_id`.
    async fn unwrap_key(&self, key_id: &str, wrapped: &[u8]) -> VaultResult<DataKey>;
}

const WRAP_MAGIC: &[u8] = b"pvault-kek1";
const KEK_SIZE: usize = 32;

/// Key ids served by [`LocalKms`] carry this prefix.
pub const LOCAL_KEY_PREFIX: &str = "local:";

/// Normalize a local key name to its `local:<name>` key id.
pub fn local_key_id(name: &str) -> String {
    if name.starts_with(LOCAL_KEY_PREFIX) {
        name.to_string()
    } else {
        format!("{LOCAL_KEY_PREFIX}{name}")
    }
}

pub fn is_local_key_id(key_id: &str) -> bool {
    key_id.starts_with(LOCAL_KEY_PREFIX)
}

/// Local key-encryption key held in a JSON file
pub struct LocalKms {
    key_id: String,
    kek: DataKey,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KekFile {
    key_id: String,
    key: String,
    created_at: String,
}

impl LocalKms {
    pub fn new(name: &str, kek: DataKey) -> VaultResult<Self> {
        if kek.len() != KEK_SIZE {
            return Err(VaultError::CipherInit(format!(
                "key-encryption key must be {KEK_SIZE} bytes, got {}",
                kek.len()
            )));
        }
        Ok(Self {
            key_id: local_key_id(name),
            kek,
        })
    }

    /// Create a new random key-encryption key.
    pub fn generate(name: &str) -> Self {
        Self {
            key_id: local_key_id(name),
            kek: DataKey::random(KeySpec::Aes256),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn load(path: &Path) -> VaultResult<Self> {
        let mut raw = std::fs::read_to_string(path)?;
        let parsed: Result<KekFile, _> = serde_json::from_str(&raw);
        raw.zeroize();
        let mut file = parsed?;

        let decoded = B64.decode(file.key.as_bytes());
        file.key.zeroize();
        let bytes = decoded.map_err(|e| {
            VaultError::Config(format!("key file {}: invalid base64 key: {e}", path.display()))
        })?;

        debug!(path = %path.display(), key_id = %file.key_id, "loaded local key-encryption key");
        Self::new(&file.key_id, DataKey::from_vec(bytes))
    }

    /// Write the key file, readable by the owner only.
    pub fn save(&self, path: &Path) -> VaultResult<()> {
        let mut file = KekFile {
            key_id: self.key_id.clone(),
            key: B64.encode(self.kek.as_bytes()),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let json = serde_json::to_vec_pretty(&file);
        file.key.zeroize();
        let mut json = json?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let written = write_private(path, &json);
        json.zeroize();
        written
    }

    fn cipher(&self) -> VaultResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.kek.as_bytes())
            .map_err(|e| VaultError::CipherInit(format!("local KEK: {e}")))
    }

    fn check_key_id(&self, key_id: &str) -> VaultResult<()> {
        if key_id != self.key_id {
            return Err(VaultError::KeyUnavailable(format!(
                "unknown key id {key_id:?} (local key is {:?})",
                self.key_id
            )));
        }
        Ok(())
    }

    fn wrap(&self, plaintext: &DataKey) -> VaultResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let sealed = self
            .cipher()?
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: self.key_id.as_bytes(),
                },
            )
            .map_err(|e| VaultError::KeyUnavailable(format!("key wrapping failed: {e}")))?;

        let mut out = Vec::with_capacity(WRAP_MAGIC.len() + NONCE_SIZE + sealed.len());
        out.extend_from_slice(WRAP_MAGIC);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

#[async_trait]
impl KeyManagement for LocalKms {
    async fn generate_data_key(
        &self,
        key_id: &str,
        spec: KeySpec,
    ) -> VaultResult<GeneratedDataKey> {
        self.check_key_id(key_id)?;
        let plaintext = DataKey::random(spec);
        let wrapped = self.wrap(&plaintext)?;
        Ok(GeneratedDataKey { plaintext, wrapped })
    }

    async fn unwrap_key(&self, key_id: &str, wrapped: &[u8]) -> VaultResult<DataKey> {
        self.check_key_id(key_id)?;

        let body = wrapped.strip_prefix(WRAP_MAGIC).ok_or_else(|| {
            VaultError::KeyUnavailable("wrapped key was not produced by a local KMS".into())
        })?;
        if body.len() < NONCE_SIZE + TAG_SIZE {
            return Err(VaultError::KeyUnavailable(format!(
                "wrapped key too short: {} bytes",
                wrapped.len()
            )));
        }

        let (nonce_bytes, sealed) = body.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher()?
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: sealed,
                    aad: self.key_id.as_bytes(),
                },
            )
            .map_err(|_| {
                VaultError::KeyUnavailable(
                    "cannot unwrap data key: wrong key-encryption key or corrupted key".into(),
                )
            })?;

        Ok(DataKey::from_vec(plaintext))
    }
}

/// Write `contents` to `path` with owner-only permissions on unix.
#[cfg(unix)]
pub fn write_private(path: &Path, contents: &[u8]) -> VaultResult<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on create; tighten files that already existed.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn write_private(path: &Path, contents: &[u8]) -> VaultResult<()> {
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_generate_then_unwrap() {
        let kms = LocalKms::generate("backup-kek");
        assert_eq!(kms.key_id(), "local:backup-kek");
        let generated = kms
            .generate_data_key("local:backup-kek", KeySpec::Aes256)
            .await
            .unwrap();

        assert_eq!(generated.plaintext.len(), 32);
        assert_ne!(&generated.wrapped[WRAP_MAGIC.len()..], generated.plaintext.as_bytes());

        let unwrapped = kms.unwrap_key("local:backup-kek", &generated.wrapped).await.unwrap();
        assert_eq!(unwrapped.as_bytes(), generated.plaintext.as_bytes());
    }

    #[tokio::test]
    async fn test_wrapped_sizes_fit_detector_range() {
        let kms = LocalKms::generate("k");
        for spec in [KeySpec::Aes128, KeySpec::Aes256] {
            let generated = kms.generate_data_key("local:k", spec).await.unwrap();
            let len = generated.wrapped.len() as u32;
            assert!(
                (crate::detect::MIN_WRAPPED_KEY_LEN..=crate::detect::MAX_WRAPPED_KEY_LEN)
                    .contains(&len),
                "{spec}: wrapped key is {len} bytes"
            );
        }
    }

    #[tokio::test]
    async fn test_wrong_key_id() {
        let kms = LocalKms::generate("a");
        let err = kms.generate_data_key("local:b", KeySpec::Aes256).await.unwrap_err();
        assert!(matches!(err, VaultError::KeyUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unwrap_with_other_kek_fails() {
        let kms1 = LocalKms::generate("same-id");
        let kms2 = LocalKms::generate("same-id");
        let generated = kms1.generate_data_key("local:same-id", KeySpec::Aes256).await.unwrap();

        let err = kms2.unwrap_key("local:same-id", &generated.wrapped).await.unwrap_err();
        assert!(matches!(err, VaultError::KeyUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unwrap_foreign_blob() {
        let kms = LocalKms::generate("k");
        let err = kms.unwrap_key("local:k", &[0u8; 184]).await.unwrap_err();
        assert!(err.to_string().contains("local KMS"));
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys/kek.json");

        let kms = LocalKms::generate("file-kek");
        kms.save(&path).unwrap();
        let generated = kms.generate_data_key("local:file-kek", KeySpec::Aes256).await.unwrap();

        let loaded = LocalKms::load(&path).unwrap();
        assert_eq!(loaded.key_id(), "local:file-kek");
        let unwrapped = loaded.unwrap_key("local:file-kek", &generated.wrapped).await.unwrap();
        assert_eq!(unwrapped.as_bytes(), generated.plaintext.as_bytes());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_write_private_tightens_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kek.json");
        std::fs::write(&path, b"old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_private(&path, b"new").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_local_key_id() {
        assert_eq!(local_key_id("x"), "local:x");
        assert_eq!(local_key_id("local:x"), "local:x");
        assert!(is_local_key_id("local:x"));
        assert!(!is_local_key_id("arn:aws:kms:ap-northeast-1:1:key/abc"));
    }

    #[test]
    fn test_rejects_short_kek() {
        let result = LocalKms::new("k", DataKey::from_slice(&[1u8; 16]));
        assert!(matches!(result, Err(VaultError::CipherInit(_))));
    }
}
