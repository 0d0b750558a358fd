//! Envelope encryption: a data key wrapped by key management seals the payload
//!
//! Sealed payload format (binary):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! The wrapped data key travels next to the payload in an
//! [`EnvelopeFrame`](crate::frame::EnvelopeFrame).

use std::fmt;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use pvault_core::{VaultError, VaultResult};
use rand::RngCore;
use tracing::debug;

use crate::frame::{self, EnvelopeFrame};
use crate::keys::{DataKey, GeneratedDataKey, KeySpec};
use crate::kms::KeyManagement;
use crate::{NONCE_SIZE, TAG_SIZE};

enum GcmCipher {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

impl GcmCipher {
    fn for_key(key: &DataKey) -> VaultResult<Self> {
        match key.len() {
            32 => Aes256Gcm::new_from_slice(key.as_bytes())
                .map(Self::Aes256)
                .map_err(|e| VaultError::CipherInit(e.to_string())),
            16 => Aes128Gcm::new_from_slice(key.as_bytes())
                .map(Self::Aes128)
                .map_err(|e| VaultError::CipherInit(e.to_string())),
            n => Err(VaultError::CipherInit(format!(
                "data key must be 16 or 32 bytes, got {n}"
            ))),
        }
    }

    fn encrypt(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.encrypt(nonce, plaintext),
            Self::Aes256(c) => c.encrypt(nonce, plaintext),
        }
    }

    fn decrypt(&self, nonce: &[u8], sealed: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.decrypt(nonce, sealed),
            Self::Aes256(c) => c.decrypt(nonce, sealed),
        }
    }
}

/// Seal `plaintext` under a plaintext data key.
///
/// Returns `[12-byte nonce][ciphertext][16-byte tag]`.
pub fn seal_payload(key: &DataKey, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    let cipher = GcmCipher::for_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let sealed = cipher
        .encrypt(&nonce_bytes, plaintext)
        .map_err(|e| VaultError::CipherInit(format!("payload encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a payload produced by [`seal_payload`]. No partial plaintext is ever returned.
pub fn open_payload(key: &DataKey, payload: &[u8]) -> VaultResult<Vec<u8>> {
    check_payload_len(payload)?;
    let cipher = GcmCipher::for_key(key)?;

    let (nonce_bytes, sealed) = payload.split_at(NONCE_SIZE);
    cipher.decrypt(nonce_bytes, sealed).map_err(|_| VaultError::Authentication)
}

fn check_payload_len(payload: &[u8]) -> VaultResult<()> {
    if payload.len() < NONCE_SIZE + TAG_SIZE {
        return Err(VaultError::Format(format!(
            "sealed payload too short: {} bytes (minimum {})",
            payload.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }
    Ok(())
}

/// Encrypts and decrypts archives with a data key managed by a [`KeyManagement`].
///
/// Immutable after construction, so one cipher can be shared across tasks.
#[derive(Clone)]
pub struct EnvelopeCipher {
    kms: Arc<dyn KeyManagement>,
    key_id: String,
    spec: KeySpec,
    wrapped_key: Option<Vec<u8>>,
}

impl EnvelopeCipher {
    /// A cipher that asks key management for a fresh data key on every encryption.
    pub fn new(kms: Arc<dyn KeyManagement>, key_id: impl Into<String>) -> Self {
        Self {
            kms,
            key_id: key_id.into(),
            spec: KeySpec::default(),
            wrapped_key: None,
        }
    }

    /// A cipher that encrypts under an existing wrapped data key.
    ///
    /// The key is unwrapped on each use and the plaintext dropped right after.
    pub fn with_data_key(
        kms: Arc<dyn KeyManagement>,
        key_id: impl Into<String>,
        wrapped_key: Vec<u8>,
    ) -> Self {
        Self {
            kms,
            key_id: key_id.into(),
            spec: KeySpec::default(),
            wrapped_key: Some(wrapped_key),
        }
    }

    pub fn with_spec(mut self, spec: KeySpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn has_data_key(&self) -> bool {
        self.wrapped_key.is_some()
    }

    /// Ask key management for a fresh data key of the configured spec.
    pub async fn generate_data_key(&self) -> VaultResult<GeneratedDataKey> {
        self.kms.generate_data_key(&self.key_id, self.spec).await
    }

    pub async fn encrypt(&self, plaintext: &[u8]) -> VaultResult<EnvelopeFrame> {
        let (key, wrapped_key) = match &self.wrapped_key {
            Some(wrapped) => {
                let key = self.kms.unwrap_key(&self.key_id, wrapped).await?;
                (key, wrapped.clone())
            }
            None => {
                let generated = self.generate_data_key().await?;
                (generated.plaintext, generated.wrapped)
            }
        };

        let payload = seal_payload(&key, plaintext)?;
        debug!(
            key_id = %self.key_id,
            plaintext_len = plaintext.len(),
            payload_len = payload.len(),
            "sealed payload"
        );
        Ok(EnvelopeFrame::new(wrapped_key, payload))
    }

    pub async fn decrypt(&self, frame: &EnvelopeFrame) -> VaultResult<Vec<u8>> {
        check_payload_len(&frame.payload)?;
        let key = self.kms.unwrap_key(&self.key_id, &frame.wrapped_key).await?;
        open_payload(&key, &frame.payload)
    }

    /// Encrypt and serialize into frame bytes.
    pub async fn encrypt_to_bytes(&self, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        self.encrypt(plaintext).await?.to_bytes()
    }

    /// Deserialize frame bytes and decrypt.
    pub async fn decrypt_bytes(&self, data: &[u8]) -> VaultResult<Vec<u8>> {
        let (wrapped_key, payload) = frame::deserialize(data)?;
        self.decrypt(&EnvelopeFrame::new(wrapped_key, payload)).await
    }
}

impl fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCipher")
            .field("key_id", &self.key_id)
            .field("spec", &self.spec)
            .field("has_data_key", &self.wrapped_key.is_some())
            .finish()
    }
}
