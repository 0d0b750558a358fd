//! Data keys: plaintext key material that is zeroized on drop

use std::fmt;
use std::str::FromStr;

use pvault_core::VaultError;
use rand::RngCore;
use zeroize::Zeroize;

/// Symmetric key size requested from key management
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeySpec {
    #[default]
    Aes256,
    Aes128,
}

impl KeySpec {
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes256 => 32,
            Self::Aes128 => 16,
        }
    }

    /// Name used by AWS KMS and in data-key files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256 => "AES_256",
            Self::Aes128 => "AES_128",
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeySpec {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES_256" => Ok(Self::Aes256),
            "AES_128" => Ok(Self::Aes128),
            other => Err(VaultError::Config(format!(
                "unknown key spec {other:?} (expected AES_256 or AES_128)"
            ))),
        }
    }
}

/// Plaintext data key. Zeroized on drop.
pub struct DataKey {
    bytes: Vec<u8>,
}

impl DataKey {
    /// Take ownership of key material; the caller's buffer is not copied.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Copy key material, leaving the caller responsible for its own buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn random(spec: KeySpec) -> Self {
        let mut bytes = vec![0u8; spec.key_len()];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A freshly generated data key in both forms
#[derive(Debug)]
pub struct GeneratedDataKey {
    pub plaintext: DataKey,
    /// Key-management ciphertext of `plaintext`; safe to persist
    pub wrapped: Vec<u8>,
}
