//! pvault-crypto: envelope encryption for backup archives
//!
//! A per-archive AES-GCM data key is generated by (or wrapped through) a
//! key-management service. The wrapped key and the sealed payload travel
//! together in an [`EnvelopeFrame`]:
//! ```text
//! KMS key (never leaves key management)
//!   └── Data key (AES-256 or AES-128, wrapped by the KMS key)
//!       └── Payload AEAD: AES-GCM (key=data key, nonce=random 96-bit)
//! ```

pub mod cipher;
pub mod datakey;
pub mod detect;
pub mod frame;
pub mod keys;
pub mod kms;

pub use cipher::{open_payload, seal_payload, EnvelopeCipher};
pub use datakey::{parse_wrapped_key, DataKeyFile, DataKeyFormat};
pub use detect::{looks_encrypted, looks_encrypted_legacy, DetectionPolicy};
pub use frame::{deserialize, serialize, EnvelopeFrame};
pub use keys::{DataKey, GeneratedDataKey, KeySpec};
pub use kms::{is_local_key_id, local_key_id, write_private, KeyManagement, LocalKms};

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
