//! Encrypted-blob sniffing
//!
//! Frames carry no magic marker, so deciding whether a stored blob must be
//! decrypted is a heuristic over the two header fields.
//!
//! Two policies exist:
//!
//! - [`DetectionPolicy::Legacy`]: the historical rule. It reads the first
//!   field as a nonce length and requires it to be 12. Frames put the
//!   wrapped-key length there, so real frames are almost never detected.
//! - [`DetectionPolicy::WrappedKeyLength`] (default): checks the wrapped-key
//!   length against a plausible range and requires the declared lengths to
//!   match the blob exactly.

use std::fmt;
use std::str::FromStr;

use pvault_core::VaultError;

use crate::frame::{read_header, HEADER_LEN};
use crate::{NONCE_SIZE, TAG_SIZE};

/// Plausible size range of a wrapped data key
pub const MIN_WRAPPED_KEY_LEN: u32 = 50;
pub const MAX_WRAPPED_KEY_LEN: u32 = 2000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DetectionPolicy {
    Legacy,
    #[default]
    WrappedKeyLength,
}

impl DetectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::WrappedKeyLength => "wrapped-key-length",
        }
    }

    pub fn looks_encrypted(&self, data: &[u8]) -> bool {
        match self {
            Self::Legacy => looks_encrypted_legacy(data),
            Self::WrappedKeyLength => looks_encrypted(data),
        }
    }
}

impl fmt::Display for DetectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionPolicy {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(Self::Legacy),
            "wrapped-key-length" => Ok(Self::WrappedKeyLength),
            other => Err(VaultError::Config(format!(
                "unknown detection policy {other:?} (expected \"legacy\" or \"wrapped-key-length\")"
            ))),
        }
    }
}

/// True if `data` is shaped like a frame produced by [`crate::frame::serialize`].
pub fn looks_encrypted(data: &[u8]) -> bool {
    let Some((key_len, payload_len)) = read_header(data) else {
        return false;
    };
    if !(MIN_WRAPPED_KEY_LEN..=MAX_WRAPPED_KEY_LEN).contains(&key_len) {
        return false;
    }
    if (payload_len as usize) < NONCE_SIZE + TAG_SIZE {
        return false;
    }
    let declared = HEADER_LEN as u64 + key_len as u64 + payload_len as u64;
    data.len() as u64 == declared
}

/// The historical rule, kept for compatibility with older tooling.
pub fn looks_encrypted_legacy(data: &[u8]) -> bool {
    let Some((nonce_len, key_len)) = read_header(data) else {
        return false;
    };
    if nonce_len as usize != NONCE_SIZE {
        return false;
    }
    if !(MIN_WRAPPED_KEY_LEN..=MAX_WRAPPED_KEY_LEN).contains(&key_len) {
        return false;
    }
    let min_len = HEADER_LEN + nonce_len as usize + key_len as usize + TAG_SIZE;
    data.len() >= min_len
}
