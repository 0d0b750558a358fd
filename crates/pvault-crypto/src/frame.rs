//! Envelope frame wire format
//!
//! ```text
//! [4 bytes LE u32: wrapped key length W][4 bytes LE u32: payload length P]
//! [W bytes: wrapped data key][P bytes: nonce(12) || ciphertext || tag(16)]
//! ```
//!
//! The layout is fixed and carries no magic or version marker, so decoding is
//! strict: the declared lengths must account for every input byte.

use pvault_core::{VaultError, VaultResult};

/// Size of the two length fields
pub const HEADER_LEN: usize = 8;

/// A wrapped data key plus the sealed payload it protects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeFrame {
    /// Key-management output; never plaintext key material
    pub wrapped_key: Vec<u8>,
    /// `nonce || ciphertext || tag`
    pub payload: Vec<u8>,
}

impl EnvelopeFrame {
    pub fn new(wrapped_key: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            wrapped_key,
            payload,
        }
    }

    pub fn to_bytes(&self) -> VaultResult<Vec<u8>> {
        serialize(&self.wrapped_key, &self.payload)
    }

    pub fn from_bytes(data: &[u8]) -> VaultResult<Self> {
        let (wrapped_key, payload) = deserialize(data)?;
        Ok(Self::new(wrapped_key, payload))
    }
}

/// Serialize a wrapped key and payload into exactly `8 + W + P` bytes.
pub fn serialize(wrapped_key: &[u8], payload: &[u8]) -> VaultResult<Vec<u8>> {
    let key_len = u32::try_from(wrapped_key.len()).map_err(|_| {
        VaultError::Format(format!(
            "wrapped key too large for frame: {} bytes",
            wrapped_key.len()
        ))
    })?;
    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        VaultError::Format(format!("payload too large for frame: {} bytes", payload.len()))
    })?;

    let mut out = Vec::with_capacity(HEADER_LEN + wrapped_key.len() + payload.len());
    out.extend_from_slice(&key_len.to_le_bytes());
    out.extend_from_slice(&payload_len.to_le_bytes());
    out.extend_from_slice(wrapped_key);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split a frame back into `(wrapped_key, payload)`.
pub fn deserialize(data: &[u8]) -> VaultResult<(Vec<u8>, Vec<u8>)> {
    let (key_len, payload_len) = read_header(data).ok_or_else(|| {
        VaultError::Format(format!(
            "frame too short: {} bytes (minimum {HEADER_LEN})",
            data.len()
        ))
    })?;

    let body = &data[HEADER_LEN..];
    let declared = key_len as u64 + payload_len as u64;
    if (body.len() as u64) < declared {
        return Err(VaultError::Format(format!(
            "incomplete frame: header declares {declared} bytes, {} present",
            body.len()
        )));
    }
    if (body.len() as u64) > declared {
        return Err(VaultError::Format(format!(
            "trailing data after frame: header declares {declared} bytes, {} present",
            body.len()
        )));
    }

    let (wrapped_key, payload) = body.split_at(key_len as usize);
    Ok((wrapped_key.to_vec(), payload.to_vec()))
}

/// Read the two little-endian length fields, if present.
pub(crate) fn read_header(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < HEADER_LEN {
        return None;
    }
    let first = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let second = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    Some((first, second))
}
