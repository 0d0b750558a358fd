//! Data-key files written by `pvault generate-datakey` and read by backup/restore
//!
//! Two output formats exist. JSON:
//! ```text
//! {"kms_key_id": "...", "encrypted_data_key": "<b64>", "plaintext_data_key": "<b64>",
//!  "key_spec": "AES_256", "generated_at": "<rfc3339>"}
//! ```
//! and a commented base64 text form whose first non-comment line is the
//! wrapped key. Readers also accept raw wrapped-key bytes.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use chrono::{SecondsFormat, Utc};
use pvault_core::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::keys::{GeneratedDataKey, KeySpec};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataKeyFormat {
    #[default]
    Json,
    Base64,
}

impl fmt::Display for DataKeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Base64 => f.write_str("base64"),
        }
    }
}

impl FromStr for DataKeyFormat {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "base64" => Ok(Self::Base64),
            other => Err(VaultError::Config(format!(
                "unknown data key format {other:?} (expected json or base64)"
            ))),
        }
    }
}

/// JSON form of a data-key file. The plaintext field is zeroized on drop.
#[derive(Serialize, Deserialize)]
pub struct DataKeyFile {
    pub kms_key_id: String,
    pub encrypted_data_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext_data_key: Option<String>,
    pub key_spec: String,
    pub generated_at: String,
}

impl DataKeyFile {
    pub fn new(kms_key_id: &str, spec: KeySpec, generated: &GeneratedDataKey) -> Self {
        Self {
            kms_key_id: kms_key_id.to_string(),
            encrypted_data_key: B64.encode(&generated.wrapped),
            plaintext_data_key: Some(B64.encode(generated.plaintext.as_bytes())),
            key_spec: spec.as_str().to_string(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn wrapped_key(&self) -> VaultResult<Vec<u8>> {
        B64.decode(self.encrypted_data_key.trim()).map_err(|e| {
            VaultError::Format(format!("data key file: invalid encrypted_data_key: {e}"))
        })
    }
}

impl Drop for DataKeyFile {
    fn drop(&mut self) {
        if let Some(plaintext) = self.plaintext_data_key.as_mut() {
            plaintext.zeroize();
        }
    }
}

impl fmt::Debug for DataKeyFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKeyFile")
            .field("kms_key_id", &self.kms_key_id)
            .field("key_spec", &self.key_spec)
            .field("generated_at", &self.generated_at)
            .finish_non_exhaustive()
    }
}

/// Render a generated key for output. The returned text holds plaintext key
/// material and is zeroized when dropped.
pub fn render(
    kms_key_id: &str,
    spec: KeySpec,
    generated: &GeneratedDataKey,
    format: DataKeyFormat,
) -> VaultResult<Zeroizing<String>> {
    match format {
        DataKeyFormat::Json => {
            let file = DataKeyFile::new(kms_key_id, spec, generated);
            let mut json = serde_json::to_string_pretty(&file)?;
            json.push('\n');
            Ok(Zeroizing::new(json))
        }
        DataKeyFormat::Base64 => {
            let plaintext = Zeroizing::new(B64.encode(generated.plaintext.as_bytes()));
            Ok(Zeroizing::new(format!(
                "# Encrypted Data Key (Base64)\n{}\n\n# Plaintext Data Key (Base64) - Handle with care\n{}\n",
                B64.encode(&generated.wrapped),
                plaintext.as_str()
            )))
        }
    }
}

/// Extract the wrapped data key from the contents of a data-key file.
pub fn parse_wrapped_key(data: &[u8]) -> VaultResult<Vec<u8>> {
    let Ok(text) = std::str::from_utf8(data) else {
        return raw_wrapped_key(data);
    };
    let trimmed = text.trim_start();

    if trimmed.starts_with('{') {
        let file: DataKeyFile = serde_json::from_str(trimmed)
            .map_err(|e| VaultError::Format(format!("data key file: {e}")))?;
        return file.wrapped_key();
    }

    let first_line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'));
    match first_line.map(|line| B64.decode(line)) {
        Some(Ok(wrapped)) if !wrapped.is_empty() => Ok(wrapped),
        _ => raw_wrapped_key(data),
    }
}

fn raw_wrapped_key(data: &[u8]) -> VaultResult<Vec<u8>> {
    if data.is_empty() {
        return Err(VaultError::Format("data key file is empty".into()));
    }
    Ok(data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::DataKey;

    fn generated() -> GeneratedDataKey {
        GeneratedDataKey {
            plaintext: DataKey::from_slice(&[0x42; 32]),
            wrapped: (0..184u8).collect(),
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let text = render("alias/backup", KeySpec::Aes256, &generated(), DataKeyFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["kms_key_id"], "alias/backup");
        assert_eq!(value["key_spec"], "AES_256");
        assert!(value["plaintext_data_key"].is_string());

        let wrapped = parse_wrapped_key(text.as_bytes()).unwrap();
        assert_eq!(wrapped, generated().wrapped);
    }

    #[test]
    fn test_base64_text_roundtrip() {
        let text = render("k", KeySpec::Aes128, &generated(), DataKeyFormat::Base64).unwrap();
        assert!(text.starts_with("# Encrypted Data Key"));
        let wrapped = parse_wrapped_key(text.as_bytes()).unwrap();
        assert_eq!(wrapped, generated().wrapped);
    }

    #[test]
    fn test_json_without_plaintext() {
        let json = format!(
            r#"{{"kms_key_id":"k","encrypted_data_key":"{}","key_spec":"AES_256","generated_at":"2024-01-01T00:00:00Z"}}"#,
            B64.encode([9u8; 60])
        );
        assert_eq!(parse_wrapped_key(json.as_bytes()).unwrap(), vec![9u8; 60]);
    }

    #[test]
    fn test_raw_bytes_accepted() {
        let raw = vec![0x01, 0x02, 0x03, 0xff, 0xfe, 0x80];
        assert_eq!(parse_wrapped_key(&raw).unwrap(), raw);
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = parse_wrapped_key(br#"{"kms_key_id": "k""#).unwrap_err();
        assert!(matches!(err, VaultError::Format(_)));
        assert!(parse_wrapped_key(b"").is_err());
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("base64".parse::<DataKeyFormat>().unwrap(), DataKeyFormat::Base64);
        assert_eq!(DataKeyFormat::default().to_string(), "json");
        assert!("yaml".parse::<DataKeyFormat>().is_err());
    }

    #[test]
    fn test_debug_omits_key_material() {
        let file = DataKeyFile::new("k", KeySpec::Aes256, &generated());
        let dbg = format!("{file:?}");
        assert!(!dbg.contains(&B64.encode([0x42u8; 32])));
    }
}
