use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration (loaded from config.toml, then overlaid with env)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub kms: KmsConfig,
    pub backup: BackupConfig,
    pub restore: RestoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Custom S3 endpoint (None = AWS default for the region)
    pub endpoint: Option<String>,
    /// S3 region (default: ap-northeast-1)
    pub region: String,
    /// Reject plaintext HTTP endpoints
    pub enforce_tls: bool,
}

/// Envelope encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    /// Seal archives with envelope encryption (enabled when a key id is set)
    pub enabled: bool,
    /// Key-management backend: "aws" or "local"
    pub backend: String,
    /// Key-management key id (alias, ARN, or local key name)
    pub key_id: String,
    /// KMS region (defaults to the storage region)
    pub region: Option<String>,
    /// Location (file:// or s3://) of a wrapped data key to reuse
    pub data_key_path: Option<String>,
    /// Key-encryption-key file for the local backend
    pub local_key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Regex applied to resource names
    pub pattern: String,
    /// Maximum number of resources collected concurrently
    pub concurrency: usize,
    /// Encrypted-blob detection: "wrapped-key-length" or "legacy"
    pub detection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Regex applied to resource ids found in the backup
    pub pattern: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "ap-northeast-1".into(),
            enforce_tls: false,
        }
    }
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: "aws".into(),
            key_id: String::new(),
            region: None,
            data_key_path: None,
            local_key_file: None,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            pattern: ".*".into(),
            concurrency: 8,
            detection: "wrapped-key-length".into(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            pattern: ".*".into(),
        }
    }
}

impl VaultConfig {
    /// Overlay process environment variables onto the loaded file config.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Overlay variables from `lookup`:
    /// `AWS_REGION`, `KMS_KEY_ID` (enables encryption), `KMS_REGION`, `KMS_DATA_KEY_PATH`.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(region) = non_empty("AWS_REGION") {
            self.storage.region = region;
        }
        if let Some(key_id) = non_empty("KMS_KEY_ID") {
            self.kms.key_id = key_id;
            self.kms.enabled = true;
        }
        if let Some(region) = non_empty("KMS_REGION") {
            self.kms.region = Some(region);
        }
        if let Some(path) = non_empty("KMS_DATA_KEY_PATH") {
            self.kms.data_key_path = Some(path);
        }
    }

    /// Region used for KMS calls: explicit KMS region, else the storage region.
    pub fn kms_region(&self) -> &str {
        self.kms.region.as_deref().unwrap_or(&self.storage.region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[log]
level = "debug"
format = "json"

[storage]
endpoint = "https://s3.example.com"
region = "us-west-2"
enforce_tls = true

[kms]
enabled = true
backend = "local"
key_id = "backup-kek"
local_key_file = "/etc/pvault/kek.json"

[backup]
pattern = "^prod-"
concurrency = 4
detection = "legacy"

[restore]
pattern = "^us-west-2_"
"#;
        let config: VaultConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        assert_eq!(config.storage.endpoint.as_deref(), Some("https://s3.example.com"));
        assert!(config.storage.enforce_tls);
        assert!(config.kms.enabled);
        assert_eq!(config.kms.backend, "local");
        assert_eq!(
            config.kms.local_key_file,
            Some(PathBuf::from("/etc/pvault/kek.json"))
        );
        assert_eq!(config.backup.concurrency, 4);
        assert_eq!(config.backup.detection, "legacy");
        assert_eq!(config.restore.pattern, "^us-west-2_");
    }

    #[test]
    fn test_parse_defaults() {
        let config: VaultConfig = toml::from_str("").unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.storage.region, "ap-northeast-1");
        assert!(config.storage.endpoint.is_none());
        assert!(!config.kms.enabled);
        assert_eq!(config.kms.backend, "aws");
        assert_eq!(config.backup.pattern, ".*");
        assert_eq!(config.backup.concurrency, 8);
        assert_eq!(config.backup.detection, "wrapped-key-length");
    }

    #[test]
    fn test_env_overlay_enables_kms() {
        let env: HashMap<&str, &str> = [
            ("AWS_REGION", "eu-central-1"),
            ("KMS_KEY_ID", "alias/backup"),
            ("KMS_DATA_KEY_PATH", "file:///keys/datakey.json"),
        ]
        .into_iter()
        .collect();

        let mut config = VaultConfig::default();
        config.apply_env_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.storage.region, "eu-central-1");
        assert!(config.kms.enabled);
        assert_eq!(config.kms.key_id, "alias/backup");
        assert_eq!(
            config.kms.data_key_path.as_deref(),
            Some("file:///keys/datakey.json")
        );
        // KMS region falls back to the storage region
        assert_eq!(config.kms_region(), "eu-central-1");
    }

    #[test]
    fn test_env_overlay_ignores_empty_values() {
        let mut config = VaultConfig::default();
        config.apply_env_from(|name| (name == "KMS_KEY_ID").then(String::new));

        assert!(!config.kms.enabled);
        assert!(config.kms.key_id.is_empty());
    }

    #[test]
    fn test_kms_region_override() {
        let mut config = VaultConfig::default();
        config.kms.region = Some("us-east-1".into());
        assert_eq!(config.kms_region(), "us-east-1");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = VaultConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: VaultConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.region, parsed.storage.region);
        assert_eq!(config.backup.concurrency, parsed.backup.concurrency);
    }
}
