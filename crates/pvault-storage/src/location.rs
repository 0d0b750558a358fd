//! Backup location URIs: `s3://bucket/key` and `file:///path`

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use pvault_core::{VaultError, VaultResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupLocation {
    S3 { bucket: String, key: String },
    /// Always absolute; relative `file://` paths are resolved on parse.
    File { path: PathBuf },
}

impl BackupLocation {
    pub fn parse(uri: &str) -> VaultResult<Self> {
        if let Some(rest) = uri.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(VaultError::Config(format!("missing bucket in URI: {uri}")));
            }
            return Ok(Self::S3 {
                bucket: bucket.to_string(),
                key: key.trim_start_matches('/').to_string(),
            });
        }

        if let Some(rest) = uri.strip_prefix("file://") {
            if rest.is_empty() {
                return Err(VaultError::Config(format!("missing path in URI: {uri}")));
            }
            let path = std::path::absolute(Path::new(rest))?;
            return Ok(Self::File { path });
        }

        Err(VaultError::Config(format!(
            "invalid URI format: {uri} (expected s3://bucket/key or file:///path)"
        )))
    }

    /// Object key relative to the operator root for this location.
    pub fn key(&self) -> String {
        match self {
            Self::S3 { key, .. } => key.clone(),
            Self::File { path } => path
                .to_string_lossy()
                .trim_start_matches('/')
                .to_string(),
        }
    }

    /// True when the location names a sealed `.tar.gz` archive rather than a tree prefix.
    pub fn is_archive(&self) -> bool {
        let key = self.key();
        key.ends_with(".tar.gz") || key.ends_with(".tgz")
    }

    /// Key used as a listing prefix: the location key with a trailing slash.
    pub fn prefix(&self) -> String {
        let key = self.key();
        if key.is_empty() || key.ends_with('/') {
            key
        } else {
            format!("{key}/")
        }
    }
}

impl FromStr for BackupLocation {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BackupLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3 { bucket, key } => write!(f, "s3://{bucket}/{key}"),
            Self::File { path } => write!(f, "file://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3() {
        let loc = BackupLocation::parse("s3://my-bucket/backups/2024/backup.tar.gz").unwrap();
        assert_eq!(
            loc,
            BackupLocation::S3 {
                bucket: "my-bucket".into(),
                key: "backups/2024/backup.tar.gz".into(),
            }
        );
        assert!(loc.is_archive());
        assert_eq!(loc.to_string(), "s3://my-bucket/backups/2024/backup.tar.gz");
    }

    #[test]
    fn test_parse_s3_bucket_only() {
        let loc = BackupLocation::parse("s3://my-bucket").unwrap();
        assert_eq!(loc.key(), "");
        assert_eq!(loc.prefix(), "");
        assert!(!loc.is_archive());
    }

    #[test]
    fn test_s3_tree_prefix() {
        let loc: BackupLocation = "s3://b/backups/daily".parse().unwrap();
        assert_eq!(loc.prefix(), "backups/daily/");
    }

    #[test]
    fn test_parse_file() {
        let loc = BackupLocation::parse("file:///var/backups/pools.tar.gz").unwrap();
        assert_eq!(
            loc,
            BackupLocation::File {
                path: PathBuf::from("/var/backups/pools.tar.gz")
            }
        );
        assert_eq!(loc.key(), "var/backups/pools.tar.gz");
        assert!(loc.is_archive());
    }

    #[test]
    fn test_parse_relative_file_is_absolutized() {
        let loc = BackupLocation::parse("file://out/backup.tgz").unwrap();
        match loc {
            BackupLocation::File { path } => {
                assert!(path.is_absolute());
                assert!(path.ends_with("out/backup.tgz"));
            }
            other => panic!("unexpected location {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        assert!(BackupLocation::parse("gs://bucket/key").is_err());
        assert!(BackupLocation::parse("s3:///key").is_err());
        assert!(BackupLocation::parse("file://").is_err());
    }
}
