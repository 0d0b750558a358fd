//! OpenDAL Operator factory for backup locations

use anyhow::{Context, Result};
use opendal::Operator;

use crate::location::BackupLocation;

/// Minimal config needed to build an S3 operator
/// (TLS policy and defaults live in pvault-core's StorageConfig)
#[derive(Debug, Clone)]
pub struct S3Target {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint; `None` uses the AWS endpoint for the region
    pub endpoint: Option<String>,
}

fn finish<B: opendal::Builder>(builder: B, what: &str) -> Result<Operator> {
    let op = Operator::new(builder)
        .with_context(|| format!("creating OpenDAL {what} operator"))?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();
    Ok(op)
}

/// Build an S3 operator for one bucket.
///
/// Credentials are not passed in: OpenDAL loads them from `AWS_ACCESS_KEY_ID`
/// / `AWS_SECRET_ACCESS_KEY` or the shared AWS config.
pub fn build_s3_operator(target: &S3Target) -> Result<Operator> {
    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let mut builder = opendal::services::S3::default()
        .bucket(&target.bucket)
        .region(&target.region);
    if let Some(endpoint) = &target.endpoint {
        builder = builder.endpoint(endpoint);
    }
    finish(builder, "S3")
}

/// Build a filesystem operator rooted at `root`.
pub fn build_fs_operator(root: &str) -> Result<Operator> {
    finish(opendal::services::Fs::default().root(root), "filesystem")
}

/// Build an in-memory operator (tests and dry runs).
pub fn build_memory_operator() -> Result<Operator> {
    finish(opendal::services::Memory::default(), "memory")
}

/// Build the operator serving `location`.
///
/// If `enforce_tls` is true and a custom endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_for_location(
    storage: &pvault_core::config::StorageConfig,
    location: &BackupLocation,
) -> Result<Operator> {
    match location {
        BackupLocation::File { .. } => build_fs_operator("/"),
        BackupLocation::S3 { bucket, .. } => {
            if let Some(endpoint) = storage.endpoint.as_deref() {
                if endpoint.starts_with("http://") {
                    if storage.enforce_tls {
                        anyhow::bail!(
                            "S3 endpoint uses plaintext HTTP ({endpoint}), but enforce_tls is enabled. \
                             Use an HTTPS endpoint or set storage.enforce_tls = false for local development."
                        );
                    }
                    tracing::warn!(
                        endpoint,
                        "S3 endpoint uses plaintext HTTP: archives and credentials are transmitted unencrypted"
                    );
                }
            }

            build_s3_operator(&S3Target {
                bucket: bucket.clone(),
                region: storage.region.clone(),
                endpoint: storage.endpoint.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvault_core::config::StorageConfig;

    fn s3_location() -> BackupLocation {
        BackupLocation::parse("s3://test-bucket/backups/pools.tar.gz").unwrap()
    }

    #[test]
    fn test_build_s3_operator_valid() {
        let target = S3Target {
            bucket: "test-bucket".into(),
            region: "ap-northeast-1".into(),
            endpoint: Some("http://localhost:9000".into()),
        };
        assert!(build_s3_operator(&target).is_ok(), "operator construction should succeed");
    }

    #[test]
    fn test_build_for_location_http_warning() {
        // HTTP endpoint with enforce_tls=false should succeed (but log warning)
        let storage = StorageConfig {
            endpoint: Some("http://localhost:9000".into()),
            enforce_tls: false,
            ..Default::default()
        };
        assert!(build_for_location(&storage, &s3_location()).is_ok());
    }

    #[test]
    fn test_build_for_location_http_enforce_tls() {
        let storage = StorageConfig {
            endpoint: Some("http://insecure:9000".into()),
            enforce_tls: true,
            ..Default::default()
        };
        let result = build_for_location(&storage, &s3_location());
        assert!(result.is_err(), "HTTP + enforce_tls must fail");
        assert!(
            result.unwrap_err().to_string().contains("enforce_tls"),
            "error message should mention enforce_tls"
        );
    }

    #[test]
    fn test_build_for_location_default_endpoint() {
        let storage = StorageConfig {
            enforce_tls: true,
            ..Default::default()
        };
        assert!(build_for_location(&storage, &s3_location()).is_ok());
    }

    #[test]
    fn test_file_location_ignores_tls_policy() {
        let storage = StorageConfig {
            endpoint: Some("http://insecure:9000".into()),
            enforce_tls: true,
            ..Default::default()
        };
        let loc = BackupLocation::parse("file:///tmp/backup.tar.gz").unwrap();
        assert!(build_for_location(&storage, &loc).is_ok());
    }
}
