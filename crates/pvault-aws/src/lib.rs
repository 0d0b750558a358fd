//! pvault-aws: AWS KMS and Amazon Cognito adapters
//!
//! - [`AwsKms`] implements [`pvault_crypto::KeyManagement`] on top of
//!   `GenerateDataKey` / `Decrypt`
//! - [`CognitoDirectory`] implements [`pvault_backup::Directory`] for user pools

pub mod cognito;
pub mod convert;
pub mod kms;

pub use cognito::CognitoDirectory;
pub use kms::AwsKms;

use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Load the shared SDK configuration (credentials chain, retries) for `region`.
pub async fn load_sdk_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}
