use async_trait::async_trait;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::DataKeySpec;
use aws_sdk_kms::Client;
use pvault_core::{VaultError, VaultResult};
use pvault_crypto::{DataKey, GeneratedDataKey, KeyManagement, KeySpec};
use tracing::debug;

/// AWS KMS as the key-management service.
///
/// Plaintext returned by KMS is moved straight into a [`DataKey`].
#[derive(Clone)]
pub struct AwsKms {
    client: Client,
}

impl AwsKms {
    pub async fn new(region: &str) -> Self {
        let sdk_config = crate::load_sdk_config(region).await;
        debug!(region, "AWS KMS client ready");
        Self::from_client(Client::new(&sdk_config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

pub(crate) fn data_key_spec(spec: KeySpec) -> DataKeySpec {
    match spec {
        KeySpec::Aes256 => DataKeySpec::Aes256,
        KeySpec::Aes128 => DataKeySpec::Aes128,
    }
}

fn kms_err<E: std::error::Error>(op: &str, key_id: &str, err: E) -> VaultError {
    VaultError::KeyUnavailable(format!("KMS {op} for {key_id}: {}", DisplayErrorContext(err)))
}

fn missing(op: &str, field: &str) -> VaultError {
    VaultError::KeyUnavailable(format!("KMS {op} response has no {field}"))
}

#[async_trait]
impl KeyManagement for AwsKms {
    async fn generate_data_key(
        &self,
        key_id: &str,
        spec: KeySpec,
    ) -> VaultResult<GeneratedDataKey> {
        let mut out = self
            .client
            .generate_data_key()
            .key_id(key_id)
            .key_spec(data_key_spec(spec))
            .send()
            .await
            .map_err(|e| kms_err("GenerateDataKey", key_id, e))?;

        let plaintext = out
            .plaintext
            .take()
            .ok_or_else(|| missing("GenerateDataKey", "plaintext"))?;
        let wrapped = out
            .ciphertext_blob
            .take()
            .ok_or_else(|| missing("GenerateDataKey", "ciphertext blob"))?;

        debug!(key_id, spec = %spec, wrapped_len = wrapped.as_ref().len(), "data key generated");
        Ok(GeneratedDataKey {
            plaintext: DataKey::from_vec(plaintext.into_inner()),
            wrapped: wrapped.into_inner(),
        })
    }

    async fn unwrap_key(&self, key_id: &str, wrapped: &[u8]) -> VaultResult<DataKey> {
        let mut out = self
            .client
            .decrypt()
            .key_id(key_id)
            .ciphertext_blob(Blob::new(wrapped.to_vec()))
            .send()
            .await
            .map_err(|e| kms_err("Decrypt", key_id, e))?;

        let plaintext = out.plaintext.take().ok_or_else(|| missing("Decrypt", "plaintext"))?;
        Ok(DataKey::from_vec(plaintext.into_inner()))
    }
}
