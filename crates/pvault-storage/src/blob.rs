//! Blob access over an OpenDAL operator

use opendal::Operator;
use pvault_core::{VaultError, VaultResult};
use regex::Regex;
use tracing::debug;

/// The object-store collaborator used by sealing and restore.
#[derive(Debug, Clone)]
pub struct BlobStore {
    op: Operator,
}

fn storage_err(action: &str, key: &str, e: opendal::Error) -> VaultError {
    VaultError::Storage(format!("{action} {key}: {e}"))
}

impl BlobStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub async fn read_blob(&self, key: &str) -> VaultResult<Vec<u8>> {
        let buf = self
            .op
            .read(key)
            .await
            .map_err(|e| storage_err("reading", key, e))?;
        Ok(buf.to_vec())
    }

    pub async fn write_blob(&self, key: &str, bytes: Vec<u8>) -> VaultResult<()> {
        let len = bytes.len();
        self.op
            .write(key, bytes)
            .await
            .map_err(|e| storage_err("writing", key, e))?;
        debug!(key, bytes = len, "wrote blob");
        Ok(())
    }

    /// All file keys under `prefix` (recursively) whose full key matches `pattern`, sorted.
    pub async fn list_keys_by_pattern(
        &self,
        prefix: &str,
        pattern: &Regex,
    ) -> VaultResult<Vec<String>> {
        let dir = if prefix.is_empty() { "/" } else { prefix };
        let entries = match self.op.list_with(dir).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(storage_err("listing", dir, e)),
        };

        let mut keys: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.metadata().is_file())
            .map(|entry| entry.path().trim_start_matches('/').to_string())
            .filter(|key| pattern.is_match(key))
            .collect();
        keys.sort();

        debug!(prefix, pattern = %pattern, matched = keys.len(), "listed keys");
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{build_fs_operator, build_memory_operator};

    fn memory_store() -> BlobStore {
        BlobStore::new(build_memory_operator().unwrap())
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = memory_store();
        store.write_blob("a/b.json", b"{}".to_vec()).await.unwrap();
        assert_eq!(store.read_blob("a/b.json").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_read_missing_is_storage_error() {
        let store = memory_store();
        let err = store.read_blob("missing").await.unwrap_err();
        assert!(matches!(err, VaultError::Storage(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_list_keys_by_pattern() {
        let store = memory_store();
        for key in [
            "backups/pool-b/metadata.json",
            "backups/pool-a/metadata.json",
            "backups/pool-a/members.json",
            "other/pool-c/metadata.json",
        ] {
            store.write_blob(key, vec![1]).await.unwrap();
        }

        let re = Regex::new(r"/metadata\.json$").unwrap();
        let keys = store.list_keys_by_pattern("backups/", &re).await.unwrap();
        assert_eq!(
            keys,
            vec![
                "backups/pool-a/metadata.json".to_string(),
                "backups/pool-b/metadata.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_missing_prefix_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = BlobStore::new(build_fs_operator(tmp.path().to_str().unwrap()).unwrap());
        let re = Regex::new(".*").unwrap();
        assert!(store.list_keys_by_pattern("nothing/", &re).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = BlobStore::new(build_fs_operator(tmp.path().to_str().unwrap()).unwrap());
        store
            .write_blob("nested/dir/archive.tar.gz", vec![0x1f, 0x8b])
            .await
            .unwrap();
        assert!(tmp.path().join("nested/dir/archive.tar.gz").exists());
    }
}
