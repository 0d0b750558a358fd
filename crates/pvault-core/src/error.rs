use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Malformed envelope frame or payload layout.
    #[error("format error: {0}")]
    Format(String),

    /// AEAD tag verification failed (tampered data or wrong key).
    #[error("authentication failed: ciphertext was tampered with or the key is wrong")]
    Authentication,

    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("cipher init error: {0}")]
    CipherInit(String),

    #[error("no resources matched pattern: {0}")]
    NoMatch(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("directory error: {0}")]
    Directory(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            VaultError::Format("too short".into()).to_string(),
            "format error: too short"
        );
        assert_eq!(
            VaultError::NoMatch("^prod-".into()).to_string(),
            "no resources matched pattern: ^prod-"
        );
        assert!(VaultError::Authentication.to_string().contains("tampered"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: VaultError = io.into();
        assert!(matches!(err, VaultError::Io(_)));
    }
}
