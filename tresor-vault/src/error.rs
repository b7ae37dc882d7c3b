//! Vault error types.

use thiserror::Error;
use tresor_crypto::CryptoError;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors returned by the vault and the key service.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Unknown user or wrong password. The two are not distinguished.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user already exists: {0}")]
    AlreadyExists(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("field not found: {record_id}.{field}")]
    FieldNotFound { record_id: String, field: String },

    #[error("key rotation already in progress for user {0}")]
    RotationInProgress(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<duckdb::Error> for VaultError {
    fn from(e: duckdb::Error) -> Self {
        VaultError::Storage(e.to_string())
    }
}
