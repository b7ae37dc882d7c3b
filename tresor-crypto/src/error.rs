//! Error types for the encryption core.
//!
//! Messages carry record and field names at most. Plaintext, keys and
//! passwords never appear in an error.

use thiserror::Error;

/// Result type for encryption core operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors produced by the encryption core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Password mismatch, or AEAD tag mismatch on decrypt. Wrong key and
    /// tampered ciphertext are reported identically.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Stored blob is truncated, badly encoded or of an unknown version.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Key rotation stopped before commit. Nothing was written.
    #[error("key rotation aborted: {0}")]
    RotationAborted(String),

    /// Password or value rejected by a pre-declared input check.
    #[error("weak input: {0}")]
    WeakInput(String),

    /// Argon2 or HKDF refused its inputs.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The AEAD refused to seal (only possible on absurd input sizes).
    #[error("encryption failed: {0}")]
    Encryption(String),
}
