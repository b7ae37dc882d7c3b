//! Per-identity salt generation.
//!
//! One salt is generated when an account is created and one more on every
//! committed key rotation. Salts are stored in clear next to the credential;
//! they need to be unique, not secret.

use crate::error::{CryptoError, CryptoResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Salt length in bytes.
pub const SALT_SIZE: usize = 16;

/// Random per-user salt fed to Argon2id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Draws a fresh salt from the thread-local CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds a salt from a stored column, checking its length.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; SALT_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidFormat(format!(
                "salt must be {SALT_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidFormat(format!("salt is not base64: {e}")))?;
        Self::from_slice(&bytes)
    }
}

/// Generates the salt for a new identity (or a rotation).
pub fn generate_salt() -> Salt {
    Salt::random()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn salts_are_unique_across_identities() {
        let salts: HashSet<Salt> = (0..10_000).map(|_| generate_salt()).collect();
        assert_eq!(salts.len(), 10_000);
    }

    #[test]
    fn base64_round_trip() {
        let salt = Salt::random();
        let restored = Salt::from_base64(&salt.to_base64()).unwrap();
        assert_eq!(salt, restored);
    }

    #[test]
    fn wrong_length_rejected() {
        let err = Salt::from_slice(&[0u8; 15]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidFormat(_)));

        let err = Salt::from_base64(&STANDARD.encode([0u8; 32])).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidFormat(_)));
    }

    #[test]
    fn garbage_base64_rejected() {
        assert!(matches!(
            Salt::from_base64("%%%not-base64"),
            Err(CryptoError::InvalidFormat(_))
        ));
    }
}
