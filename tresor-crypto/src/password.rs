//! Login password hashing.
//!
//! Authentication only: these hashes are unrelated to the data encryption
//! keys, which come from `derive_master_key` with the user's own salt.
//!
//! Hashes are Argon2id PHC strings (`$argon2id$v=19$m=..,t=..,p=..$salt$hash`)
//! so verification reads its parameters from the stored string and keeps
//! working after `KdfParams` are raised.

use crate::error::{CryptoError, CryptoResult};
use crate::key::KdfParams;
use crate::salt::SALT_SIZE;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, Params};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Minimum password requirements checked before any key material is derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    /// Minimum length in characters (not bytes).
    pub min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 8 }
    }
}

/// Rejects passwords that do not meet `policy`.
pub fn check_password_strength(password: &str, policy: &PasswordPolicy) -> CryptoResult<()> {
    if password.trim().is_empty() {
        return Err(CryptoError::WeakInput(
            "password must not be empty or whitespace".into(),
        ));
    }
    if password.chars().count() < policy.min_length {
        return Err(CryptoError::WeakInput(format!(
            "password shorter than {} characters",
            policy.min_length
        )));
    }
    Ok(())
}

/// Hashes a login password with a fresh random salt.
pub fn hash_password(password: &str, params: &KdfParams) -> CryptoResult<String> {
    if password.is_empty() {
        return Err(CryptoError::WeakInput("password must not be empty".into()));
    }

    let mut salt_bytes = [0u8; SALT_SIZE];
    rand::rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| CryptoError::KeyDerivation(format!("salt encoding failed: {e}")))?;

    let argon2 = params.to_argon2(None)?;
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CryptoError::KeyDerivation(format!("password hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Checks `password` against a stored PHC string.
///
/// Fails closed: a malformed or foreign hash is simply `false`.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Whether a stored hash was produced with parameters other than `params`
/// (or cannot be parsed at all). Callers rehash on the next successful login.
pub fn needs_rehash(stored_hash: &str, params: &KdfParams) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return true;
    };
    if parsed.algorithm.as_str() != "argon2id" {
        return true;
    }
    match Params::try_from(&parsed) {
        Ok(stored) => {
            stored.m_cost() != params.memory_cost_kib
                || stored.t_cost() != params.time_cost
                || stored.p_cost() != params.parallelism
        }
        Err(_) => true,
    }
}
