//! Key derivation.
//!
//! Two stages:
//!
//! 1. `derive_master_key`: Argon2id over (password, salt). Memory-hard and
//!    slow on purpose, the same family used for login hashes so a stolen salt
//!    is as expensive to attack as a stolen password hash.
//! 2. `derive_subkey`: HKDF-SHA256 over the master key with a purpose label.
//!    Distinct labels give independent keys, so an `IndexKey` can be handed
//!    to a search path without exposing anything about the `DataKey`.
//!
//! # Entropy assumption
//!
//! The core only rejects empty and whitespace-only passwords. It assumes the
//! registration flow has already enforced a `PasswordPolicy` (at least
//! `PasswordPolicy::default().min_length` characters). Once a salt leaks,
//! the Argon2id cost in `KdfParams` is the only thing slowing down offline
//! guessing.

use crate::error::{CryptoError, CryptoResult};
use crate::salt::Salt;
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every key handled by the core (256 bits).
pub const KEY_SIZE: usize = 32;

/// HKDF label of the key used by the cipher engine.
pub const DATA_ENCRYPTION_LABEL: &str = "data-encryption";

/// HKDF label of the key used by the blind index engine.
pub const BLIND_INDEX_LABEL: &str = "blind-index";

/// Fixed HKDF extract salt. Domain-separates this scheme from any other use
/// of the same master key.
const SUBKEY_DOMAIN: &[u8] = b"tresor-subkey-v1";

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost_kib: u32,
    /// Number of passes.
    pub time_cost: u32,
    /// Degree of parallelism (lanes).
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// Interactive profile: a few hundred milliseconds on a desktop CPU.
    fn default() -> Self {
        Self {
            memory_cost_kib: 64 * 1024, // 64 MiB
            time_cost: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal-cost profile for test suites. Never use in production.
    pub fn for_testing() -> Self {
        Self {
            memory_cost_kib: 256,
            time_cost: 1,
            parallelism: 1,
        }
    }

    pub(crate) fn to_argon2(self, output_len: Option<usize>) -> CryptoResult<Argon2<'static>> {
        let params = Params::new(
            self.memory_cost_kib,
            self.time_cost,
            self.parallelism,
            output_len,
        )
        .map_err(|e| CryptoError::KeyDerivation(format!("invalid argon2 parameters: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Per-user root secret. Lives for one authenticated session, never stored.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    /// Rebuilds a master key handed over by the session layer.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// A purpose-scoped key expanded from a `MasterKey`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedSubkey([u8; KEY_SIZE]);

impl DerivedSubkey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for DerivedSubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedSubkey([REDACTED])")
    }
}

/// Derives the master key from a password and the user's salt.
///
/// Deterministic: the same inputs always yield the same key. CPU and memory
/// heavy; run it off latency-sensitive threads.
pub fn derive_master_key(
    password: &str,
    salt: &Salt,
    params: &KdfParams,
) -> CryptoResult<MasterKey> {
    if password.trim().is_empty() {
        return Err(CryptoError::WeakInput(
            "password must not be empty or whitespace".into(),
        ));
    }

    let argon2 = params.to_argon2(Some(KEY_SIZE))?;
    let mut output = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = MasterKey(output);
    output.zeroize();
    Ok(key)
}

/// Expands a subkey for `label`, optionally narrowed by a per-record
/// `context`.
///
/// HKDF-SHA256 with a fixed extract salt; `info` is the label, followed by a
/// NUL separator and the context when one is given. Labels must be non-empty
/// ASCII without NUL bytes so the encoding stays unambiguous.
pub fn derive_subkey(
    master_key: &MasterKey,
    label: &str,
    context: Option<&[u8]>,
) -> CryptoResult<DerivedSubkey> {
    if label.is_empty() || !label.is_ascii() || label.contains('\0') {
        return Err(CryptoError::KeyDerivation(
            "subkey label must be non-empty ASCII".into(),
        ));
    }

    expand_subkey(master_key.as_bytes(), label, context)
}

fn expand_subkey(
    ikm: &[u8; KEY_SIZE],
    label: &str,
    context: Option<&[u8]>,
) -> CryptoResult<DerivedSubkey> {
    let mut info = Vec::with_capacity(label.len() + 1 + context.map_or(0, <[u8]>::len));
    info.extend_from_slice(label.as_bytes());
    if let Some(ctx) = context {
        info.push(0);
        info.extend_from_slice(ctx);
    }

    let hk = Hkdf::<Sha256>::new(Some(SUBKEY_DOMAIN), ikm);
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(&info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = DerivedSubkey(okm);
    okm.zeroize();
    Ok(key)
}

/// Key for the symmetric cipher engine.
#[derive(Clone, Debug)]
pub struct DataKey(DerivedSubkey);

impl DataKey {
    pub fn derive(master_key: &MasterKey) -> CryptoResult<Self> {
        derive_subkey(master_key, DATA_ENCRYPTION_LABEL, None).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        self.0.as_bytes()
    }
}

/// Key for the blind index engine.
#[derive(Clone, Debug)]
pub struct IndexKey(DerivedSubkey);

impl IndexKey {
    pub fn derive(master_key: &MasterKey) -> CryptoResult<Self> {
        derive_subkey(master_key, BLIND_INDEX_LABEL, None).map(Self)
    }

    /// Index key narrowed to a single column. Equal values in two columns
    /// get unrelated indexes, so the index table does not reveal that two
    /// columns hold the same value.
    ///
    /// HKDF-SHA256 over this key with info `"blind-index" || 0x00 || column`.
    pub fn for_column(&self, column: &str) -> CryptoResult<Self> {
        expand_subkey(self.as_bytes(), BLIND_INDEX_LABEL, Some(column.as_bytes())).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        self.0.as_bytes()
    }
}

/// Both subkeys of one master key, as held for a session.
#[derive(Clone, Debug)]
pub struct SessionKeys {
    pub data: DataKey,
    pub index: IndexKey,
}

impl SessionKeys {
    pub fn derive(master_key: &MasterKey) -> CryptoResult<Self> {
        Ok(Self {
            data: DataKey::derive(master_key)?,
            index: IndexKey::derive(master_key)?,
        })
    }

    /// Convenience for the login path: password + salt straight to subkeys.
    /// The intermediate master key is dropped (and zeroized) on return.
    pub fn from_password(password: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<Self> {
        let master_key = derive_master_key(password, salt, params)?;
        Self::derive(&master_key)
    }
}
