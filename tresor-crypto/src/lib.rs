//! Zero-knowledge field encryption core for Tresor.
//!
//! Sensitive columns (IBANs, balances, notes, tickers) are encrypted before
//! they reach storage, with keys that only ever exist in the memory of an
//! authenticated session:
//! - Argon2id for login password hashes and for the per-user Master Key
//! - HKDF-SHA256 for purpose-scoped subkeys (Data Key, Index Key)
//! - ChaCha20-Poly1305 for authenticated field encryption
//! - HMAC-SHA256 blind indexes for equality search over encrypted columns
//! - Staged, all-or-nothing re-encryption when the password changes
//!
//! # Key hierarchy
//!
//! ```text
//! password + salt --Argon2id--> MasterKey --HKDF("data-encryption")--> DataKey
//!                                         \-HKDF("blind-index")-----> IndexKey
//!
//! IndexKey --HKDF("blind-index" || 0x00 || column)--> per-column index key
//! ```
//!
//! The core holds no state: every call receives the key it needs. The
//! Master Key is never persisted; the session layer keeps it for the length
//! of a session. Secret material is zeroized on drop and redacted from
//! `Debug` output.
//!
//! All functions are safe to call from many threads at once. Randomness
//! comes from the thread-local, OS-seeded CSPRNG. `hash_password`,
//! `derive_master_key` and `rotate_keys` are deliberately slow; run them off
//! latency-sensitive threads.

pub mod blind_index;
pub mod cipher;
mod error;
pub mod field;
pub mod key;
pub mod password;
pub mod rotation;
pub mod salt;

pub use blind_index::{
    compute_blind_index, compute_blind_index_with, verify_blind_index, BlindIndex, Normalization,
    BLIND_INDEX_SIZE,
};
pub use cipher::{
    decrypt, decrypt_string, decrypt_with_aad, encrypt, encrypt_string, encrypt_with_aad,
    EncryptedValue, FORMAT_VERSION, NONCE_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use field::{field_blind_index, open_field, seal_field, SealedField};
pub use key::{
    derive_master_key, derive_subkey, DataKey, DerivedSubkey, IndexKey, KdfParams, MasterKey,
    SessionKeys, BLIND_INDEX_LABEL, DATA_ENCRYPTION_LABEL, KEY_SIZE,
};
pub use password::{
    check_password_strength, hash_password, needs_rehash, verify_password, PasswordPolicy,
};
pub use rotation::{
    rotate_keys, RotationCancel, RotationCommit, RotationOptions, RotationReport,
    RotationRequest, RotationState, StagedRotation, StoredField, UserCredential,
};
pub use salt::{generate_salt, Salt, SALT_SIZE};
