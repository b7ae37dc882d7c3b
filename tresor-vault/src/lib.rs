//! Credential and sealed-field vault for Tresor, backed by DuckDB.
//!
//! Persists what `tresor-crypto` leaves to its caller: the per-user login
//! hash and master key salt, and the encrypted columns with their blind
//! indexes. Keys are passed in by the caller for each operation and are
//! never written to the database.
//!
//! - [`FieldVault`]: synchronous store, one shared connection
//! - [`KeyService`]: async wrapper that keeps Argon2id off the runtime
//! - [`RotationLocks`]: one password change per user at a time
//!
//! A password change re-encrypts every field of the user and swaps the new
//! salt, hash and ciphertexts in a single transaction.

mod config;
mod error;
mod locks;
mod service;
mod store;

pub use config::{VaultConfig, IN_MEMORY, MAX_KDF_PARALLELISM};
pub use error::{VaultError, VaultResult};
pub use locks::{RotationGuard, RotationLocks};
pub use service::KeyService;
pub use store::FieldVault;
