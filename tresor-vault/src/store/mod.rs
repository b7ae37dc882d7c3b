//! DuckDB-backed field vault.
//!
//! Holds login credentials and sealed columns. The vault never sees a
//! plaintext value it did not just encrypt or decrypt for the caller, and
//! never persists a master key or subkey.

mod credentials;
mod fields;
mod rotation;
pub(crate) mod schema;

use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::locks::RotationLocks;
use duckdb::Connection;
use schema::initialize_vault_schema;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use tresor_crypto::Normalization;

/// Thread-safe credential and sealed-field store.
#[derive(Clone)]
pub struct FieldVault {
    conn: Arc<Mutex<Connection>>,
    config: VaultConfig,
    locks: RotationLocks,
}

impl FieldVault {
    /// Opens (or creates) the database at `config.db_path`.
    ///
    /// A `db_path` of `:memory:` behaves like [`open_in_memory`](Self::open_in_memory).
    pub fn open(config: &VaultConfig) -> VaultResult<Self> {
        config.validate()?;
        if config.is_in_memory() {
            return Self::open_in_memory(config);
        }

        let conn = Connection::open(&config.db_path)?;
        // DuckDB defaults to most of the RAM and every core.
        conn.execute_batch(&format!(
            "PRAGMA memory_limit='{}'; PRAGMA threads={};",
            config.memory_limit.trim(),
            config.threads
        ))?;
        debug!("opened vault database at {}", config.db_path.display());
        Self::with_connection(conn, config)
    }

    /// Opens a private in-memory database. Resource limits are not applied.
    pub fn open_in_memory(config: &VaultConfig) -> VaultResult<Self> {
        config.validate()?;
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, config)
    }

    fn with_connection(conn: Connection, config: &VaultConfig) -> VaultResult<Self> {
        initialize_vault_schema(&conn, &config.kdf)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config: config.clone(),
            locks: RotationLocks::new(),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Rotation locks shared by every clone of this vault.
    pub fn rotation_locks(&self) -> &RotationLocks {
        &self.locks
    }

    /// Writes pending changes to the database file.
    pub fn checkpoint(&self) -> VaultResult<()> {
        let conn = self.lock_conn();
        conn.execute_batch("CHECKPOINT")?;
        Ok(())
    }

    /// Acquire the connection lock, recovering from poison left by a
    /// panicking holder.
    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("vault connection mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn ensure_not_rotating(&self, user_id: &str) -> VaultResult<()> {
        if self.locks.is_locked(user_id) {
            return Err(VaultError::RotationInProgress(user_id.to_string()));
        }
        Ok(())
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn normalization_to_sql(normalization: Normalization) -> &'static str {
    match normalization {
        Normalization::Exact => "exact",
        Normalization::CaseInsensitive => "case_insensitive",
    }
}

pub(crate) fn normalization_from_sql(value: &str) -> VaultResult<Normalization> {
    match value {
        "exact" => Ok(Normalization::Exact),
        "case_insensitive" => Ok(Normalization::CaseInsensitive),
        other => Err(VaultError::Storage(format!("unknown normalization {other:?}"))),
    }
}
