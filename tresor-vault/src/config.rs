//! Vault configuration.

use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tresor_crypto::{KdfParams, PasswordPolicy};

/// Path value that selects an in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Largest lane count Argon2 accepts (2^24 - 1).
pub const MAX_KDF_PARALLELISM: u32 = 0x00FF_FFFF;

/// Configuration for a [`FieldVault`](crate::FieldVault).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// DuckDB file, or `:memory:`.
    pub db_path: PathBuf,

    /// DuckDB `memory_limit`, e.g. "64MB". Applied to file databases only.
    pub memory_limit: String,

    /// DuckDB worker threads. Applied to file databases only.
    pub threads: u32,

    /// Argon2id cost for login hashes and master keys.
    pub kdf: KdfParams,

    /// Minimum requirements for new passwords.
    pub password_policy: PasswordPolicy,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("tresor.duckdb"),
            memory_limit: "64MB".to_string(),
            threads: 1,
            kdf: KdfParams::default(),
            password_policy: PasswordPolicy::default(),
        }
    }
}

impl VaultConfig {
    /// In-memory database with cheap KDF settings.
    pub fn for_testing() -> Self {
        Self {
            db_path: PathBuf::from(IN_MEMORY),
            kdf: KdfParams::for_testing(),
            ..Self::default()
        }
    }

    /// Same as [`for_testing`](Self::for_testing) but backed by a file.
    pub fn for_testing_at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::for_testing()
        }
    }

    /// Loads a config from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> VaultResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| VaultError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path.as_os_str() == IN_MEMORY
    }

    /// Rejects settings DuckDB or Argon2id would refuse later.
    pub fn validate(&self) -> VaultResult<()> {
        if self.threads == 0 {
            return Err(VaultError::Config("threads must be at least 1".into()));
        }
        let limit = self.memory_limit.trim();
        if limit.is_empty() || !limit.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(VaultError::Config(format!(
                "invalid memory_limit {:?}",
                self.memory_limit
            )));
        }
        if self.kdf.time_cost == 0 || self.kdf.parallelism == 0 {
            return Err(VaultError::Config(
                "kdf time_cost and parallelism must be at least 1".into(),
            ));
        }
        if self.kdf.parallelism > MAX_KDF_PARALLELISM {
            return Err(VaultError::Config(format!(
                "kdf parallelism must be at most {MAX_KDF_PARALLELISM}"
            )));
        }
        if u64::from(self.kdf.memory_cost_kib) < 8 * u64::from(self.kdf.parallelism) {
            return Err(VaultError::Config(
                "kdf memory_cost_kib must be at least 8 * parallelism".into(),
            ));
        }
        if self.password_policy.min_length == 0 {
            return Err(VaultError::Config("password_policy.min_length must be at least 1".into()));
        }
        Ok(())
    }
}
