//! DDL and schema helpers for the vault database.

use crate::error::{VaultError, VaultResult};
use duckdb::{params, Connection};
use tresor_crypto::KdfParams;

/// Vault-wide settings that must not change once data exists.
const VAULT_META_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS vault_meta (
    key VARCHAR PRIMARY KEY,
    value VARCHAR NOT NULL
);
"#;

/// One row per user: login hash and master key salt.
const CREDENTIALS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    user_id VARCHAR PRIMARY KEY,
    password_hash VARCHAR NOT NULL,
    salt BLOB NOT NULL,
    created_at BIGINT NOT NULL,
    rotated_at BIGINT
);
"#;

/// One row per encrypted column of a record.
const SEALED_FIELDS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sealed_fields (
    user_id VARCHAR NOT NULL,
    record_id VARCHAR NOT NULL,
    field VARCHAR NOT NULL,
    encrypted VARCHAR NOT NULL,
    blind_index VARCHAR,
    normalization VARCHAR,
    modified_at BIGINT NOT NULL,
    PRIMARY KEY (user_id, record_id, field)
);
"#;

const KDF_PARAMS_KEY: &str = "kdf_params";

/// Creates missing tables and pins the KDF parameters.
///
/// Master keys are derived with the parameters in effect when the data was
/// written, so a database created with one set refuses to open with another.
pub(crate) fn initialize_vault_schema(conn: &Connection, kdf: &KdfParams) -> VaultResult<()> {
    conn.execute_batch(VAULT_META_DDL)?;
    conn.execute_batch(CREDENTIALS_DDL)?;
    conn.execute_batch(SEALED_FIELDS_DDL)?;

    let configured = serde_json::to_string(kdf).map_err(|e| VaultError::Config(e.to_string()))?;
    let stored: Result<String, _> = conn.query_row(
        "SELECT value FROM vault_meta WHERE key = ?",
        params![KDF_PARAMS_KEY],
        |row| row.get(0),
    );

    match stored {
        Ok(stored) => {
            let pinned: KdfParams = serde_json::from_str(&stored)
                .map_err(|e| VaultError::Storage(format!("corrupt kdf_params: {e}")))?;
            if pinned != *kdf {
                return Err(VaultError::Config(format!(
                    "database was created with kdf parameters {pinned:?}, configured {kdf:?}"
                )));
            }
            Ok(())
        }
        Err(duckdb::Error::QueryReturnedNoRows) => {
            conn.execute(
                "INSERT INTO vault_meta (key, value) VALUES (?, ?)",
                params![KDF_PARAMS_KEY, configured],
            )?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
