//! Registration and unlock.

use super::{now_millis, FieldVault};
use crate::error::{VaultError, VaultResult};
use duckdb::{params, Connection};
use tracing::{debug, info, warn};
use tresor_crypto::{
    check_password_strength, derive_master_key, generate_salt, hash_password, verify_password,
    MasterKey, Salt, SessionKeys, UserCredential,
};

impl FieldVault {
    /// Creates the credential row for a new user.
    ///
    /// The password must satisfy the configured policy. Only the Argon2id
    /// hash and a fresh salt are stored.
    pub fn register(&self, user_id: &str, password: &str) -> VaultResult<UserCredential> {
        if user_id.trim().is_empty() {
            return Err(VaultError::Config("user_id must not be empty".into()));
        }
        check_password_strength(password, &self.config.password_policy)?;
        if self.find_credential(user_id)?.is_some() {
            return Err(VaultError::AlreadyExists(user_id.to_string()));
        }

        let credential = UserCredential {
            user_id: user_id.to_string(),
            password_hash: hash_password(password, &self.config.kdf)?,
            salt: generate_salt(),
        };

        let conn = self.lock_conn();
        // Re-check under the lock: another registration may have won the race
        // while we were hashing.
        if load_credential(&conn, user_id)?.is_some() {
            return Err(VaultError::AlreadyExists(user_id.to_string()));
        }
        conn.execute(
            "INSERT INTO credentials (user_id, password_hash, salt, created_at, rotated_at)
             VALUES (?, ?, ?, ?, NULL)",
            params![
                credential.user_id,
                credential.password_hash,
                credential.salt.as_bytes().to_vec(),
                now_millis()
            ],
        )?;

        info!("registered user {user_id}");
        Ok(credential)
    }

    /// Stored credential of `user_id`.
    pub fn credential(&self, user_id: &str) -> VaultResult<UserCredential> {
        self.find_credential(user_id)?
            .ok_or_else(|| VaultError::UserNotFound(user_id.to_string()))
    }

    /// Checks the password and derives the user's master key.
    ///
    /// Unknown users and wrong passwords both give `InvalidCredentials`.
    pub fn unlock_master_key(&self, user_id: &str, password: &str) -> VaultResult<MasterKey> {
        let Some(credential) = self.find_credential(user_id)? else {
            warn!("unlock refused for user {user_id}");
            return Err(VaultError::InvalidCredentials);
        };
        if !verify_password(password, &credential.password_hash) {
            warn!("unlock refused for user {user_id}");
            return Err(VaultError::InvalidCredentials);
        }

        let master_key = derive_master_key(password, &credential.salt, &self.config.kdf)?;
        debug!("unlocked user {user_id}");
        Ok(master_key)
    }

    /// Checks the password and derives the session subkeys. The master key
    /// is dropped before returning.
    pub fn unlock(&self, user_id: &str, password: &str) -> VaultResult<SessionKeys> {
        let master_key = self.unlock_master_key(user_id, password)?;
        Ok(SessionKeys::derive(&master_key)?)
    }

    /// Created and last-rotated timestamps (ms since epoch).
    pub fn credential_timestamps(&self, user_id: &str) -> VaultResult<(i64, Option<i64>)> {
        let conn = self.lock_conn();
        let result = conn.query_row(
            "SELECT created_at, rotated_at FROM credentials WHERE user_id = ?",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );
        match result {
            Ok(timestamps) => Ok(timestamps),
            Err(duckdb::Error::QueryReturnedNoRows) => {
                Err(VaultError::UserNotFound(user_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn find_credential(&self, user_id: &str) -> VaultResult<Option<UserCredential>> {
        let conn = self.lock_conn();
        load_credential(&conn, user_id)
    }
}

pub(super) fn load_credential(conn: &Connection, user_id: &str) -> VaultResult<Option<UserCredential>> {
    let result = conn.query_row(
        "SELECT user_id, password_hash, salt FROM credentials WHERE user_id = ?",
        params![user_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        },
    );

    match result {
        Ok((user_id, password_hash, salt)) => {
            let salt = Salt::from_slice(&salt)
                .map_err(|_| VaultError::Storage(format!("invalid salt length for user {user_id}")))?;
            Ok(Some(UserCredential {
                user_id,
                password_hash,
                salt,
            }))
        }
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
