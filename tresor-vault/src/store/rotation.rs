//! Password change with full re-encryption, committed in one transaction.

use super::credentials::load_credential;
use super::fields::load_fields;
use super::{normalization_to_sql, now_millis, FieldVault};
use crate::error::{VaultError, VaultResult};
use duckdb::{params, Connection};
use std::collections::HashMap;
use tracing::{info, warn};
use tresor_crypto::{
    rotate_keys, CryptoError, RotationCancel, RotationCommit, RotationOptions, RotationReport,
    RotationRequest, StagedRotation, StoredField,
};

impl FieldVault {
    /// Changes the password of `user_id` and re-encrypts every sealed field.
    ///
    /// Only one rotation per user runs at a time; a second call gets
    /// `RotationInProgress`. On any failure the database is left exactly as
    /// it was and the old password keeps working.
    pub fn rotate(
        &self,
        user_id: &str,
        old_password: &str,
        new_password: &str,
        cancel: RotationCancel,
    ) -> VaultResult<RotationReport> {
        let _guard = self.locks.try_acquire(user_id)?;

        let (credential, records) = {
            let conn = self.lock_conn();
            let Some(credential) = load_credential(&conn, user_id)? else {
                return Err(VaultError::InvalidCredentials);
            };
            (credential, load_fields(&conn, user_id)?)
        };

        let mut committer = VaultCommit {
            vault: self,
            expected_hash: credential.password_hash.clone(),
            snapshot: records
                .iter()
                .map(|r| ((r.record_id.clone(), r.field.clone()), r.sealed.encrypted.clone()))
                .collect(),
        };
        let options = RotationOptions {
            kdf: self.config.kdf,
            policy: self.config.password_policy,
            cancel,
        };
        let request = RotationRequest::new(&credential, old_password, new_password);

        match rotate_keys(&request, records, &mut committer, &options) {
            Ok(report) => Ok(report),
            Err(CryptoError::AuthenticationFailed) => {
                warn!("rotation refused for user {user_id}: wrong password");
                Err(VaultError::InvalidCredentials)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Writes a staged rotation inside a single DuckDB transaction.
///
/// Each row is updated only if it still holds the ciphertext that was read
/// before re-encryption, and the credential only if its hash is unchanged.
/// Any mismatch rolls the whole transaction back.
struct VaultCommit<'a> {
    vault: &'a FieldVault,
    expected_hash: String,
    snapshot: HashMap<(String, String), String>,
}

impl RotationCommit for VaultCommit<'_> {
    type Error = VaultError;

    fn commit(&mut self, staged: StagedRotation) -> VaultResult<()> {
        let conn = self.vault.lock_conn();

        conn.execute_batch("BEGIN TRANSACTION")?;
        if let Err(e) = self.write(&conn, &staged) {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
        if let Err(e) = conn.execute_batch("COMMIT") {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }

        info!(
            "committed rotation for user {} ({} fields)",
            staged.user_id,
            staged.records.len()
        );
        Ok(())
    }
}

impl VaultCommit<'_> {
    fn write(&self, conn: &Connection, staged: &StagedRotation) -> VaultResult<()> {
        let user_id = staged.user_id.as_str();
        let now = now_millis();

        let live: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sealed_fields WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        if live as usize != self.snapshot.len() || staged.records.len() != self.snapshot.len() {
            return Err(conflict(user_id, "field set changed"));
        }

        for record in &staged.records {
            self.update_field(conn, user_id, record, now)?;
        }

        let updated = conn.execute(
            "UPDATE credentials SET password_hash = ?, salt = ?, rotated_at = ?
             WHERE user_id = ? AND password_hash = ?",
            params![
                staged.new_password_hash,
                staged.new_salt.as_bytes().to_vec(),
                now,
                user_id,
                self.expected_hash
            ],
        )?;
        if updated != 1 {
            return Err(conflict(user_id, "credential changed"));
        }
        Ok(())
    }

    fn update_field(
        &self,
        conn: &Connection,
        user_id: &str,
        record: &StoredField,
        now: i64,
    ) -> VaultResult<()> {
        let key = (record.record_id.clone(), record.field.clone());
        let Some(previous) = self.snapshot.get(&key) else {
            return Err(conflict(user_id, "unexpected field in staged rotation"));
        };

        let updated = conn.execute(
            "UPDATE sealed_fields
             SET encrypted = ?, blind_index = ?, normalization = ?, modified_at = ?
             WHERE user_id = ? AND record_id = ? AND field = ? AND encrypted = ?",
            params![
                record.sealed.encrypted,
                record.sealed.blind_index,
                record.sealed.normalization.map(normalization_to_sql),
                now,
                user_id,
                record.record_id,
                record.field,
                previous
            ],
        )?;
        if updated != 1 {
            return Err(conflict(
                user_id,
                &format!("field {}.{} changed", record.record_id, record.field),
            ));
        }
        Ok(())
    }
}

fn conflict(user_id: &str, what: &str) -> VaultError {
    VaultError::Storage(format!(
        "concurrent modification during rotation for user {user_id}: {what}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VaultConfig;
    use tresor_crypto::{
        hash_password, open_field, seal_field, verify_password, KdfParams, Normalization, Salt,
        SessionKeys,
    };

    const OLD: &str = "OldPass1!";
    const NEW: &str = "NewPass2!";

    fn seeded(n: usize) -> (FieldVault, SessionKeys) {
        let vault = FieldVault::open_in_memory(&VaultConfig::for_testing()).unwrap();
        vault.register("alice", OLD).unwrap();
        let keys = vault.unlock("alice", OLD).unwrap();
        for i in 0..n {
            vault
                .put_field(
                    &keys,
                    "alice",
                    &format!("acc-{i}"),
                    "iban",
                    &format!("FR76300010079412345678{i:05}"),
                    Some(Normalization::Exact),
                )
                .unwrap();
        }
        (vault, keys)
    }

    fn commit_for(vault: &FieldVault) -> VaultCommit<'_> {
        let credential = vault.credential("alice").unwrap();
        VaultCommit {
            vault,
            expected_hash: credential.password_hash,
            snapshot: vault
                .fields_for_user("alice")
                .unwrap()
                .into_iter()
                .map(|r| ((r.record_id, r.field), r.sealed.encrypted))
                .collect(),
        }
    }

    fn staged_for(vault: &FieldVault, new_keys: &SessionKeys) -> StagedRotation {
        let records = vault
            .fields_for_user("alice")
            .unwrap()
            .into_iter()
            .map(|r| StoredField {
                sealed: seal_field(new_keys, &r.field, "re-encrypted", Some(Normalization::Exact)).unwrap(),
                ..r
            })
            .collect();
        StagedRotation {
            user_id: "alice".into(),
            new_salt: Salt::random(),
            new_password_hash: hash_password(NEW, &KdfParams::for_testing()).unwrap(),
            records,
        }
    }

    #[test]
    fn conflicting_row_rolls_back_earlier_updates() {
        let (vault, keys) = seeded(4);
        let before = vault.fields_for_user("alice").unwrap();
        let credential = vault.credential("alice").unwrap();

        let mut committer = commit_for(&vault);
        // The last row changes after the snapshot was taken.
        committer
            .snapshot
            .insert(("acc-3".into(), "iban".into()), "stale".into());

        let new_keys = SessionKeys::derive(&tresor_crypto::MasterKey::from_bytes(fixed_key())).unwrap();
        let err = committer.commit(staged_for(&vault, &new_keys)).unwrap_err();
        assert!(err.to_string().contains("acc-3.iban"), "{err}");

        assert_eq!(vault.fields_for_user("alice").unwrap(), before);
        assert_eq!(vault.credential("alice").unwrap(), credential);
        assert_eq!(
            vault.open_field(&keys, "alice", "acc-0", "iban").unwrap(),
            "FR7630001007941234567800000"
        );
    }

    #[test]
    fn changed_credential_rolls_back_field_updates() {
        let (vault, _keys) = seeded(2);
        let before = vault.fields_for_user("alice").unwrap();

        let mut committer = commit_for(&vault);
        committer.expected_hash = "$argon2id$stale".into();

        let new_keys = SessionKeys::derive(&tresor_crypto::MasterKey::from_bytes(fixed_key())).unwrap();
        assert!(committer.commit(staged_for(&vault, &new_keys)).is_err());
        assert_eq!(vault.fields_for_user("alice").unwrap(), before);
        assert!(verify_password(OLD, &vault.credential("alice").unwrap().password_hash));
    }

    #[test]
    fn tampered_row_aborts_rotation_and_keeps_old_state() {
        let (vault, keys) = seeded(3);
        {
            let conn = vault.lock_conn();
            conn.execute(
                "UPDATE sealed_fields SET encrypted = ? WHERE record_id = 'acc-1'",
                params![tresor_crypto::encrypt_string(&keys.data, "no aad").unwrap()],
            )
            .unwrap();
        }
        let before = vault.fields_for_user("alice").unwrap();
        let credential = vault.credential("alice").unwrap();

        let err = vault.rotate("alice", OLD, NEW, RotationCancel::new()).unwrap_err();
        assert!(matches!(err, VaultError::Crypto(CryptoError::RotationAborted(_))));

        assert_eq!(vault.credential("alice").unwrap(), credential);
        assert_eq!(vault.fields_for_user("alice").unwrap(), before);
        assert!(vault.unlock("alice", OLD).is_ok());
        assert!(matches!(vault.unlock("alice", NEW), Err(VaultError::InvalidCredentials)));
        assert!(!vault.rotation_locks().is_locked("alice"));
    }

    #[test]
    fn successful_rotation_records_timestamp() {
        let (vault, _keys) = seeded(2);
        let report = vault.rotate("alice", OLD, NEW, RotationCancel::new()).unwrap();
        assert_eq!(report.records_reencrypted, 2);

        let (_, rotated_at) = vault.credential_timestamps("alice").unwrap();
        assert!(rotated_at.is_some());

        let keys = vault.unlock("alice", NEW).unwrap();
        let record = &vault.fields_for_user("alice").unwrap()[1];
        assert_eq!(
            open_field(&keys, &record.field, &record.sealed).unwrap(),
            "FR7630001007941234567800001"
        );
    }

    fn fixed_key() -> [u8; 32] {
        [0x42; 32]
    }
}
