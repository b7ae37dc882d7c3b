//! Sealed column storage and equality search.

use super::{normalization_from_sql, normalization_to_sql, now_millis, FieldVault};
use crate::error::{VaultError, VaultResult};
use duckdb::{params, Connection};
use tracing::debug;
use tresor_crypto::{
    field_blind_index, seal_field, Normalization, SealedField, SessionKeys, StoredField,
};

type FieldRow = (String, String, String, Option<String>, Option<String>);

impl FieldVault {
    /// Encrypts `plaintext` and stores it as `record_id.field` of `user_id`,
    /// replacing any previous value. With `searchable` set, the blind index
    /// is stored alongside.
    pub fn put_field(
        &self,
        keys: &SessionKeys,
        user_id: &str,
        record_id: &str,
        field: &str,
        plaintext: &str,
        searchable: Option<Normalization>,
    ) -> VaultResult<()> {
        self.ensure_not_rotating(user_id)?;
        let sealed = seal_field(keys, field, plaintext, searchable)?;

        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR REPLACE INTO sealed_fields
                (user_id, record_id, field, encrypted, blind_index, normalization, modified_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                user_id,
                record_id,
                field,
                sealed.encrypted,
                sealed.blind_index,
                sealed.normalization.map(normalization_to_sql),
                now_millis()
            ],
        )?;
        debug!("stored field {record_id}.{field} for user {user_id}");
        Ok(())
    }

    /// Sealed value of `record_id.field`, still encrypted.
    pub fn get_field(&self, user_id: &str, record_id: &str, field: &str) -> VaultResult<SealedField> {
        let conn = self.lock_conn();
        let result = conn.query_row(
            "SELECT record_id, field, encrypted, blind_index, normalization
             FROM sealed_fields WHERE user_id = ? AND record_id = ? AND field = ?",
            params![user_id, record_id, field],
            read_row,
        );
        match result {
            Ok(row) => Ok(stored_field(row)?.sealed),
            Err(duckdb::Error::QueryReturnedNoRows) => Err(VaultError::FieldNotFound {
                record_id: record_id.to_string(),
                field: field.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Decrypted value of `record_id.field`.
    pub fn open_field(
        &self,
        keys: &SessionKeys,
        user_id: &str,
        record_id: &str,
        field: &str,
    ) -> VaultResult<String> {
        let sealed = self.get_field(user_id, record_id, field)?;
        Ok(tresor_crypto::open_field(keys, field, &sealed)?)
    }

    /// Records of `user_id` whose searchable `field` equals `value` under
    /// `normalization`. Nothing is decrypted.
    pub fn find_records_by_index(
        &self,
        keys: &SessionKeys,
        user_id: &str,
        field: &str,
        value: &str,
        normalization: Normalization,
    ) -> VaultResult<Vec<String>> {
        let needle = field_blind_index(keys, field, value, normalization)?.to_base64();

        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT record_id FROM sealed_fields
             WHERE user_id = ? AND field = ? AND blind_index = ? AND normalization = ?
             ORDER BY record_id",
        )?;
        let ids = stmt
            .query_map(
                params![user_id, field, needle, normalization_to_sql(normalization)],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Removes every field of `record_id`. Returns the number of fields removed.
    pub fn delete_record(&self, user_id: &str, record_id: &str) -> VaultResult<usize> {
        self.ensure_not_rotating(user_id)?;
        let conn = self.lock_conn();
        let affected = conn.execute(
            "DELETE FROM sealed_fields WHERE user_id = ? AND record_id = ?",
            params![user_id, record_id],
        )?;
        debug!("deleted {affected} fields of record {record_id} for user {user_id}");
        Ok(affected)
    }

    /// Every sealed field of `user_id`, ordered by record then field.
    pub fn fields_for_user(&self, user_id: &str) -> VaultResult<Vec<StoredField>> {
        let conn = self.lock_conn();
        load_fields(&conn, user_id)
    }
}

pub(super) fn load_fields(conn: &Connection, user_id: &str) -> VaultResult<Vec<StoredField>> {
    let mut stmt = conn.prepare(
        "SELECT record_id, field, encrypted, blind_index, normalization
         FROM sealed_fields WHERE user_id = ? ORDER BY record_id, field",
    )?;
    let rows = stmt
        .query_map(params![user_id], read_row)?
        .collect::<Result<Vec<FieldRow>, _>>()?;
    rows.into_iter().map(stored_field).collect()
}

fn read_row(row: &duckdb::Row<'_>) -> duckdb::Result<FieldRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn stored_field(
    (record_id, field, encrypted, blind_index, normalization): FieldRow,
) -> VaultResult<StoredField> {
    let normalization = normalization.as_deref().map(normalization_from_sql).transpose()?;
    Ok(StoredField {
        record_id,
        field,
        sealed: SealedField {
            encrypted,
            blind_index,
            normalization,
        },
    })
}

#[cfg(test)]
mod tests {
    use crate::{FieldVault, VaultConfig, VaultError};
    use tresor_crypto::{CryptoError, Normalization, SessionKeys};

    fn unlocked() -> (FieldVault, SessionKeys) {
        let vault = FieldVault::open_in_memory(&VaultConfig::for_testing()).unwrap();
        vault.register("alice", "Secr3t!Pass").unwrap();
        let keys = vault.unlock("alice", "Secr3t!Pass").unwrap();
        (vault, keys)
    }

    #[test]
    fn stored_value_is_ciphertext() {
        let (vault, keys) = unlocked();
        vault
            .put_field(&keys, "alice", "acc-1", "iban", "FR7630001007941234567890185", Some(Normalization::Exact))
            .unwrap();

        let sealed = vault.get_field("alice", "acc-1", "iban").unwrap();
        assert!(!sealed.encrypted.contains("FR76"));
        assert!(sealed.is_searchable());
        assert_eq!(sealed.normalization, Some(Normalization::Exact));
        assert_eq!(
            vault.open_field(&keys, "alice", "acc-1", "iban").unwrap(),
            "FR7630001007941234567890185"
        );
    }

    #[test]
    fn put_replaces_previous_value() {
        let (vault, keys) = unlocked();
        vault.put_field(&keys, "alice", "acc-1", "balance", "100.00", None).unwrap();
        vault.put_field(&keys, "alice", "acc-1", "balance", "250.00", None).unwrap();
        assert_eq!(vault.open_field(&keys, "alice", "acc-1", "balance").unwrap(), "250.00");
        assert_eq!(vault.fields_for_user("alice").unwrap().len(), 1);
    }

    #[test]
    fn missing_field_is_reported() {
        let (vault, keys) = unlocked();
        assert!(matches!(
            vault.open_field(&keys, "alice", "acc-1", "iban"),
            Err(VaultError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn other_users_keys_cannot_open() {
        let (vault, keys) = unlocked();
        vault.register("bob", "B0bs!Secret").unwrap();
        let bob = vault.unlock("bob", "B0bs!Secret").unwrap();

        vault.put_field(&keys, "alice", "acc-1", "note", "private", None).unwrap();
        assert!(matches!(
            vault.open_field(&bob, "alice", "acc-1", "note"),
            Err(VaultError::Crypto(CryptoError::AuthenticationFailed))
        ));
    }

    #[test]
    fn search_respects_normalization_and_user() {
        let (vault, keys) = unlocked();
        vault
            .put_field(&keys, "alice", "c-1", "email", "Alice@Example.com", Some(Normalization::CaseInsensitive))
            .unwrap();
        vault
            .put_field(&keys, "alice", "c-2", "email", "bob@example.com", Some(Normalization::CaseInsensitive))
            .unwrap();

        let hits = vault
            .find_records_by_index(&keys, "alice", "email", "alice@example.COM", Normalization::CaseInsensitive)
            .unwrap();
        assert_eq!(hits, vec!["c-1".to_string()]);

        let exact = vault
            .find_records_by_index(&keys, "alice", "email", "Alice@Example.com", Normalization::Exact)
            .unwrap();
        assert!(exact.is_empty());

        let elsewhere = vault
            .find_records_by_index(&keys, "bob", "email", "alice@example.com", Normalization::CaseInsensitive)
            .unwrap();
        assert!(elsewhere.is_empty());
    }

    #[test]
    fn equal_values_in_two_columns_do_not_share_an_index() {
        let (vault, keys) = unlocked();
        let value = "FR7630001007941234567890185";
        vault.put_field(&keys, "alice", "acc-1", "iban", value, Some(Normalization::Exact)).unwrap();
        vault.put_field(&keys, "alice", "acc-1", "note", value, Some(Normalization::Exact)).unwrap();

        let iban = vault.get_field("alice", "acc-1", "iban").unwrap();
        let note = vault.get_field("alice", "acc-1", "note").unwrap();
        assert_ne!(iban.blind_index, note.blind_index);

        let hits = vault
            .find_records_by_index(&keys, "alice", "note", value, Normalization::Exact)
            .unwrap();
        assert_eq!(hits, vec!["acc-1".to_string()]);
    }

    #[test]
    fn delete_record_removes_all_its_fields() {
        let (vault, keys) = unlocked();
        vault.put_field(&keys, "alice", "acc-1", "iban", "FR76", None).unwrap();
        vault.put_field(&keys, "alice", "acc-1", "note", "n", None).unwrap();
        vault.put_field(&keys, "alice", "acc-2", "note", "n", None).unwrap();

        assert_eq!(vault.delete_record("alice", "acc-1").unwrap(), 2);
        assert_eq!(vault.delete_record("alice", "acc-1").unwrap(), 0);
        let left: Vec<_> = vault
            .fields_for_user("alice")
            .unwrap()
            .into_iter()
            .map(|f| f.record_id)
            .collect();
        assert_eq!(left, vec!["acc-2".to_string()]);
    }

    #[test]
    fn writes_refused_while_rotating() {
        let (vault, keys) = unlocked();
        let _guard = vault.rotation_locks().try_acquire("alice").unwrap();
        assert!(matches!(
            vault.put_field(&keys, "alice", "acc-1", "note", "n", None),
            Err(VaultError::RotationInProgress(_))
        ));
        assert!(matches!(
            vault.delete_record("alice", "acc-1"),
            Err(VaultError::RotationInProgress(_))
        ));
    }
}
