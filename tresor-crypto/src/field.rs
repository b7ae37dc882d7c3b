//! Column-level sealing.
//!
//! A sensitive column is stored as an encrypted value, plus a blind index
//! column when the field must be searchable. The ciphertext is bound to the
//! field name as associated data, so a value copied into another column no
//! longer decrypts. Blind indexes are computed under a per-column index key
//! (`IndexKey::for_column`), so the same value stored in two columns yields
//! two unrelated indexes.

use crate::blind_index::{compute_blind_index_with, BlindIndex, Normalization};
use crate::cipher::{decrypt_with_aad, encrypt_with_aad, EncryptedValue};
use crate::error::{CryptoError, CryptoResult};
use crate::key::SessionKeys;
use serde::{Deserialize, Serialize};

/// Storage form of one sensitive column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedField {
    /// base64 `EncryptedValue`.
    pub encrypted: String,
    /// base64 `BlindIndex`, present only for searchable fields.
    pub blind_index: Option<String>,
    /// Canonicalization used for `blind_index`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<Normalization>,
}

impl SealedField {
    pub fn is_searchable(&self) -> bool {
        self.blind_index.is_some()
    }

    pub fn encrypted_value(&self) -> CryptoResult<EncryptedValue> {
        EncryptedValue::from_base64(&self.encrypted)
    }

    pub fn index(&self) -> CryptoResult<Option<BlindIndex>> {
        self.blind_index
            .as_deref()
            .map(BlindIndex::from_base64)
            .transpose()
    }
}

/// Blind index of `value` in column `field`. Sealing, searching and
/// rotation all go through here so they agree on the column key.
pub fn field_blind_index(
    keys: &SessionKeys,
    field: &str,
    value: &str,
    normalization: Normalization,
) -> CryptoResult<BlindIndex> {
    let column_key = keys.index.for_column(field)?;
    Ok(compute_blind_index_with(&column_key, value, normalization))
}

/// Encrypts `plaintext` for column `field`. With `searchable` set, also
/// computes the blind index of the plaintext.
pub fn seal_field(
    keys: &SessionKeys,
    field: &str,
    plaintext: &str,
    searchable: Option<Normalization>,
) -> CryptoResult<SealedField> {
    let encrypted = encrypt_with_aad(&keys.data, plaintext.as_bytes(), field.as_bytes())?;
    let blind_index = searchable
        .map(|normalization| field_blind_index(keys, field, plaintext, normalization))
        .transpose()?
        .map(|index| index.to_base64());
    Ok(SealedField {
        encrypted: encrypted.to_base64(),
        blind_index,
        normalization: searchable,
    })
}

/// Decrypts column `field`. Wrong key, wrong column and tampering all fail
/// with `AuthenticationFailed`.
pub fn open_field(keys: &SessionKeys, field: &str, sealed: &SealedField) -> CryptoResult<String> {
    let value = sealed.encrypted_value()?;
    let bytes = decrypt_with_aad(&keys.data, &value, field.as_bytes())?;
    String::from_utf8(bytes)
        .map_err(|_| CryptoError::InvalidFormat(format!("field {field} is not UTF-8")))
}
