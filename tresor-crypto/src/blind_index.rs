//! Blind index engine.
//!
//! `HMAC-SHA256(index_key, canonical(value))`. Deterministic under a fixed
//! key, so the server can answer `WHERE blind_index = ?` without ever seeing
//! the value; keyed, so a leaked index table cannot be brute-forced without
//! the index key. Equality lookups only.

use crate::error::{CryptoError, CryptoResult};
use crate::key::IndexKey;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Blind index length in bytes.
pub const BLIND_INDEX_SIZE: usize = 32;

/// How a value is canonicalized before hashing. Pick one per field and never
/// change it, or existing indexes stop matching.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Surrounding whitespace trimmed, case preserved.
    #[default]
    Exact,
    /// Surrounding whitespace trimmed, lowercased.
    CaseInsensitive,
}

impl Normalization {
    pub fn canonicalize(self, value: &str) -> String {
        let trimmed = value.trim();
        match self {
            Self::Exact => trimmed.to_string(),
            Self::CaseInsensitive => trimmed.to_lowercase(),
        }
    }
}

/// Deterministic keyed digest of a lookup value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlindIndex([u8; BLIND_INDEX_SIZE]);

impl BlindIndex {
    pub fn as_bytes(&self) -> &[u8; BLIND_INDEX_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidFormat(format!("blind index is not base64: {e}")))?;
        let arr: [u8; BLIND_INDEX_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidFormat(format!(
                "blind index must be {BLIND_INDEX_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }
}

fn mac_for(key: &IndexKey, canonical: &str) -> HmacSha256 {
    // HMAC accepts keys of any length; a 32-byte key cannot fail.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(canonical.as_bytes());
    mac
}

/// Computes the blind index of `value` with the default (`Exact`)
/// canonicalization.
pub fn compute_blind_index(key: &IndexKey, value: &str) -> BlindIndex {
    compute_blind_index_with(key, value, Normalization::Exact)
}

/// Computes the blind index of `value` after applying `normalization`.
pub fn compute_blind_index_with(
    key: &IndexKey,
    value: &str,
    normalization: Normalization,
) -> BlindIndex {
    let canonical = normalization.canonicalize(value);
    let tag = mac_for(key, &canonical).finalize().into_bytes();
    let mut out = [0u8; BLIND_INDEX_SIZE];
    out.copy_from_slice(&tag);
    BlindIndex(out)
}

/// Constant-time check that `candidate` is the index of `value`.
pub fn verify_blind_index(
    key: &IndexKey,
    value: &str,
    normalization: Normalization,
    candidate: &BlindIndex,
) -> bool {
    let canonical = normalization.canonicalize(value);
    mac_for(key, &canonical)
        .verify_slice(candidate.as_bytes())
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::MasterKey;

    fn index_key() -> IndexKey {
        IndexKey::derive(&MasterKey::from_bytes(rand::random())).unwrap()
    }

    #[test]
    fn deterministic_under_same_key() {
        let key = index_key();
        let a = compute_blind_index(&key, "FR7630001007941234567890185");
        let b = compute_blind_index(&key, "FR7630001007941234567890185");
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), BLIND_INDEX_SIZE);
    }

    #[test]
    fn different_values_differ() {
        let key = index_key();
        assert_ne!(
            compute_blind_index(&key, "FR7630001007941234567890185"),
            compute_blind_index(&key, "FR7630001007941234567890186")
        );
    }

    #[test]
    fn different_keys_differ() {
        assert_ne!(
            compute_blind_index(&index_key(), "AAPL"),
            compute_blind_index(&index_key(), "AAPL")
        );
    }

    #[test]
    fn canonicalization_trims_and_optionally_folds_case() {
        let key = index_key();
        assert_eq!(
            compute_blind_index(&key, "  AAPL\n"),
            compute_blind_index(&key, "AAPL")
        );
        assert_ne!(
            compute_blind_index(&key, "aapl"),
            compute_blind_index(&key, "AAPL")
        );
        assert_eq!(
            compute_blind_index_with(&key, "Alice@Example.com ", Normalization::CaseInsensitive),
            compute_blind_index_with(&key, "alice@example.com", Normalization::CaseInsensitive)
        );
    }

    #[test]
    fn verify_matches_compute() {
        let key = index_key();
        let idx = compute_blind_index(&key, "BTC");
        assert!(verify_blind_index(&key, " BTC ", Normalization::Exact, &idx));
        assert!(!verify_blind_index(&key, "ETH", Normalization::Exact, &idx));
        assert!(!verify_blind_index(&index_key(), "BTC", Normalization::Exact, &idx));
    }

    #[test]
    fn base64_validation() {
        let key = index_key();
        let idx = compute_blind_index(&key, "BTC");
        assert_eq!(BlindIndex::from_base64(&idx.to_base64()).unwrap(), idx);
        assert!(matches!(
            BlindIndex::from_base64(&STANDARD.encode([0u8; 16])),
            Err(CryptoError::InvalidFormat(_))
        ));
        assert!(matches!(
            BlindIndex::from_base64("***"),
            Err(CryptoError::InvalidFormat(_))
        ));
    }
}
