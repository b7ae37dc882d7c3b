//! Symmetric cipher engine (ChaCha20-Poly1305).
//!
//! Wire format, version 1:
//!
//! ```text
//! [ version (1) | nonce (12) | ciphertext (n) | tag (16) ]
//! ```
//!
//! base64-encoded (standard alphabet, padded) for text columns. The version
//! byte is also authenticated as associated data. A future algorithm gets a
//! new version byte; version 1 blobs stay decryptable.
//!
//! The version byte is checked when the blob is parsed, before any
//! authentication. A blob whose version byte was altered therefore fails
//! with `InvalidFormat`, not `AuthenticationFailed`: every other single-bit
//! change is reported as an authentication failure, a version flip as a
//! format error. The message names only the version, never key or
//! plaintext material.
//!
//! Nonces are always drawn from the CSPRNG inside `encrypt`. No function
//! accepts a caller-supplied nonce.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DataKey;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Current wire format version.
pub const FORMAT_VERSION: u8 = 1;

/// Nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Smallest valid blob: header plus tag of an empty plaintext.
pub const MIN_BLOB_SIZE: usize = 1 + NONCE_SIZE + TAG_SIZE;

/// An encrypted field value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    /// Wire format version.
    pub version: u8,
    /// Random nonce, unique per encryption.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

impl EncryptedValue {
    /// Serialized length in bytes.
    pub fn len(&self) -> usize {
        1 + NONCE_SIZE + self.ciphertext.len()
    }

    /// Always false: even an empty plaintext carries a header and tag.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.push(self.version);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < MIN_BLOB_SIZE {
            return Err(CryptoError::InvalidFormat(format!(
                "encrypted value too short: {} bytes, need at least {MIN_BLOB_SIZE}",
                bytes.len()
            )));
        }
        let version = bytes[0];
        if version != FORMAT_VERSION {
            return Err(CryptoError::InvalidFormat(format!(
                "unsupported encrypted value version {version}"
            )));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[1..1 + NONCE_SIZE]);
        Ok(Self {
            version,
            nonce,
            ciphertext: bytes[1 + NONCE_SIZE..].to_vec(),
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidFormat(format!("encrypted value is not base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

fn associated_data(version: u8, aad: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + aad.len());
    out.push(version);
    out.extend_from_slice(aad);
    out
}

fn cipher_for(key: &DataKey) -> CryptoResult<ChaCha20Poly1305> {
    ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::Encryption("invalid data key length".into()))
}

/// Encrypts `plaintext` under a fresh random nonce.
pub fn encrypt(key: &DataKey, plaintext: &[u8]) -> CryptoResult<EncryptedValue> {
    encrypt_with_aad(key, plaintext, &[])
}

/// Encrypts `plaintext` and binds it to `aad` (e.g. the column name). The
/// same `aad` must be supplied to decrypt.
pub fn encrypt_with_aad(key: &DataKey, plaintext: &[u8], aad: &[u8]) -> CryptoResult<EncryptedValue> {
    let cipher = cipher_for(key)?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let associated = associated_data(FORMAT_VERSION, aad);
    let ciphertext = cipher
        .encrypt(
            &Nonce::from(nonce),
            Payload {
                msg: plaintext,
                aad: &associated,
            },
        )
        .map_err(|_| CryptoError::Encryption("aead seal failed".into()))?;

    Ok(EncryptedValue {
        version: FORMAT_VERSION,
        nonce,
        ciphertext,
    })
}

/// Decrypts a value produced by `encrypt`.
pub fn decrypt(key: &DataKey, value: &EncryptedValue) -> CryptoResult<Vec<u8>> {
    decrypt_with_aad(key, value, &[])
}

/// Decrypts a value produced by `encrypt_with_aad` with the same `aad`.
///
/// Any tag mismatch is `AuthenticationFailed`; no partial plaintext is ever
/// returned.
pub fn decrypt_with_aad(key: &DataKey, value: &EncryptedValue, aad: &[u8]) -> CryptoResult<Vec<u8>> {
    if value.version != FORMAT_VERSION {
        return Err(CryptoError::InvalidFormat(format!(
            "unsupported encrypted value version {}",
            value.version
        )));
    }
    if value.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::InvalidFormat(format!(
            "ciphertext shorter than the {TAG_SIZE}-byte tag"
        )));
    }

    let cipher = cipher_for(key)?;
    let associated = associated_data(value.version, aad);
    cipher
        .decrypt(
            &Nonce::from(value.nonce),
            Payload {
                msg: &value.ciphertext,
                aad: &associated,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Encrypts a string and returns the base64 storage form.
pub fn encrypt_string(key: &DataKey, plaintext: &str) -> CryptoResult<String> {
    Ok(encrypt(key, plaintext.as_bytes())?.to_base64())
}

/// Decrypts the base64 storage form back into a string.
pub fn decrypt_string(key: &DataKey, encoded: &str) -> CryptoResult<String> {
    let value = EncryptedValue::from_base64(encoded)?;
    let bytes = decrypt(key, &value)?;
    String::from_utf8(bytes)
        .map_err(|_| CryptoError::InvalidFormat("decrypted value is not UTF-8".into()))
}
