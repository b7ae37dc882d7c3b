//! Key rotation after a password change.
//!
//! ```text
//! Start -> DeriveOldKeys -> DeriveNewKeys -> Reencrypting -> CommitSaltAndHash -> Done
//!                                                 |                 |
//!                                                 +----> Failed <---+
//! ```
//!
//! Every re-encrypted record is staged in memory. Storage sees nothing until
//! `RotationCommit::commit` receives the complete `StagedRotation` (new salt,
//! new password hash, every record) and swaps it in one transaction. Any
//! failure before that point drops the staging area, so the old salt, hash
//! and ciphertexts stay authoritative and the user can retry with the old
//! password.
//!
//! Callers must serialize rotations per user.

use crate::blind_index::Normalization;
use crate::cipher::{decrypt_with_aad, encrypt_with_aad, EncryptedValue};
use crate::error::{CryptoError, CryptoResult};
use crate::field::{field_blind_index, SealedField};
use crate::key::{derive_master_key, KdfParams, MasterKey, SessionKeys};
use crate::password::{check_password_strength, hash_password, verify_password, PasswordPolicy};
use crate::salt::Salt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Identity-scoped authentication data, owned by the account subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    pub user_id: String,
    /// Argon2id PHC string, authentication only.
    pub password_hash: String,
    /// Salt for `derive_master_key`. Not secret.
    pub salt: Salt,
}

/// One encrypted column of one record, as read from storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredField {
    pub record_id: String,
    pub field: String,
    pub sealed: SealedField,
}

/// Rotation steps, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RotationState {
    Start,
    DeriveOldKeys,
    DeriveNewKeys,
    Reencrypting,
    CommitSaltAndHash,
    Done,
    Failed,
}

/// Inputs of a rotation.
pub struct RotationRequest<'a> {
    pub user_id: &'a str,
    pub old_password: &'a str,
    pub new_password: &'a str,
    pub old_salt: Salt,
    pub old_password_hash: &'a str,
}

impl<'a> RotationRequest<'a> {
    pub fn new(credential: &'a UserCredential, old_password: &'a str, new_password: &'a str) -> Self {
        Self {
            user_id: &credential.user_id,
            old_password,
            new_password,
            old_salt: credential.salt,
            old_password_hash: &credential.password_hash,
        }
    }
}

impl fmt::Debug for RotationRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationRequest")
            .field("user_id", &self.user_id)
            .field("old_password", &"[REDACTED]")
            .field("new_password", &"[REDACTED]")
            .field("old_salt", &self.old_salt)
            .finish_non_exhaustive()
    }
}

/// Everything a successful rotation writes, handed to storage in one piece.
#[derive(Clone, Debug)]
pub struct StagedRotation {
    pub user_id: String,
    pub new_salt: Salt,
    pub new_password_hash: String,
    pub records: Vec<StoredField>,
}

/// Storage side of a rotation.
pub trait RotationCommit {
    type Error: fmt::Display;

    /// Replaces the user's salt, password hash and every staged record.
    ///
    /// Must be all-or-nothing: on error, storage is left exactly as it was.
    fn commit(&mut self, staged: StagedRotation) -> Result<(), Self::Error>;
}

/// Cooperative abort flag, checked before each record and before commit.
#[derive(Clone, Debug, Default)]
pub struct RotationCancel(Arc<AtomicBool>);

impl RotationCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tunables of a rotation.
#[derive(Clone, Debug, Default)]
pub struct RotationOptions {
    pub kdf: KdfParams,
    pub policy: PasswordPolicy,
    pub cancel: RotationCancel,
}

/// Outcome of a committed rotation.
#[derive(Debug)]
pub struct RotationReport {
    pub user_id: String,
    pub records_reencrypted: usize,
    pub new_salt: Salt,
    /// Master key for the rest of the session.
    pub new_master_key: MasterKey,
    /// States visited, `Start` through `Done`.
    pub states: Vec<RotationState>,
}

struct Progress<'a> {
    user_id: &'a str,
    states: Vec<RotationState>,
}

impl<'a> Progress<'a> {
    fn new(user_id: &'a str) -> Self {
        Self {
            user_id,
            states: vec![RotationState::Start],
        }
    }

    fn current(&self) -> RotationState {
        self.states.last().copied().unwrap_or(RotationState::Start)
    }

    fn advance(&mut self, next: RotationState) {
        debug!(
            "key rotation for user {}: {:?} -> {next:?}",
            self.user_id,
            self.current()
        );
        self.states.push(next);
    }

    fn fail(&mut self, reason: String) -> CryptoError {
        warn!(
            "key rotation for user {} aborted in {:?}: {reason}",
            self.user_id,
            self.current()
        );
        self.states.push(RotationState::Failed);
        CryptoError::RotationAborted(reason)
    }
}

/// Re-encrypts every record of a user under a key derived from
/// `new_password`, then commits the new salt, hash and records atomically.
///
/// Errors:
/// - `AuthenticationFailed` if `old_password` does not match the stored hash.
/// - `WeakInput` if `new_password` fails `options.policy`.
/// - `RotationAborted` for any failure while re-encrypting or committing,
///   including cancellation. Nothing has been written in that case.
pub fn rotate_keys<I, C>(
    request: &RotationRequest<'_>,
    records: I,
    committer: &mut C,
    options: &RotationOptions,
) -> CryptoResult<RotationReport>
where
    I: IntoIterator<Item = StoredField>,
    C: RotationCommit,
{
    let mut progress = Progress::new(request.user_id);

    if !verify_password(request.old_password, request.old_password_hash) {
        return Err(CryptoError::AuthenticationFailed);
    }
    check_password_strength(request.new_password, &options.policy)?;

    progress.advance(RotationState::DeriveOldKeys);
    let old_master = derive_master_key(request.old_password, &request.old_salt, &options.kdf)?;
    let old_keys = SessionKeys::derive(&old_master)?;

    progress.advance(RotationState::DeriveNewKeys);
    let new_salt = Salt::random();
    let new_master = derive_master_key(request.new_password, &new_salt, &options.kdf)?;
    let new_keys = SessionKeys::derive(&new_master)?;
    let new_password_hash = hash_password(request.new_password, &options.kdf)?;

    progress.advance(RotationState::Reencrypting);
    let mut staged_records = Vec::new();
    for record in records {
        if options.cancel.is_cancelled() {
            return Err(progress.fail(format!(
                "cancelled after {} records",
                staged_records.len()
            )));
        }
        let restaged = reencrypt_record(&record, &old_keys, &new_keys).map_err(|e| {
            progress.fail(format!(
                "record {} field {}: {e}",
                record.record_id, record.field
            ))
        })?;
        staged_records.push(restaged);
    }

    if options.cancel.is_cancelled() {
        return Err(progress.fail("cancelled before commit".into()));
    }

    progress.advance(RotationState::CommitSaltAndHash);
    let records_reencrypted = staged_records.len();
    let staged = StagedRotation {
        user_id: request.user_id.to_string(),
        new_salt,
        new_password_hash,
        records: staged_records,
    };
    committer
        .commit(staged)
        .map_err(|e| progress.fail(format!("commit failed: {e}")))?;

    progress.advance(RotationState::Done);
    info!(
        "key rotation for user {} committed ({records_reencrypted} records)",
        request.user_id
    );

    Ok(RotationReport {
        user_id: request.user_id.to_string(),
        records_reencrypted,
        new_salt,
        new_master_key: new_master,
        states: progress.states,
    })
}

fn reencrypt_record(
    record: &StoredField,
    old_keys: &SessionKeys,
    new_keys: &SessionKeys,
) -> CryptoResult<StoredField> {
    let aad = record.field.as_bytes();
    let value = EncryptedValue::from_base64(&record.sealed.encrypted)?;
    let plaintext = Zeroizing::new(decrypt_with_aad(&old_keys.data, &value, aad)?);

    let encrypted = encrypt_with_aad(&new_keys.data, &plaintext, aad)?.to_base64();

    let (blind_index, normalization) = if record.sealed.is_searchable() {
        let normalization = record.sealed.normalization.unwrap_or(Normalization::Exact);
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| CryptoError::InvalidFormat("searchable value is not UTF-8".into()))?;
        let index = field_blind_index(new_keys, &record.field, text, normalization)?;
        (Some(index.to_base64()), Some(normalization))
    } else {
        (None, None)
    };

    Ok(StoredField {
        record_id: record.record_id.clone(),
        field: record.field.clone(),
        sealed: SealedField {
            encrypted,
            blind_index,
            normalization,
        },
    })
}
