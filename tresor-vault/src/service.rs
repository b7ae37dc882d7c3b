//! Async front of the vault.
//!
//! Argon2id takes hundreds of milliseconds. Every call that
//! derives a key runs on tokio's blocking pool so async workers keep
//! serving other requests.

use crate::error::{VaultError, VaultResult};
use crate::store::FieldVault;
use tracing::debug;
use tresor_crypto::{MasterKey, RotationCancel, RotationReport, SessionKeys, UserCredential};
use zeroize::Zeroizing;

/// Cloneable handle for async callers.
#[derive(Clone)]
pub struct KeyService {
    vault: FieldVault,
}

impl KeyService {
    pub fn new(vault: FieldVault) -> Self {
        Self { vault }
    }

    /// Underlying vault, for calls that do no key derivation.
    pub fn vault(&self) -> &FieldVault {
        &self.vault
    }

    pub async fn register(&self, user_id: &str, password: &str) -> VaultResult<UserCredential> {
        let vault = self.vault.clone();
        let user_id = user_id.to_string();
        let password = Zeroizing::new(password.to_string());
        run_blocking(move || vault.register(&user_id, &password)).await
    }

    pub async fn unlock(&self, user_id: &str, password: &str) -> VaultResult<SessionKeys> {
        let vault = self.vault.clone();
        let user_id = user_id.to_string();
        let password = Zeroizing::new(password.to_string());
        run_blocking(move || vault.unlock(&user_id, &password)).await
    }

    pub async fn unlock_master_key(&self, user_id: &str, password: &str) -> VaultResult<MasterKey> {
        let vault = self.vault.clone();
        let user_id = user_id.to_string();
        let password = Zeroizing::new(password.to_string());
        run_blocking(move || vault.unlock_master_key(&user_id, &password)).await
    }

    /// Runs [`FieldVault::rotate`] on the blocking pool. Cancelling through
    /// `cancel` aborts at the next record; dropping the future does not.
    pub async fn rotate(
        &self,
        user_id: &str,
        old_password: &str,
        new_password: &str,
        cancel: RotationCancel,
    ) -> VaultResult<RotationReport> {
        let vault = self.vault.clone();
        let user_id = user_id.to_string();
        let old_password = Zeroizing::new(old_password.to_string());
        let new_password = Zeroizing::new(new_password.to_string());
        debug!("scheduling key rotation for user {user_id}");
        run_blocking(move || vault.rotate(&user_id, &old_password, &new_password, cancel)).await
    }
}

async fn run_blocking<T, F>(f: F) -> VaultResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> VaultResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::Task(e.to_string()))?
}
