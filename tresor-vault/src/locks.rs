//! Per-user rotation locks.
//!
//! A second rotation for the same user is refused rather than queued: the
//! caller learns immediately that one is running and can retry later.

use crate::error::{VaultError, VaultResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Users with a rotation in flight.
#[derive(Clone, Default)]
pub struct RotationLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RotationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `user_id` as rotating until the returned guard is dropped.
    pub fn try_acquire(&self, user_id: &str) -> VaultResult<RotationGuard> {
        let mut active = lock_active(&self.active);
        if !active.insert(user_id.to_string()) {
            return Err(VaultError::RotationInProgress(user_id.to_string()));
        }
        debug!("rotation lock acquired for user {user_id}");
        Ok(RotationGuard {
            active: Arc::clone(&self.active),
            user_id: user_id.to_string(),
        })
    }

    /// Whether `user_id` has a rotation in flight. A poisoned set is still
    /// read, so a user locked before the poisoning stays locked.
    pub fn is_locked(&self, user_id: &str) -> bool {
        lock_active(&self.active).contains(user_id)
    }
}

// Every mutation of the set is a single insert or remove, so it is never
// left half-updated by a panicking holder.
fn lock_active(active: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    active.lock().unwrap_or_else(|poisoned| {
        warn!("rotation lock set was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Releases the user's rotation lock on drop, including on early return.
pub struct RotationGuard {
    active: Arc<Mutex<HashSet<String>>>,
    user_id: String,
}

impl RotationGuard {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for RotationGuard {
    fn drop(&mut self) {
        lock_active(&self.active).remove(&self.user_id);
        debug!("rotation lock released for user {}", self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let locks = RotationLocks::new();
        let guard = locks.try_acquire("alice").unwrap();
        assert!(locks.is_locked("alice"));
        assert!(matches!(
            locks.try_acquire("alice"),
            Err(VaultError::RotationInProgress(user)) if user == "alice"
        ));

        drop(guard);
        assert!(!locks.is_locked("alice"));
        assert!(locks.try_acquire("alice").is_ok());
    }

    #[test]
    fn users_do_not_block_each_other() {
        let locks = RotationLocks::new();
        let _alice = locks.try_acquire("alice").unwrap();
        let bob = locks.try_acquire("bob").unwrap();
        assert_eq!(bob.user_id(), "bob");
    }

    #[test]
    fn clones_share_state() {
        let locks = RotationLocks::new();
        let other = locks.clone();
        let _guard = locks.try_acquire("alice").unwrap();
        assert!(other.try_acquire("alice").is_err());
    }

    #[test]
    fn guard_released_on_panic() {
        let locks = RotationLocks::new();
        let inner = locks.clone();
        let result = std::thread::spawn(move || {
            let _guard = inner.try_acquire("alice").unwrap();
            panic!("rotation blew up");
        })
        .join();
        assert!(result.is_err());
        assert!(!locks.is_locked("alice"));
    }

    #[test]
    fn poisoned_set_keeps_locked_users_locked() {
        let locks = RotationLocks::new();
        let guard = locks.try_acquire("alice").unwrap();

        let active = Arc::clone(&locks.active);
        let result = std::thread::spawn(move || {
            let _held = active.lock().unwrap();
            panic!("poison the rotation set");
        })
        .join();
        assert!(result.is_err());
        assert!(locks.active.is_poisoned());

        assert!(locks.is_locked("alice"));
        assert!(matches!(
            locks.try_acquire("alice"),
            Err(VaultError::RotationInProgress(user)) if user == "alice"
        ));
        assert!(!locks.is_locked("bob"));

        drop(guard);
        assert!(!locks.is_locked("alice"));
        assert!(locks.try_acquire("alice").is_ok());
    }
}
