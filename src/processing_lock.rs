//! Processing Lock Registry
//!
//! At most one reconciliation operation per wager. Acquisition never waits:
//! a busy key means another task owns the wager and will leave it consistent,
//! so the caller skips it for this pass.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// What a lock is keyed on. Wagers without a chain id yet are keyed by commitment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    Wager(u64),
    Commitment(String),
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKey::Wager(id) => write!(f, "wager:{}", id),
            LockKey::Commitment(c) => write!(f, "commitment:{}", c),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessingLocks {
    held: Arc<Mutex<HashSet<LockKey>>>,
}

impl ProcessingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the std mutex cannot leave the set half-updated,
    // so a poisoned lock is still usable.
    fn set(&self) -> MutexGuard<'_, HashSet<LockKey>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `None` when the key is already held
    pub fn try_acquire(&self, key: LockKey) -> Option<ProcessingGuard> {
        if self.set().insert(key.clone()) {
            Some(ProcessingGuard { locks: self.clone(), key: Some(key) })
        } else {
            None
        }
    }

    pub fn try_acquire_wager(&self, id: u64) -> Option<ProcessingGuard> {
        self.try_acquire(LockKey::Wager(id))
    }

    pub fn is_held(&self, key: &LockKey) -> bool {
        self.set().contains(key)
    }

    pub fn held_count(&self) -> usize {
        self.set().len()
    }

    fn release(&self, key: &LockKey) {
        self.set().remove(key);
    }
}

/// Releases its key on drop
#[derive(Debug)]
pub struct ProcessingGuard {
    locks: ProcessingLocks,
    key: Option<LockKey>,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.locks.release(&key);
        }
    }
}
