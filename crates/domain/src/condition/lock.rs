//! Manual exclusivity gate.
//!
//! A lock is never set by condition evaluation. Orchestration code takes it
//! around work that must not be interrupted, and the scheduler defers
//! condition-triggered stops while it is held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared lock flag. Clones observe and toggle the same lock.
#[derive(Debug, Clone, Default)]
pub struct LockHandle(Arc<AtomicBool>);

impl LockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Takes the lock if it is free. The returned guard releases it on drop,
    /// including during unwinding.
    pub fn try_acquire(&self) -> Option<LockGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LockGuard {
                handle: self.clone(),
            })
    }

    /// Sets the flag. Returns false if it was already set.
    pub fn lock(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    /// Clears the flag. Returns false if it was not set.
    pub fn unlock(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl PartialEq for LockHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Releases its lock when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard {
    handle: LockHandle,
}

impl LockGuard {
    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.handle.unlock();
    }
}

/// A named lock placed inside a condition tree.
///
/// Logical conditions skip locks when aggregating. A bare lock reads as
/// satisfied while it is free.
#[derive(Debug, Clone, PartialEq)]
pub struct LockCondition {
    reason: String,
    handle: LockHandle,
}

impl LockCondition {
    pub fn new(reason: impl Into<String>) -> Self {
        Self::with_handle(reason, LockHandle::new())
    }

    pub fn with_handle(reason: impl Into<String>, handle: LockHandle) -> Self {
        Self {
            reason: reason.into(),
            handle,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }

    pub fn is_locked(&self) -> bool {
        self.handle.is_locked()
    }

    pub fn lock(&self) -> bool {
        self.handle.lock()
    }

    pub fn unlock(&self) -> bool {
        self.handle.unlock()
    }

    pub fn try_acquire(&self) -> Option<LockGuard> {
        self.handle.try_acquire()
    }

    pub fn satisfied(&self) -> bool {
        !self.is_locked()
    }

    pub fn progress(&self) -> f64 {
        if self.is_locked() {
            0.0
        } else {
            100.0
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "Lock: {} ({})",
            self.reason,
            if self.is_locked() { "LOCKED" } else { "UNLOCKED" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let handle = LockHandle::new();
        {
            let guard = handle.try_acquire();
            assert!(guard.is_some());
            assert!(handle.is_locked());
            assert!(handle.try_acquire().is_none());
        }
        assert!(!handle.is_locked());
    }

    #[test]
    fn guard_releases_during_panic() {
        let handle = LockHandle::new();
        let inner = handle.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = inner.try_acquire();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!handle.is_locked());
    }

    #[test]
    fn clones_share_state_and_compare_by_identity() {
        let handle = LockHandle::new();
        let clone = handle.clone();
        assert!(clone.lock());
        assert!(!clone.lock());
        assert!(handle.is_locked());
        assert_eq!(handle, clone);
        assert_ne!(handle, LockHandle::new());
    }

    #[test]
    fn bare_lock_reads_satisfied_while_free() {
        let condition = LockCondition::new("Banking");
        assert!(condition.satisfied());
        assert_eq!(condition.progress(), 100.0);
        condition.lock();
        assert!(!condition.satisfied());
        assert_eq!(condition.describe(), "Lock: Banking (LOCKED)");
        assert!(condition.unlock());
        assert!(!condition.unlock());
    }
}
