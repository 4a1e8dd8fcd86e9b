//! Structural tree-lock query
//!
//! The resource tree is structurally locked while change notifications are
//! broadcast. The work manager only reads this flag.

use std::sync::atomic::{AtomicBool, Ordering};

/// Externally owned "tree is locked" query.
pub trait TreeLock: Send + Sync {
    fn is_tree_locked(&self) -> bool;
}

/// Atomic tree-lock flag owned by the notification code.
#[derive(Debug, Default)]
pub struct TreeLockFlag {
    locked: AtomicBool,
}

impl TreeLockFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }
}

impl TreeLock for TreeLockFlag {
    fn is_tree_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}
