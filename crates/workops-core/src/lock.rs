//! Re-entrant operation lock
//!
//! A manually acquired and released lock keyed by the owning thread. Unlike a
//! guard-based mutex, acquire and release may happen at unrelated call sites,
//! and a thread may fully release its depth and later restore it.
//!
//! The lock state lives behind a short internal mutex; waiters park on a
//! condition variable until the lock has no owner.

use std::{
    fmt,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
    time::Duration,
};

use tracing::trace;

/// Snapshot of the operation lock.
///
/// `depth > 0` implies `owner.is_some()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockState {
    /// Thread currently holding the lock
    pub owner: Option<ThreadId>,
    /// Number of unreleased acquisitions by the owner
    pub depth: u32,
}

impl LockState {
    fn enter(&mut self, thread: ThreadId) {
        self.owner = Some(thread);
        self.depth += 1;
    }
}

/// Re-entrant lock whose ownership spans arbitrary call sites.
#[derive(Default)]
pub struct OperationLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl OperationLock {
    /// Create an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Only non-panicking code runs while this guard is held.
    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the lock is free or already owned by the calling thread,
    /// then increment the depth.
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut state = self
            .released
            .wait_while(self.state(), |s| !can_enter(s, me))
            .unwrap_or_else(PoisonError::into_inner);
        state.enter(me);
        trace!(depth = state.depth, "operation lock acquired");
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    ///
    /// Returns `false` without side effects when the lock could not be taken.
    /// A zero timeout never blocks.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let me = thread::current().id();
        let (mut state, _) = self
            .released
            .wait_timeout_while(self.state(), timeout, |s| !can_enter(s, me))
            .unwrap_or_else(PoisonError::into_inner);
        if !can_enter(&state, me) {
            return false;
        }
        state.enter(me);
        trace!(depth = state.depth, "operation lock acquired");
        true
    }

    /// Release one level held by the calling thread.
    ///
    /// # Panics
    ///
    /// Panics when the calling thread does not own the lock. An unbalanced
    /// release is a programming error that would otherwise leave the workspace
    /// permanently locked or unprotected.
    pub fn release(&self) {
        let me = thread::current().id();
        let mut state = self.state();
        if state.owner != Some(me) || state.depth == 0 {
            let held = *state;
            drop(state);
            unbalanced_release(held, me);
        }

        state.depth -= 1;
        trace!(depth = state.depth, "operation lock released");
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_all();
        }
    }

    /// Depth held by the calling thread, `0` if it does not own the lock.
    #[must_use]
    pub fn depth(&self) -> u32 {
        let me = thread::current().id();
        let state = self.state();
        if state.owner == Some(me) {
            state.depth
        } else {
            0
        }
    }

    /// Thread currently owning the lock, if any.
    #[must_use]
    pub fn holder(&self) -> Option<ThreadId> {
        self.state().owner
    }

    /// Copy of the full lock state.
    #[must_use]
    pub fn snapshot(&self) -> LockState {
        *self.state()
    }
}

impl fmt::Debug for OperationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot();
        f.debug_struct("OperationLock")
            .field("owner", &state.owner)
            .field("depth", &state.depth)
            .finish()
    }
}

fn can_enter(state: &LockState, thread: ThreadId) -> bool {
    match state.owner {
        None => true,
        Some(owner) => owner == thread,
    }
}

#[cold]
#[track_caller]
#[allow(clippy::panic)]
fn unbalanced_release(held: LockState, caller: ThreadId) -> ! {
    panic!(
        "unbalanced operation lock release by {caller:?}: owner={:?} depth={}",
        held.owner, held.depth
    )
}
