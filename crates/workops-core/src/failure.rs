//! Per-thread check-in failure flags
//!
//! A failed check-in records its kind for the calling thread. The next
//! `take` on that same thread reads and clears it; other threads never see it.
//!
//! Each entry carries a weak handle to a token owned by its thread's local
//! storage. The token is dropped when the thread exits, and entries whose
//! token is gone are pruned on the next `set` or `pending` call, so threads
//! that fail and never poll do not accumulate.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    thread::{self, ThreadId},
};

use crate::error::ErrorKind;

thread_local! {
    /// Alive for exactly as long as the owning thread.
    static THREAD_ALIVE: Arc<()> = Arc::new(());
}

#[derive(Debug)]
struct Entry {
    alive: Weak<()>,
    kind: ErrorKind,
}

impl Entry {
    fn thread_exited(&self) -> bool {
        self.alive.strong_count() == 0
    }
}

/// Sticky, single-shot failure flag per calling thread.
#[derive(Debug, Default)]
pub struct FailureFlags {
    failed: Mutex<HashMap<ThreadId, Entry>>,
}

impl FailureFlags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn failed(&self) -> MutexGuard<'_, HashMap<ThreadId, Entry>> {
        self.failed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that the calling thread's last check-in failed with `kind`.
    pub fn set(&self, kind: ErrorKind) {
        // An exiting thread whose local storage is already torn down gets a
        // dangling handle, which the next prune removes.
        let alive = THREAD_ALIVE.try_with(Arc::downgrade).unwrap_or_default();
        let mut failed = self.failed();
        failed.retain(|_, entry| !entry.thread_exited());
        failed.insert(thread::current().id(), Entry { alive, kind });
    }

    /// Read and clear the calling thread's flag.
    pub fn take(&self) -> Option<ErrorKind> {
        self.failed()
            .remove(&thread::current().id())
            .map(|entry| entry.kind)
    }

    /// Number of flags still waiting to be taken by live threads.
    #[must_use]
    pub fn pending(&self) -> usize {
        let mut failed = self.failed();
        failed.retain(|_, entry| !entry.thread_exited());
        failed.len()
    }
}
