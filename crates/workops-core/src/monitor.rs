//! Cancellation monitors consulted while waiting for a scheduling rule

use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation source polled during the rule wait.
///
/// Once the rule is held, the operation lock wait ignores the monitor.
pub trait CancellationMonitor {
    fn is_canceled(&self) -> bool;
}

/// Monitor that is never canceled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancellationMonitor for NeverCancel {
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Shareable cancellation flag.
#[derive(Debug, Default)]
pub struct CancelFlag {
    canceled: AtomicBool,
}

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation request.
    pub fn reset(&self) {
        self.canceled.store(false, Ordering::SeqCst);
    }
}

impl CancellationMonitor for CancelFlag {
    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}
