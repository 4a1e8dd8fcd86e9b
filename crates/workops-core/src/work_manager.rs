//! Work manager: the operation concurrency controller
//!
//! Every mutating operation on the workspace tree is bracketed by
//! [`WorkManager::check_in`] and [`WorkManager::check_out`]. Check-in first
//! begins the operation's scheduling rule (cancellable), then takes the
//! re-entrant operation lock (not cancellable), then counts the operation as
//! prepared. Check-out undoes all three, always releasing the rule even when
//! the lock release panics.
//!
//! # Locks
//!
//! Two distinct locks are involved:
//! - the long-held [`OperationLock`], which serializes mutation of the tree
//! - a short internal mutex guarding the depth counters and build flags
//!
//! The internal mutex is never held while waiting on the operation lock or
//! on the scheduler.
//!
//! # Failed check-ins
//!
//! A failed check-in records its kind for the calling thread. The caller then
//! calls [`WorkManager::check_in_failed`], which clears the flag, releases the
//! rule if it is still held, and tells the caller to skip `check_out`.
//! [`WorkManager::begin_operation`] folds both steps into one call.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::{debug, info, trace, warn};

use crate::{
    config::{BuildPolicy, OperationConfig},
    depth::{OperationDepth, OperationState},
    error::{Error, ErrorKind, Result},
    failure::FailureFlags,
    guard::OperationGuard,
    lock::OperationLock,
    monitor::CancellationMonitor,
    rule::{NotificationRule, Rule},
    scheduler::RuleScheduler,
    tree::TreeLock,
};

/// Controller for operations that mutate the shared workspace tree.
///
/// One instance serves one workspace for its whole lifetime; pass it around
/// by reference or `Arc`.
pub struct WorkManager {
    scheduler: Arc<dyn RuleScheduler>,
    tree: Arc<dyn TreeLock>,
    lock: OperationLock,
    state: Mutex<OperationState>,
    check_in_failures: FailureFlags,
    notify_rule: Rule,
    policy: BuildPolicy,
    lock_timeout: Option<Duration>,
}

impl WorkManager {
    #[must_use]
    pub fn new(
        scheduler: Arc<dyn RuleScheduler>,
        tree: Arc<dyn TreeLock>,
        config: OperationConfig,
    ) -> Self {
        Self {
            scheduler,
            tree,
            lock: OperationLock::new(),
            state: Mutex::new(OperationState::default()),
            check_in_failures: FailureFlags::new(),
            notify_rule: Arc::new(NotificationRule),
            policy: config.build_policy(),
            lock_timeout: config.lock_timeout(),
        }
    }

    // Short critical sections only; never held across the operation lock or the scheduler.
    fn state(&self) -> MutexGuard<'_, OperationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lifecycle hook run when the workspace opens.
    pub fn startup(&self) {
        info!(
            build_on_cancel = self.policy.build_on_cancel,
            lock_timeout = ?self.lock_timeout,
            "work manager started"
        );
    }

    /// Lifecycle hook run when the workspace closes.
    pub fn shutdown(&self) {
        let depth = self.operation_depth();
        if depth.prepared > 0 {
            warn!(
                prepared = depth.prepared,
                "work manager shut down with operations still checked in"
            );
        }
        info!("work manager shut down");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CHECK-IN / CHECK-OUT
    // ═══════════════════════════════════════════════════════════════════════

    /// Wait until the operation guarded by `rule` is free to run.
    ///
    /// On success the caller must call [`check_out`](Self::check_out) exactly
    /// once. On failure the caller must call
    /// [`check_in_failed`](Self::check_in_failed) instead.
    pub fn check_in(&self, rule: &Rule, monitor: &dyn CancellationMonitor) -> Result<()> {
        let result = self.try_check_in(rule, monitor);
        if let Err(err) = &result {
            warn!(rule = %rule, kind = %err.kind(), "check-in failed: {err}");
            self.check_in_failures.set(err.kind());
        }
        result
    }

    fn try_check_in(&self, rule: &Rule, monitor: &dyn CancellationMonitor) -> Result<()> {
        if self.tree.is_tree_locked() {
            return Err(Error::WorkspaceLocked);
        }

        self.scheduler
            .begin_rule(rule, monitor)
            .map_err(|reason| Error::RuleAcquisition {
                rule: rule.to_string(),
                reason,
            })?;

        self.acquire_lock(rule)?;

        let prepared = self.state().increment_prepared();
        debug!(rule = %rule, prepared, depth = self.lock.depth(), "checked in");
        Ok(())
    }

    fn acquire_lock(&self, rule: &Rule) -> Result<()> {
        let Some(timeout) = self.lock_timeout else {
            self.lock.acquire();
            return Ok(());
        };
        if self.lock.acquire_timeout(timeout) {
            Ok(())
        } else {
            Err(Error::LockAcquisition {
                rule: rule.to_string(),
                reason: format!("timed out after {}ms", timeout.as_millis()),
            })
        }
    }

    /// Finish an operation begun by a successful [`check_in`](Self::check_in).
    ///
    /// # Panics
    ///
    /// Panics when no operation is checked in or the calling thread does not
    /// own the operation lock. The rule is still ended in that case.
    pub fn check_out(&self, rule: &Rule) {
        let _end_rule = EndRuleOnDrop {
            scheduler: self.scheduler.as_ref(),
            rule,
        };

        // Checked before any bookkeeping so a misplaced check-out leaves it intact
        assert!(
            self.lock.depth() > 0,
            "unbalanced check-out: calling thread does not hold the operation lock"
        );

        let prepared = {
            let mut state = self.state();
            let prepared = state.decrement_prepared();
            state.depth.rebalance();
            if state.close_if_outermost() {
                trace!("outer operation closed, build state reset");
            }
            prepared
        };

        self.lock.release();
        debug!(rule = %rule, prepared, "checked out");
    }

    /// Whether the calling thread's last check-in failed.
    ///
    /// Reading the flag clears it. When `true`, the rule has been released if
    /// it was still held, and the caller must skip [`check_out`](Self::check_out).
    pub fn check_in_failed(&self, rule: &Rule) -> bool {
        let Some(kind) = self.check_in_failures.take() else {
            return false;
        };
        // Only a lock failure leaves the rule begun
        if kind == ErrorKind::LockAcquisition && !self.tree.is_tree_locked() {
            end_rule_logged(self.scheduler.as_ref(), rule);
        }
        true
    }

    /// Check in and hand back a guard that checks out when dropped.
    ///
    /// On failure the compensating [`check_in_failed`](Self::check_in_failed)
    /// has already run.
    pub fn begin_operation(
        &self,
        rule: &Rule,
        monitor: &dyn CancellationMonitor,
    ) -> Result<OperationGuard<'_>> {
        match self.check_in(rule, monitor) {
            Ok(()) => Ok(OperationGuard::new(self, Arc::clone(rule))),
            Err(err) => {
                self.check_in_failed(rule);
                Err(err)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // UNPROTECTED SECTIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Fully release the operation lock without touching the depth counters.
    ///
    /// Returns the depth that was held; pass it to
    /// [`end_unprotected`](Self::end_unprotected) on the same thread. The pair
    /// must sit inside one check-in/check-out span and the tree must not be
    /// mutated in between.
    pub fn begin_unprotected(&self) -> u32 {
        let depth = self.lock.depth();
        for _ in 0..depth {
            self.lock.release();
        }
        trace!(depth, "unprotected section begun");
        depth
    }

    /// Re-acquire `depth` levels released by [`begin_unprotected`](Self::begin_unprotected).
    pub fn end_unprotected(&self, depth: u32) {
        for _ in 0..depth {
            self.lock.acquire();
        }
        trace!(depth, "unprotected section ended");
    }

    /// Whether the calling thread already holds the operation lock. Never blocks.
    pub fn is_lock_already_acquired(&self) -> bool {
        if !self.lock.acquire_timeout(Duration::ZERO) {
            return false;
        }
        // Depth includes the probe's own acquisition
        let already_held = self.lock.depth() > 1;
        self.lock.release();
        already_held
    }

    // ═══════════════════════════════════════════════════════════════════════
    // NESTING
    // ═══════════════════════════════════════════════════════════════════════

    /// Count a logical operation that has actually begun.
    pub fn increment_nested_operations(&self) {
        self.state().increment_nested();
    }

    pub fn is_balanced(&self) -> bool {
        self.state().depth.balanced()
    }

    /// Recover after an operation failed between check-in and begin.
    pub fn rebalance_nested_operations(&self) {
        self.state().depth.rebalance();
    }

    pub fn prepared_operation_depth(&self) -> u32 {
        self.state().depth.prepared
    }

    pub fn operation_depth(&self) -> OperationDepth {
        self.state().depth
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BUILD TRIGGER
    // ═══════════════════════════════════════════════════════════════════════

    /// Record whether the operation just completed may require a build.
    pub fn set_build(&self, has_changes: bool) {
        self.state().set_build(has_changes);
    }

    pub fn operation_canceled(&self) {
        self.state().operation_canceled();
    }

    /// Whether a build should run once the outer operation completes.
    pub fn should_build(&self) -> bool {
        self.state().build.should_build(self.policy)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    /// The rule to hold while broadcasting resource change notifications.
    pub fn notify_rule(&self) -> Rule {
        Arc::clone(&self.notify_rule)
    }

    pub const fn lock(&self) -> &OperationLock {
        &self.lock
    }
}

impl fmt::Debug for WorkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkManager")
            .field("lock", &self.lock)
            .field("state", &*self.state())
            .field("policy", &self.policy)
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

/// Ends the rule when dropped, including during unwinding.
struct EndRuleOnDrop<'a> {
    scheduler: &'a dyn RuleScheduler,
    rule: &'a Rule,
}

impl Drop for EndRuleOnDrop<'_> {
    fn drop(&mut self) {
        end_rule_logged(self.scheduler, self.rule);
    }
}

// Rule release failures are logged and swallowed: the lock is already released
// and the caller has no way to compensate.
fn end_rule_logged(scheduler: &dyn RuleScheduler, rule: &Rule) {
    if let Err(err) = scheduler.end_rule(rule) {
        warn!(rule = %rule, "failed to end rule: {err}");
    }
}
