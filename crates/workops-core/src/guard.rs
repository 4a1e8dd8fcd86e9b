//! RAII guards over check-out and unprotected sections
//!
//! Lock ownership is per thread, so neither guard may leave the thread that
//! created it.

use std::{fmt, marker::PhantomData};

use crate::{rule::Rule, work_manager::WorkManager};

// Raw pointers are neither Send nor Sync.
type NotSend = PhantomData<*const ()>;

/// A checked-in operation; checks out exactly once when dropped.
#[must_use = "dropping the guard immediately checks the operation out"]
pub struct OperationGuard<'a> {
    manager: &'a WorkManager,
    rule: Rule,
    _not_send: NotSend,
}

impl<'a> OperationGuard<'a> {
    pub(crate) const fn new(manager: &'a WorkManager, rule: Rule) -> Self {
        Self {
            manager,
            rule,
            _not_send: PhantomData,
        }
    }

    /// The rule this operation holds.
    pub const fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Release the operation lock until the returned guard is dropped.
    ///
    /// Use around callouts to code this thread does not control, such as
    /// change listeners. The tree must not be mutated while unprotected.
    ///
    /// The unprotected guard borrows this guard, so the operation cannot be
    /// checked out while its lock is released:
    ///
    /// ```compile_fail,E0505
    /// # use std::sync::Arc;
    /// # use workops_core::{
    /// #     NeverCancel, OperationConfig, ResourceRule, Rule, ThreadRuleScheduler, TreeLockFlag,
    /// #     WorkManager,
    /// # };
    /// # let manager = WorkManager::new(
    /// #     Arc::new(ThreadRuleScheduler::new()),
    /// #     Arc::new(TreeLockFlag::new()),
    /// #     OperationConfig::default(),
    /// # );
    /// # let rule: Rule = Arc::new(ResourceRule::new("/project"));
    /// let operation = manager.begin_operation(&rule, &NeverCancel)?;
    /// let unprotected = operation.unprotected();
    /// drop(operation);
    /// drop(unprotected);
    /// # Ok::<(), workops_core::Error>(())
    /// ```
    pub fn unprotected(&self) -> UnprotectedGuard<'_> {
        UnprotectedGuard {
            manager: self.manager,
            depth: self.manager.begin_unprotected(),
            _not_send: PhantomData,
        }
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.manager.check_out(&self.rule);
    }
}

impl fmt::Debug for OperationGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationGuard")
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}

/// Restores the released lock depth when dropped.
#[must_use = "dropping the guard immediately re-acquires the lock"]
pub struct UnprotectedGuard<'a> {
    manager: &'a WorkManager,
    depth: u32,
    _not_send: NotSend,
}

impl UnprotectedGuard<'_> {
    /// Lock depth that will be restored.
    pub const fn depth(&self) -> u32 {
        self.depth
    }
}

impl Drop for UnprotectedGuard<'_> {
    fn drop(&mut self) {
        self.manager.end_unprotected(self.depth);
    }
}

impl fmt::Debug for UnprotectedGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnprotectedGuard")
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
