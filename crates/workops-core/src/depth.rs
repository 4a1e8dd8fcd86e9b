//! Operation depth and build bookkeeping
//!
//! Two counters track each outer operation:
//! - `prepared`: successful check-ins not yet checked out
//! - `nested`: logical operations actually begun by higher-level code
//!
//! `nested <= prepared` holds except transiently after a failure between
//! check-in and begin; [`OperationDepth::rebalance`] repairs the drift.
//! The build flags live for one outer operation and reset when `prepared`
//! returns to zero.

use crate::config::BuildPolicy;

/// Prepared and nested operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationDepth {
    /// Successful check-ins not yet checked out
    pub prepared: u32,
    /// Logical operations actually begun
    pub nested: u32,
}

impl OperationDepth {
    /// Whether every prepared operation has been begun.
    #[must_use]
    pub const fn balanced(&self) -> bool {
        self.nested == self.prepared
    }

    /// Force `nested` back to `prepared`.
    pub fn rebalance(&mut self) {
        self.nested = self.prepared;
    }
}

/// Accumulated build decision for the current outer operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildState {
    /// Some operation reported changes that may require a build
    pub has_changes: bool,
    /// The operation was canceled
    pub canceled: bool,
}

impl BuildState {
    /// Whether a build should run once the outer operation completes.
    #[must_use]
    pub const fn should_build(&self, policy: BuildPolicy) -> bool {
        self.has_changes && (!self.canceled || policy.build_on_cancel)
    }
}

/// Everything guarded by the work manager's short internal mutex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationState {
    pub depth: OperationDepth,
    pub build: BuildState,
}

impl OperationState {
    /// Record a successful check-in, returning the new prepared depth.
    pub fn increment_prepared(&mut self) -> u32 {
        self.depth.prepared += 1;
        self.depth.prepared
    }

    /// Record a check-out, returning the remaining prepared depth.
    ///
    /// # Panics
    ///
    /// Panics when no operation is prepared: check-out without a matching
    /// check-in is a programming error.
    pub fn decrement_prepared(&mut self) -> u32 {
        assert!(
            self.depth.prepared > 0,
            "unbalanced check-out: no prepared operation"
        );
        self.depth.prepared -= 1;
        self.depth.prepared
    }

    pub fn increment_nested(&mut self) {
        self.depth.nested += 1;
    }

    /// Reset the build state when the outermost operation has checked out.
    ///
    /// Returns `true` when the transaction boundary was reached.
    pub fn close_if_outermost(&mut self) -> bool {
        if self.depth.prepared != 0 {
            return false;
        }
        self.depth = OperationDepth::default();
        self.build = BuildState::default();
        true
    }

    /// OR `has_changes` into the current outer operation.
    pub fn set_build(&mut self, has_changes: bool) {
        self.build.has_changes |= has_changes;
    }

    pub fn operation_canceled(&mut self) {
        self.build.canceled = true;
    }
}
