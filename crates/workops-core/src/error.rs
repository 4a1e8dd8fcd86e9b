//! Error types for workops-core
//!
//! Errors are tags for the calling layer, never messages for an end user:
//! - **Acquisition errors**: the workspace tree is locked, the scheduling
//!   rule could not be begun, or the operation lock could not be taken
//! - **Configuration errors**: invalid config files or environment overrides
//!
//! Unbalanced releases are not represented here; they are fatal and abort
//! the calling thread.

use thiserror::Error;

/// Core error type for workspace operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A check-in was attempted while change notification holds the tree lock
    #[error("Workspace locked: the resource tree cannot be modified during change notification")]
    WorkspaceLocked,

    /// The scheduler failed to begin the rule; the rule is not held
    #[error("Rule acquisition failed for {rule}: {reason}")]
    RuleAcquisition {
        /// Description of the rule that was requested
        rule: String,
        /// Why the scheduler refused or gave up
        reason: BeginRuleError,
    },

    /// The rule was begun but the operation lock was not obtained; the rule is still held
    #[error("Operation lock acquisition failed for {rule}: {reason}")]
    LockAcquisition {
        /// Description of the rule that is still held
        rule: String,
        /// Why the lock could not be obtained
        reason: String,
    },

    /// Invalid configuration value
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Filesystem errors while loading configuration
    #[error("IO error: {0}")]
    Io(String),
}

/// Stable kind tag for each [`Error`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    WorkspaceLocked,
    RuleAcquisition,
    LockAcquisition,
    InvalidConfig,
    Io,
}

impl Error {
    /// The kind tag of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::WorkspaceLocked => ErrorKind::WorkspaceLocked,
            Self::RuleAcquisition { .. } => ErrorKind::RuleAcquisition,
            Self::LockAcquisition { .. } => ErrorKind::LockAcquisition,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the scheduling rule is still held after this error.
    ///
    /// Only a lock acquisition failure leaves the rule held; callers release it
    /// through `WorkManager::check_in_failed`.
    #[must_use]
    pub const fn rule_still_held(&self) -> bool {
        matches!(self, Self::LockAcquisition { .. })
    }
}

/// Why a [`RuleScheduler`](crate::RuleScheduler) could not begin a rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BeginRuleError {
    /// The cancellation monitor reported cancellation during the rule wait
    #[error("canceled while waiting for rule")]
    Canceled,

    /// A nested rule was not contained by the rule the thread already holds
    #[error("nested rule {requested} is not contained by held rule {held}")]
    NotContained {
        /// The rule currently held by the thread
        held: String,
        /// The rule that was requested
        requested: String,
    },

    /// The thread is broadcasting notifications and may not begin a resource rule
    #[error("rule {requested} conflicts with {held} held by the calling thread")]
    Conflict {
        /// The rule currently held by the thread
        held: String,
        /// The rule that was requested
        requested: String,
    },

    /// Any other scheduler-specific failure
    #[error("{0}")]
    Failed(String),
}

/// Why a [`RuleScheduler`](crate::RuleScheduler) could not end a rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndRuleError {
    /// The calling thread does not hold any rule
    #[error("no rule held by the calling thread")]
    NotHeld,

    /// The rule being ended is not the innermost rule the thread holds
    #[error("rule {ending} ended out of order, innermost held rule is {innermost}")]
    OutOfOrder {
        /// The rule passed to `end_rule`
        ending: String,
        /// The rule the thread began most recently
        innermost: String,
    },
}

/// Result type alias for workops-core operations
pub type Result<T> = std::result::Result<T, Error>;
