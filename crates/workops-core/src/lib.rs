//! # Workops Core
//!
//! Concurrency control for operations that mutate a shared workspace tree.
//!
//! This crate provides:
//! - A manually managed re-entrant operation lock
//! - Check-in / check-out bookkeeping (prepared and nested operation depth)
//! - A per-thread check-in failure flag
//! - Build triggering at outer operation boundaries
//! - The notification scheduling rule used during change broadcasts
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! Unbalanced lock release and unbalanced check-out are programmer errors
//! and abort the calling thread through `assert!`.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use workops_core::{
//!     NeverCancel, OperationConfig, ResourceRule, Rule, ThreadRuleScheduler, TreeLockFlag,
//!     WorkManager,
//! };
//!
//! let manager = WorkManager::new(
//!     Arc::new(ThreadRuleScheduler::new()),
//!     Arc::new(TreeLockFlag::new()),
//!     OperationConfig::default(),
//! );
//! let rule: Rule = Arc::new(ResourceRule::new("/project/src"));
//!
//! let operation = manager.begin_operation(&rule, &NeverCancel)?;
//! manager.set_build(true);
//! assert!(manager.should_build());
//! drop(operation);
//! assert_eq!(manager.prepared_operation_depth(), 0);
//! # Ok::<(), workops_core::Error>(())
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod depth;
pub mod error;
pub mod failure;
pub mod guard;
pub mod lock;
pub mod monitor;
pub mod rule;
pub mod scheduler;
pub mod tree;
pub mod work_manager;

pub use config::{BuildPolicy, OperationConfig};
pub use depth::{BuildState, OperationDepth, OperationState};
pub use error::{BeginRuleError, EndRuleError, Error, ErrorKind, Result};
pub use failure::FailureFlags;
pub use guard::{OperationGuard, UnprotectedGuard};
pub use lock::{LockState, OperationLock};
pub use monitor::{CancelFlag, CancellationMonitor, NeverCancel};
pub use rule::{NotificationRule, ResourceRule, Rule, RuleKind, SchedulingRule};
pub use scheduler::{RuleScheduler, ThreadRuleScheduler};
pub use tree::{TreeLock, TreeLockFlag};
pub use work_manager::WorkManager;
