//! Common test utilities and relaxed clippy settings for workops-core integration tests

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::missing_panics_doc
)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use workops_core::{
    BeginRuleError, CancellationMonitor, EndRuleError, OperationConfig, ResourceRule, Rule,
    RuleScheduler, ThreadRuleScheduler, TreeLockFlag, WorkManager,
};

/// Install a test subscriber honoring `RUST_LOG`; repeated calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn resource(path: &str) -> Rule {
    Arc::new(ResourceRule::new(path))
}

/// A manager wired to an in-process scheduler, with handles to its collaborators.
pub struct Harness {
    pub manager: Arc<WorkManager>,
    pub scheduler: Arc<ThreadRuleScheduler>,
    pub tree: Arc<TreeLockFlag>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OperationConfig::default())
    }

    pub fn with_config(config: OperationConfig) -> Self {
        init_tracing();
        let scheduler = Arc::new(ThreadRuleScheduler::new());
        let tree = Arc::new(TreeLockFlag::new());
        let manager = Arc::new(WorkManager::new(scheduler.clone(), tree.clone(), config));
        Self {
            manager,
            scheduler,
            tree,
        }
    }
}

/// Scheduler whose `begin_rule` always fails; counts `end_rule` calls.
#[derive(Debug, Default)]
pub struct RefusingScheduler {
    pub ended: AtomicUsize,
}

impl RuleScheduler for RefusingScheduler {
    fn begin_rule(
        &self,
        _rule: &Rule,
        _monitor: &dyn CancellationMonitor,
    ) -> Result<(), BeginRuleError> {
        Err(BeginRuleError::Failed("scheduler refused".into()))
    }

    fn end_rule(&self, _rule: &Rule) -> Result<(), EndRuleError> {
        self.ended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scheduler that grants every rule but fails every `end_rule`.
#[derive(Debug, Default)]
pub struct FailingEndScheduler {
    pub ended: AtomicUsize,
}

impl RuleScheduler for FailingEndScheduler {
    fn begin_rule(
        &self,
        _rule: &Rule,
        _monitor: &dyn CancellationMonitor,
    ) -> Result<(), BeginRuleError> {
        Ok(())
    }

    fn end_rule(&self, _rule: &Rule) -> Result<(), EndRuleError> {
        self.ended.fetch_add(1, Ordering::SeqCst);
        Err(EndRuleError::NotHeld)
    }
}
