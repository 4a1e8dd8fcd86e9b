//! Rule scheduling
//!
//! [`RuleScheduler`] is the seam toward whatever arbitrates scheduling rules
//! between threads. [`ThreadRuleScheduler`] is the in-process implementation:
//! one rule stack per thread, conflicting requests from other threads wait on
//! a condition variable and poll their cancellation monitor.
//!
//! # Nesting
//!
//! A thread that already holds a rule may only begin rules its innermost rule
//! contains. While the innermost rule is the notification rule, beginning any
//! other rule fails immediately: the notifying thread owns the operation lock
//! and blocking it on a rule would deadlock.

use std::{
    collections::HashMap,
    fmt,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
    time::Duration,
};

use tracing::{debug, trace};

use crate::{
    error::{BeginRuleError, EndRuleError},
    monitor::CancellationMonitor,
    rule::{same_rule, Rule, RuleKind},
};

/// How often a blocked `begin_rule` re-checks its cancellation monitor.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Arbitrates scheduling rules between threads.
pub trait RuleScheduler: Send + Sync {
    /// Begin `rule` on the calling thread, blocking while it conflicts with
    /// rules held elsewhere. On error the rule is not held.
    fn begin_rule(&self, rule: &Rule, monitor: &dyn CancellationMonitor)
        -> Result<(), BeginRuleError>;

    /// End the innermost rule begun by the calling thread.
    fn end_rule(&self, rule: &Rule) -> Result<(), EndRuleError>;
}

/// In-process scheduler keeping a rule stack per thread.
pub struct ThreadRuleScheduler {
    held: Mutex<HashMap<ThreadId, Vec<Rule>>>,
    changed: Condvar,
    poll_interval: Duration,
}

impl ThreadRuleScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Create a scheduler whose blocked waiters re-check cancellation every `interval`.
    #[must_use]
    pub fn with_poll_interval(interval: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
            poll_interval: interval,
        }
    }

    fn held(&self) -> MutexGuard<'_, HashMap<ThreadId, Vec<Rule>>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Innermost rule held by the calling thread.
    #[must_use]
    pub fn current_rule(&self) -> Option<Rule> {
        self.held()
            .get(&thread::current().id())
            .and_then(|stack| stack.last().cloned())
    }

    /// Number of threads currently holding at least one rule.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.held().len()
    }
}

impl Default for ThreadRuleScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ThreadRuleScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRuleScheduler")
            .field("active_threads", &self.active_threads())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

fn nested_check(outer: &Rule, rule: &Rule) -> Result<(), BeginRuleError> {
    if outer.kind() == RuleKind::Notification && rule.kind() != RuleKind::Notification {
        return Err(BeginRuleError::Conflict {
            held: outer.to_string(),
            requested: rule.to_string(),
        });
    }
    if !outer.contains(rule.as_ref()) {
        return Err(BeginRuleError::NotContained {
            held: outer.to_string(),
            requested: rule.to_string(),
        });
    }
    Ok(())
}

fn conflicts_elsewhere(held: &HashMap<ThreadId, Vec<Rule>>, me: ThreadId, rule: &Rule) -> bool {
    held.iter()
        .filter(|(owner, _)| **owner != me)
        .flat_map(|(_, stack)| stack.iter())
        .any(|other| rule.is_conflicting(other.as_ref()) || other.is_conflicting(rule.as_ref()))
}

impl RuleScheduler for ThreadRuleScheduler {
    fn begin_rule(
        &self,
        rule: &Rule,
        monitor: &dyn CancellationMonitor,
    ) -> Result<(), BeginRuleError> {
        let me = thread::current().id();
        let mut held = self.held();

        if let Some(outer) = held.get(&me).and_then(|stack| stack.last()) {
            nested_check(outer, rule)?;
            held.entry(me).or_default().push(rule.clone());
            trace!(rule = %rule, "nested rule begun");
            return Ok(());
        }

        loop {
            if monitor.is_canceled() {
                debug!(rule = %rule, "rule wait canceled");
                return Err(BeginRuleError::Canceled);
            }
            if !conflicts_elsewhere(&held, me, rule) {
                held.entry(me).or_default().push(rule.clone());
                trace!(rule = %rule, "rule begun");
                return Ok(());
            }
            held = self
                .changed
                .wait_timeout(held, self.poll_interval)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn end_rule(&self, rule: &Rule) -> Result<(), EndRuleError> {
        let me = thread::current().id();
        let mut held = self.held();
        let stack = held.get_mut(&me).ok_or(EndRuleError::NotHeld)?;

        match stack.last() {
            None => return Err(EndRuleError::NotHeld),
            Some(innermost) if !same_rule(innermost, rule) => {
                return Err(EndRuleError::OutOfOrder {
                    ending: rule.to_string(),
                    innermost: innermost.to_string(),
                });
            }
            Some(_) => {}
        }

        stack.pop();
        trace!(rule = %rule, "rule ended");
        if stack.is_empty() {
            held.remove(&me);
            drop(held);
            self.changed.notify_all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{mpsc, Arc},
        time::Duration,
    };

    use super::*;
    use crate::{
        monitor::{CancelFlag, NeverCancel},
        rule::{NotificationRule, ResourceRule},
    };

    fn resource(path: &str) -> Rule {
        Arc::new(ResourceRule::new(path))
    }

    #[test]
    fn test_begin_and_end_single_rule() {
        let scheduler = ThreadRuleScheduler::new();
        let rule = resource("/a");

        scheduler.begin_rule(&rule, &NeverCancel).unwrap();
        assert!(same_rule(&scheduler.current_rule().unwrap(), &rule));

        scheduler.end_rule(&rule).unwrap();
        assert!(scheduler.current_rule().is_none());
        assert_eq!(scheduler.active_threads(), 0);
    }

    #[test]
    fn test_nested_rule_must_be_contained() {
        let scheduler = ThreadRuleScheduler::new();
        let outer = resource("/a");
        let inner = resource("/a/b");
        let outside = resource("/c");

        scheduler.begin_rule(&outer, &NeverCancel).unwrap();
        scheduler.begin_rule(&inner, &NeverCancel).unwrap();
        let err = scheduler.begin_rule(&outside, &NeverCancel).unwrap_err();
        assert!(matches!(err, BeginRuleError::NotContained { .. }));

        scheduler.end_rule(&inner).unwrap();
        scheduler.end_rule(&outer).unwrap();
    }

    #[test]
    fn test_end_out_of_order_is_rejected() {
        let scheduler = ThreadRuleScheduler::new();
        let outer = resource("/a");
        let inner = resource("/a/b");

        scheduler.begin_rule(&outer, &NeverCancel).unwrap();
        scheduler.begin_rule(&inner, &NeverCancel).unwrap();
        assert!(matches!(
            scheduler.end_rule(&outer),
            Err(EndRuleError::OutOfOrder { .. })
        ));

        scheduler.end_rule(&inner).unwrap();
        scheduler.end_rule(&outer).unwrap();
        assert_eq!(scheduler.end_rule(&outer), Err(EndRuleError::NotHeld));
    }

    #[test]
    fn test_resource_rule_during_notification_fails_immediately() {
        let scheduler = ThreadRuleScheduler::new();
        let project = resource("/p");
        let notify: Rule = Arc::new(NotificationRule);

        scheduler.begin_rule(&project, &NeverCancel).unwrap();
        scheduler.begin_rule(&notify, &NeverCancel).unwrap();
        let err = scheduler
            .begin_rule(&resource("/p/file"), &NeverCancel)
            .unwrap_err();
        assert!(matches!(err, BeginRuleError::Conflict { .. }));

        scheduler.end_rule(&notify).unwrap();
        scheduler.end_rule(&project).unwrap();
    }

    #[test]
    fn test_conflicting_rule_waits_for_other_thread() {
        let scheduler = Arc::new(ThreadRuleScheduler::with_poll_interval(
            Duration::from_millis(5),
        ));
        let rule = resource("/shared");
        scheduler.begin_rule(&rule, &NeverCancel).unwrap();

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&scheduler);
        let handle = thread::spawn(move || {
            let child = resource("/shared/child");
            other.begin_rule(&child, &NeverCancel).unwrap();
            tx.send(()).unwrap();
            other.end_rule(&child).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        scheduler.end_rule(&rule).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_disjoint_rules_proceed_in_parallel() {
        let scheduler = Arc::new(ThreadRuleScheduler::new());
        let left = resource("/left");
        scheduler.begin_rule(&left, &NeverCancel).unwrap();

        let other = Arc::clone(&scheduler);
        thread::spawn(move || {
            let right = resource("/right");
            other.begin_rule(&right, &NeverCancel).unwrap();
            other.end_rule(&right).unwrap();
        })
        .join()
        .unwrap();

        scheduler.end_rule(&left).unwrap();
    }

    #[test]
    fn test_blocked_wait_observes_cancellation() {
        let scheduler = Arc::new(ThreadRuleScheduler::with_poll_interval(
            Duration::from_millis(5),
        ));
        let rule = resource("/busy");
        scheduler.begin_rule(&rule, &NeverCancel).unwrap();

        let cancel = Arc::new(CancelFlag::new());
        let other = Arc::clone(&scheduler);
        let monitor = Arc::clone(&cancel);
        let handle = thread::spawn(move || other.begin_rule(&resource("/busy"), monitor.as_ref()));

        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert_eq!(handle.join().unwrap(), Err(BeginRuleError::Canceled));
        assert_eq!(scheduler.active_threads(), 1);

        scheduler.end_rule(&rule).unwrap();
    }
}
