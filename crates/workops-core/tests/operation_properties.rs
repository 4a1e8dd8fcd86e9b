//! Property-based tests for operation bookkeeping using proptest.
//!
//! Properties tested:
//! 1. N check-ins followed by N check-outs return to zero depth
//! 2. Unprotected sections restore the exact lock depth
//! 3. Build changes are sticky within one outer operation
//! 4. The notification rule conflicts with every resource rule

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{resource, Harness};
use proptest::prelude::*;
use workops_core::{
    NeverCancel, NotificationRule, OperationConfig, ResourceRule, SchedulingRule,
};

// =============================================================================
// STRATEGIES
// =============================================================================

/// Strategy for generating workspace-relative resource paths
fn resource_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-zA-Z0-9_.-]{1,12}", 0..6).prop_map(|segments| {
        format!("/{}", segments.join("/"))
    })
}

/// Strategy for a sequence of `set_build` arguments with at least one `true`
fn build_calls_strategy() -> impl Strategy<Value = Vec<bool>> {
    (
        prop::collection::vec(any::<bool>(), 0..8),
        any::<prop::sample::Index>(),
    )
        .prop_map(|(mut calls, at)| {
            let position = at.index(calls.len() + 1);
            calls.insert(position, true);
            calls
        })
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_balanced_check_in_check_out(n in 1u32..16) {
        let h = Harness::new();
        let rule = resource("/project");

        for expected in 1..=n {
            h.manager.check_in(&rule, &NeverCancel).unwrap();
            prop_assert_eq!(h.manager.prepared_operation_depth(), expected);
            prop_assert_eq!(h.manager.lock().depth(), expected);
        }
        for _ in 0..n {
            h.manager.check_out(&rule);
        }

        prop_assert_eq!(h.manager.prepared_operation_depth(), 0);
        prop_assert_eq!(h.manager.lock().depth(), 0);
        prop_assert!(h.scheduler.current_rule().is_none());
    }

    #[test]
    fn prop_unprotected_round_trip(depth in 1u32..12) {
        let h = Harness::new();
        let rule = resource("/project");
        for _ in 0..depth {
            h.manager.check_in(&rule, &NeverCancel).unwrap();
        }

        let released = h.manager.begin_unprotected();
        prop_assert_eq!(released, depth);
        prop_assert_eq!(h.manager.lock().depth(), 0);
        prop_assert_eq!(h.manager.prepared_operation_depth(), depth);
        h.manager.end_unprotected(released);
        prop_assert_eq!(h.manager.lock().depth(), depth);

        for _ in 0..depth {
            h.manager.check_out(&rule);
        }
    }

    #[test]
    fn prop_build_is_sticky_within_outer_operation(
        calls in build_calls_strategy(),
        nesting in 1u32..5,
        trailing_false in 0usize..4,
    ) {
        let h = Harness::new();
        let rule = resource("/project");
        for _ in 0..nesting {
            h.manager.check_in(&rule, &NeverCancel).unwrap();
        }

        for has_changes in calls {
            h.manager.set_build(has_changes);
        }
        for _ in 0..trailing_false {
            h.manager.set_build(false);
        }
        prop_assert!(h.manager.should_build());

        // Still sticky after inner check-outs
        for _ in 1..nesting {
            h.manager.check_out(&rule);
            prop_assert!(h.manager.should_build());
        }
        h.manager.check_out(&rule);
        prop_assert!(!h.manager.should_build());
    }

    #[test]
    fn prop_cancel_policy_decides_build(build_on_cancel in any::<bool>()) {
        let h = Harness::with_config(OperationConfig {
            build_on_cancel,
            ..OperationConfig::default()
        });
        let rule = resource("/project");
        h.manager.check_in(&rule, &NeverCancel).unwrap();

        h.manager.set_build(true);
        h.manager.operation_canceled();
        prop_assert_eq!(h.manager.should_build(), build_on_cancel);

        h.manager.check_out(&rule);
    }

    #[test]
    fn prop_notification_conflicts_with_any_resource(path in resource_path_strategy()) {
        let rule = ResourceRule::new(&path);
        prop_assert!(NotificationRule.is_conflicting(&rule));
        prop_assert!(NotificationRule.contains(&rule));
        prop_assert!(NotificationRule.is_conflicting(&NotificationRule));
        prop_assert!(rule.contains(&NotificationRule));
    }

    #[test]
    fn prop_resource_rule_contains_descendants(
        parent in resource_path_strategy(),
        child in "[a-z]{1,8}",
    ) {
        let parent_rule = ResourceRule::new(&parent);
        let child_rule = ResourceRule::new(format!("{parent}/{child}"));
        prop_assert!(parent_rule.contains(&child_rule));
        prop_assert!(!child_rule.contains(&parent_rule));
        prop_assert!(parent_rule.is_conflicting(&child_rule));
        prop_assert!(child_rule.is_conflicting(&parent_rule));
    }
}
