//! Scheduling rules
//!
//! A scheduling rule identifies the scope an operation intends to mutate.
//! Two rules conflict when their scopes overlap. Resource rules are
//! hierarchical paths; the notification rule conflicts with every resource
//! rule and with itself.

use std::{fmt, sync::Arc};

/// Shared handle to a scheduling rule.
///
/// Schedulers compare rules by identity (see [`same_rule`]).
pub type Rule = Arc<dyn SchedulingRule>;

/// Category of a scheduling rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RuleKind {
    /// Identified by a resource path
    Resource,
    /// The change-notification rule
    Notification,
    /// Any other caller-defined rule
    Other,
}

/// Capability shared by every rule the scheduler arbitrates.
pub trait SchedulingRule: fmt::Debug + fmt::Display + Send + Sync {
    /// Whether `other` may nest inside this rule on the same thread.
    fn contains(&self, other: &dyn SchedulingRule) -> bool;

    /// Whether this rule and `other` may not be held by different threads at once.
    fn is_conflicting(&self, other: &dyn SchedulingRule) -> bool;

    fn kind(&self) -> RuleKind {
        RuleKind::Other
    }

    /// Workspace path for resource rules.
    fn resource_path(&self) -> Option<&str> {
        None
    }
}

/// Identity comparison for rule handles.
#[must_use]
pub fn same_rule(a: &Rule, b: &Rule) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// Rule covering a resource and everything beneath it.
///
/// Paths are absolute, `/`-separated, and normalized without a trailing
/// separator. `/` is the workspace root and contains every resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRule {
    path: String,
}

impl ResourceRule {
    /// Create a rule for `path`, normalizing separators.
    #[must_use]
    pub fn new(path: impl AsRef<str>) -> Self {
        let segments: Vec<&str> = path
            .as_ref()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        Self {
            path: format!("/{}", segments.join("/")),
        }
    }

    /// Rule for the workspace root.
    #[must_use]
    pub fn root() -> Self {
        Self::new("/")
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn is_prefix_of(&self, other: &str) -> bool {
        if self.path == "/" {
            return other.starts_with('/');
        }
        other
            .strip_prefix(self.path.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

impl SchedulingRule for ResourceRule {
    fn contains(&self, other: &dyn SchedulingRule) -> bool {
        match other.kind() {
            // Notifications must nest inside resource rules of any granularity
            RuleKind::Notification => true,
            _ => other
                .resource_path()
                .is_some_and(|path| self.is_prefix_of(path)),
        }
    }

    fn is_conflicting(&self, other: &dyn SchedulingRule) -> bool {
        other.resource_path().is_some_and(|path| {
            self.is_prefix_of(path) || Self::new(path).is_prefix_of(&self.path)
        })
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Resource
    }

    fn resource_path(&self) -> Option<&str> {
        Some(&self.path)
    }
}

impl fmt::Display for ResourceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Rule held while broadcasting resource change notifications.
///
/// It conflicts with every resource rule and with itself, so no other
/// resource-changing operation can be scheduled while a notification runs.
/// The notifying thread already owns the operation lock and must never block
/// on a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationRule;

impl SchedulingRule for NotificationRule {
    fn contains(&self, other: &dyn SchedulingRule) -> bool {
        matches!(other.kind(), RuleKind::Resource | RuleKind::Notification)
    }

    fn is_conflicting(&self, other: &dyn SchedulingRule) -> bool {
        self.contains(other)
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Notification
    }
}

impl fmt::Display for NotificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("notification")
    }
}
