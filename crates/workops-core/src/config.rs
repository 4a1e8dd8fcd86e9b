//! Configuration loading
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. A TOML file passed to [`OperationConfig::load`]
//! 3. Environment variables: `WORKOPS_*`
//!
//! # Example Config
//!
//! ```toml
//! build_on_cancel = true
//! lock_timeout_ms = 30000
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment override for [`OperationConfig::build_on_cancel`]
pub const ENV_BUILD_ON_CANCEL: &str = "WORKOPS_BUILD_ON_CANCEL";
/// Environment override for [`OperationConfig::lock_timeout_ms`]; `0` or `none` disables the timeout
pub const ENV_LOCK_TIMEOUT_MS: &str = "WORKOPS_LOCK_TIMEOUT_MS";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationConfig {
    /// Whether a canceled operation with changes still triggers a build
    pub build_on_cancel: bool,
    /// Upper bound on the operation lock wait during check-in.
    ///
    /// Unset means the wait is unbounded. When set, a check-in that holds its
    /// rule but cannot obtain the lock in time fails with a lock acquisition
    /// error and the rule must be released through `check_in_failed`.
    pub lock_timeout_ms: Option<u64>,
}

/// Read-only build policy consulted by `should_build`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildPolicy {
    pub build_on_cancel: bool,
}

impl OperationConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {e}")))
    }

    /// Load a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Apply `WORKOPS_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(ENV_BUILD_ON_CANCEL) {
            self.build_on_cancel = parse_bool(ENV_BUILD_ON_CANCEL, &value)?;
        }
        if let Some(value) = lookup(ENV_LOCK_TIMEOUT_MS) {
            self.lock_timeout_ms = parse_timeout(&value)?;
        }
        Ok(self)
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub const fn build_policy(&self) -> BuildPolicy {
        BuildPolicy {
            build_on_cancel: self.build_on_cancel,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig(format!(
            "Invalid boolean for {key}: {value}. Must be one of: true, false, 1, 0, yes, no"
        ))),
    }
}

fn parse_timeout(value: &str) -> Result<Option<u64>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    value
        .parse::<u64>()
        .map(|ms| (ms > 0).then_some(ms))
        .map_err(|e| {
            Error::InvalidConfig(format!("Invalid {ENV_LOCK_TIMEOUT_MS}: {value} ({e})"))
        })
}
