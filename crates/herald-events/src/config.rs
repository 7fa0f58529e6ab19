//! Dispatch configuration.
//!
//! Every [`Event`](crate::Event) carries a [`DispatchConfig`]. Events built
//! with [`Event::new`](crate::Event::new) share the process-wide config, which
//! is read once from the environment:
//!
//! - `HERALD_CYCLE_POLICY`: `detect` (default) or `unchecked`
//! - `HERALD_PRUNE_ON_DISPATCH`: `true` (default) or `false`
//! - `HERALD_MAX_DEPTH`: maximum dependency-graph depth (default 64)

use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DispatchError, Result};

/// Environment variable for the cycle policy.
pub const CYCLE_POLICY_ENV: &str = "HERALD_CYCLE_POLICY";

/// Environment variable toggling opportunistic pruning during dispatch.
pub const PRUNE_ON_DISPATCH_ENV: &str = "HERALD_PRUNE_ON_DISPATCH";

/// Environment variable for the maximum dependency-graph depth.
pub const MAX_DEPTH_ENV: &str = "HERALD_MAX_DEPTH";

const DEFAULT_MAX_DEPTH: usize = 64;

static GLOBAL_CONFIG: OnceLock<DispatchConfig> = OnceLock::new();

/// How dependency expansion treats an event that is already on the current path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Fail the raise with [`DispatchError::DependencyCycle`].
    #[default]
    Detect,
    /// Keep expanding; only `max_depth` stops a cyclic graph.
    Unchecked,
}

impl FromStr for CyclePolicy {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detect" => Ok(CyclePolicy::Detect),
            "unchecked" => Ok(CyclePolicy::Unchecked),
            other => Err(DispatchError::Config(format!(
                "unknown cycle policy '{}'",
                other
            ))),
        }
    }
}

/// Tunables for queue building and dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Cycle handling during dependency expansion.
    pub cycle_policy: CyclePolicy,
    /// Drop stale ephemeral registrations while snapshotting for dispatch.
    ///
    /// Only affects when stale entries leave the tables. They are skipped
    /// during dispatch either way.
    pub prune_on_dispatch: bool,
    /// Deepest dependency chain a single raise may expand under
    /// [`CyclePolicy::Unchecked`]. Ignored while cycles are detected.
    pub max_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cycle_policy: CyclePolicy::Detect,
            prune_on_dispatch: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl DispatchConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cycle policy.
    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    /// Sets whether dispatch prunes stale ephemeral registrations.
    pub fn with_prune_on_dispatch(mut self, enabled: bool) -> Self {
        self.prune_on_dispatch = enabled;
        self
    }

    /// Sets the maximum dependency depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Reads the configuration from `HERALD_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(policy) = lookup(CYCLE_POLICY_ENV) {
            config.cycle_policy = policy.parse()?;
        }

        if let Some(prune) = lookup(PRUNE_ON_DISPATCH_ENV) {
            config.prune_on_dispatch = prune.trim().parse().map_err(|_| {
                DispatchError::Config(format!("{} must be true or false", PRUNE_ON_DISPATCH_ENV))
            })?;
        }

        if let Some(depth) = lookup(MAX_DEPTH_ENV) {
            config.max_depth = depth.trim().parse().map_err(|_| {
                DispatchError::Config(format!("{} must be a positive integer", MAX_DEPTH_ENV))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DispatchError::Config(format!("{}: {}", path.display(), e)))?;
        let config: DispatchConfig = serde_json::from_str(&content)
            .map_err(|e| DispatchError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Process-wide configuration, read from the environment on first use.
    ///
    /// A malformed environment falls back to the defaults with a warning.
    pub fn global() -> &'static DispatchConfig {
        GLOBAL_CONFIG.get_or_init(|| {
            Self::from_env().unwrap_or_else(|e| {
                warn!("ignoring dispatch environment: {}", e);
                Self::default()
            })
        })
    }

    fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(DispatchError::Config("max_depth must be at least 1".to_string()));
        }
        Ok(())
    }
}
