//! Integrator configuration
//!
//! Layered YAML: defaults, then `~/.integrator/config.yaml`, then
//! `<project>/.integrator/config.yaml`, then command-line overrides.

pub mod loader;
pub mod merger;

pub use loader::ConfigLoader;
pub use merger::{ConfigMerger, PartialConfig};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Effective configuration for one project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegratorConfig {
    /// Integration branch every merge lands on
    pub target_branch: String,
    /// Remote to pull from, push to and verify against; `None` works locally
    pub remote: Option<String>,
    /// Seconds between daemon cycles
    pub poll_interval_secs: u64,
    /// Transient failures tolerated before an entry is marked failed
    pub max_attempts: u32,
    /// How long queue and operation locks are waited for
    pub lock_wait_ms: u64,
    /// Hold operations automatically once they are planned
    pub hold_after_plan: bool,
    pub tracker: TrackerConfig,
    pub agent: AgentConfig,
}

/// Which issue tracker backs readiness and epic closure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    /// The `bd` command line tracker
    Beads,
    /// No tracker: nothing is ever open, closing always succeeds
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerConfig {
    pub kind: TrackerKind,
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentConfig {
    /// Shell command run to wake an agent session; gets
    /// `INTEGRATOR_OPERATION` and runs in the operation's worktree
    pub resume_command: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            kind: TrackerKind::Beads,
            command: "bd".to_string(),
        }
    }
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            target_branch: "main".to_string(),
            remote: Some("origin".to_string()),
            poll_interval_secs: 30,
            max_attempts: 3,
            lock_wait_ms: 10_000,
            hold_after_plan: true,
            tracker: TrackerConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl IntegratorConfig {
    /// Load the layered configuration for a project
    pub fn load(project_path: &Path, cli: Option<PartialConfig>) -> Result<Self> {
        let loader = ConfigLoader::new().with_project_path(project_path);
        let config = ConfigMerger::new()
            .with_global(loader.load_global()?)
            .with_project(loader.load_project()?)
            .with_cli(cli)
            .merge();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        use crate::error::Error;

        if self.target_branch.trim().is_empty() {
            return Err(Error::Config("target_branch must not be empty".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be greater than 0".to_string()));
        }
        if matches!(&self.remote, Some(r) if r.trim().is_empty()) {
            return Err(Error::Config(
                "remote must be a name or null to work without one".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}
