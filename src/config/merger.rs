// Configuration merging with priority

use crate::config::loader::deserialize_some;
use crate::config::{AgentConfig, IntegratorConfig, TrackerConfig, TrackerKind};
use serde::{Deserialize, Serialize};

/// Partial configuration for merging
/// Uses Option<T> for all fields to support partial overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_branch: Option<String>,
    /// `Some(None)` disables the remote
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub remote: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_wait_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_after_plan: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<PartialTrackerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<PartialAgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialTrackerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TrackerKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialAgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_command: Option<String>,
}

/// Configuration merger
/// Priority order: CLI -> Project -> Global -> Defaults
pub struct ConfigMerger {
    defaults: IntegratorConfig,
    global: Option<PartialConfig>,
    project: Option<PartialConfig>,
    cli: Option<PartialConfig>,
}

impl ConfigMerger {
    /// Create a new config merger with defaults
    pub fn new() -> Self {
        Self {
            defaults: IntegratorConfig::default(),
            global: None,
            project: None,
            cli: None,
        }
    }

    /// Set global config
    pub fn with_global(mut self, config: Option<PartialConfig>) -> Self {
        self.global = config;
        self
    }

    /// Set project config
    pub fn with_project(mut self, config: Option<PartialConfig>) -> Self {
        self.project = config;
        self
    }

    /// Set CLI overrides
    pub fn with_cli(mut self, config: Option<PartialConfig>) -> Self {
        self.cli = config;
        self
    }

    /// Merge all layers with priority
    pub fn merge(&self) -> IntegratorConfig {
        let mut result = self.defaults.clone();

        for layer in [&self.global, &self.project, &self.cli].into_iter().flatten() {
            result = self.merge_partial(&result, layer);
        }

        result
    }

    fn merge_partial(&self, base: &IntegratorConfig, partial: &PartialConfig) -> IntegratorConfig {
        IntegratorConfig {
            target_branch: partial
                .target_branch
                .clone()
                .unwrap_or_else(|| base.target_branch.clone()),
            remote: partial
                .remote
                .clone()
                .unwrap_or_else(|| base.remote.clone()),
            poll_interval_secs: partial
                .poll_interval_secs
                .unwrap_or(base.poll_interval_secs),
            max_attempts: partial.max_attempts.unwrap_or(base.max_attempts),
            lock_wait_ms: partial.lock_wait_ms.unwrap_or(base.lock_wait_ms),
            hold_after_plan: partial.hold_after_plan.unwrap_or(base.hold_after_plan),
            tracker: partial
                .tracker
                .as_ref()
                .map(|p| self.merge_partial_tracker(&base.tracker, p))
                .unwrap_or_else(|| base.tracker.clone()),
            agent: partial
                .agent
                .as_ref()
                .map(|p| self.merge_partial_agent(&base.agent, p))
                .unwrap_or_else(|| base.agent.clone()),
        }
    }

    fn merge_partial_tracker(
        &self,
        base: &TrackerConfig,
        partial: &PartialTrackerConfig,
    ) -> TrackerConfig {
        TrackerConfig {
            kind: partial.kind.unwrap_or(base.kind),
            command: partial
                .command
                .clone()
                .unwrap_or_else(|| base.command.clone()),
        }
    }

    fn merge_partial_agent(&self, base: &AgentConfig, partial: &PartialAgentConfig) -> AgentConfig {
        AgentConfig {
            resume_command: partial
                .resume_command
                .clone()
                .or_else(|| base.resume_command.clone()),
        }
    }
}

impl Default for ConfigMerger {
    fn default() -> Self {
        Self::new()
    }
}
