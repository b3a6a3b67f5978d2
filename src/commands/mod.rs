// Command handlers behind the `integrator` CLI
//
// Each handler returns the text to print; main decides how failures exit.

pub mod locks;
pub mod operations;
pub mod queue;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{IntegratorConfig, PartialConfig};
use crate::error::{Error, Result};
use crate::file_storage::init_integrator_dir;
use crate::lifecycle::OperationLifecycle;
use crate::merge_queue::{QueueStore, SchedulerContext};
use crate::tracker::{self, IssueTracker};

/// Project and effective configuration shared by every command
pub struct CommandContext {
    pub project_path: PathBuf,
    pub config: IntegratorConfig,
}

impl CommandContext {
    /// Resolve the project and load its layered configuration
    pub fn load(project_path: &Path, overrides: Option<PartialConfig>) -> Result<Self> {
        let project_path = project_path
            .canonicalize()
            .unwrap_or_else(|_| project_path.to_path_buf());
        init_integrator_dir(&project_path).map_err(Error::Storage)?;
        let config = IntegratorConfig::load(&project_path, overrides)?;
        Ok(Self {
            project_path,
            config,
        })
    }

    pub fn new(project_path: &Path, config: IntegratorConfig) -> Self {
        Self {
            project_path: project_path.to_path_buf(),
            config,
        }
    }

    pub fn tracker(&self) -> Arc<dyn IssueTracker> {
        tracker::from_config(&self.config.tracker, &self.project_path)
    }

    pub fn lifecycle(&self) -> OperationLifecycle {
        OperationLifecycle::new(&self.project_path, self.tracker(), &self.config)
    }

    pub fn store(&self) -> QueueStore {
        QueueStore::new(&self.project_path, self.config.lock_wait())
    }

    pub fn scheduler(&self) -> SchedulerContext {
        SchedulerContext::from_config(&self.project_path, self.config.clone())
    }
}
