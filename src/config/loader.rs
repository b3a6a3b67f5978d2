// Configuration file loading

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::merger::PartialConfig;
use crate::error::{Error, Result};
use crate::file_storage::{atomic_write, get_global_integrator_dir};
use crate::utils::config_path;

/// Config loader
pub struct ConfigLoader {
    /// Global config path
    global_path: Option<PathBuf>,
    /// Project config path
    project_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self {
            global_path: Some(get_global_integrator_dir().join("config.yaml")),
            project_path: None,
        }
    }

    /// Set the project path
    pub fn with_project_path(mut self, path: &Path) -> Self {
        self.project_path = Some(config_path(path));
        self
    }

    /// Skip the user-wide file
    pub fn without_global(mut self) -> Self {
        self.global_path = None;
        self
    }

    /// Load global config
    pub fn load_global(&self) -> Result<Option<PartialConfig>> {
        match self.global_path {
            Some(ref path) => self.load_from_path(path),
            None => Ok(None),
        }
    }

    /// Load project config
    pub fn load_project(&self) -> Result<Option<PartialConfig>> {
        match self.project_path {
            Some(ref path) => self.load_from_path(path),
            None => Ok(None),
        }
    }

    /// Load config from a specific path; a missing file is `None`
    pub fn load_from_path(&self, path: &Path) -> Result<Option<PartialConfig>> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        // An empty file is the same as no file
        if contents.trim().is_empty() {
            return Ok(Some(PartialConfig::default()));
        }

        let config: PartialConfig = serde_yaml::from_str(&contents).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        log::debug!("[Config] Loaded {}", path.display());
        Ok(Some(config))
    }

    /// Get the project config path
    pub fn project_config_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }

    /// Save a config layer to a specific path
    pub fn save_to_path<T: Serialize>(&self, path: &Path, config: &T) -> Result<()> {
        let contents = serde_yaml::to_string(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        atomic_write(path, &contents).map_err(Error::Config)?;

        log::info!("[Config] Saved config to: {}", path.display());
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper so `remote: null` can be told apart from a missing `remote` key
pub(crate) fn deserialize_some<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}
