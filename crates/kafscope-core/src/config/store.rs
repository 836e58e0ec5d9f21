//! Configuration persistence.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::AppConfig;
use crate::error::ClientError;

/// Loads and saves the operator configuration.
pub trait ConfigIo: Send + Sync {
    /// Reads the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the document cannot be read or is invalid.
    fn load(&self) -> Result<AppConfig, ClientError>;

    /// Persists the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the document is invalid or cannot be written.
    fn save(&self, config: &AppConfig) -> Result<(), ClientError>;
}

/// YAML file under the user's config directory.
#[derive(Debug, Clone)]
pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    /// Creates a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns `<config dir>/kafscope/config.yaml`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the platform has no config
    /// directory.
    pub fn default_path() -> Result<PathBuf, ClientError> {
        dirs::config_dir()
            .map(|dir| dir.join("kafscope").join("config.yaml"))
            .ok_or_else(|| {
                ClientError::Configuration("could not determine the user config directory".into())
            })
    }

    /// Creates a store at [`YamlConfigStore::default_path`].
    ///
    /// # Errors
    ///
    /// See [`YamlConfigStore::default_path`].
    pub fn at_default_path() -> Result<Self, ClientError> {
        Self::default_path().map(Self::new)
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigIo for YamlConfigStore {
    fn load(&self) -> Result<AppConfig, ClientError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no config file, starting empty");
            return Ok(AppConfig::default());
        }
        let text = std::fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(AppConfig::default());
        }
        let config: AppConfig = serde_yaml::from_str(&text).map_err(|e| {
            ClientError::Configuration(format!("{}: {e}", self.path.display()))
        })?;
        config.validate()?;
        debug!(
            path = %self.path.display(),
            clusters = config.clusters.len(),
            "loaded config"
        );
        Ok(config)
    }

    fn save(&self, config: &AppConfig) -> Result<(), ClientError> {
        config.validate()?;
        let text = serde_yaml::to_string(config)
            .map_err(|e| ClientError::Configuration(format!("serialize config: {e}")))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "saved config");
        Ok(())
    }
}
