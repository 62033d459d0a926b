//! Configuration management for sandkit

pub mod schema;

pub use schema::Config;

use crate::error::{SandkitError, SandkitResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sandkit")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sandkit")
    }

    /// Directory holding persisted build records
    pub fn builds_dir() -> PathBuf {
        Self::state_dir().join("builds")
    }

    /// Get the audit log path
    pub fn audit_log_path() -> PathBuf {
        Self::state_dir().join("audit.log")
    }

    /// Default cache store root (`~/.cache/sandkit`)
    pub fn default_cache_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(Self::state_dir)
            .join("sandkit")
    }

    /// Cache store root, honoring `cache.root` from the config
    pub fn cache_root(config: &Config) -> PathBuf {
        config
            .cache
            .root
            .clone()
            .unwrap_or_else(Self::default_cache_root)
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> SandkitResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> SandkitResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| SandkitError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| SandkitError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        validate(&config).map_err(|reason| SandkitError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        })?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> SandkitResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            SandkitError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> SandkitResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SandkitError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Ensure all state directories exist
    pub async fn ensure_state_dirs() -> SandkitResult<()> {
        for dir in [Self::state_dir(), Self::builds_dir()] {
            fs::create_dir_all(&dir).await.map_err(|e| {
                SandkitError::io(format!("creating directory {}", dir.display()), e)
            })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject values that parse but cannot drive a build
fn validate(config: &Config) -> Result<(), String> {
    if !matches!(config.runtime.engine.as_str(), "podman" | "docker") {
        return Err(format!(
            "runtime.engine must be \"podman\" or \"docker\", got \"{}\"",
            config.runtime.engine
        ));
    }
    if !matches!(config.general.log_format.as_str(), "text" | "json") {
        return Err(format!(
            "general.log_format must be \"text\" or \"json\", got \"{}\"",
            config.general.log_format
        ));
    }
    if config.retry.max_attempts == 0 || config.retry.command_attempts == 0 {
        return Err("retry attempt counts must be at least 1".to_string());
    }
    if config.retry.multiplier < 1.0 {
        return Err("retry.multiplier must be >= 1.0".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.runtime.engine, "podman");
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.runtime.engine = "docker".to_string();
        config.cache.root = Some(temp.path().join("cache"));

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.runtime.engine, "docker");
        assert_eq!(
            ConfigManager::cache_root(&loaded),
            temp.path().join("cache")
        );
    }

    #[tokio::test]
    async fn rejects_unknown_engine() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[runtime]\nengine = \"lxc\"\n").unwrap();

        let err = ConfigManager::with_path(path).load().await.unwrap_err();
        assert!(matches!(err, SandkitError::ConfigInvalid { .. }));
        assert!(err.to_string().contains("runtime.engine"));
    }

    #[tokio::test]
    async fn rejects_zero_attempts() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 0\n").unwrap();

        let result = ConfigManager::with_path(path).load().await;
        assert!(result.is_err());
    }
}
