//! Configuration management for imgcache

pub mod schema;

pub use schema::{CacheConfig, Config, DaemonConfig, Engine};

use crate::error::{ImgcacheError, ImgcacheResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Project configuration file name
pub const CONFIG_FILE_NAME: &str = "imgcache.toml";

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

    /// Get the default config file path (in the working directory)
    pub fn default_config_path() -> PathBuf {
        PathBuf::from(CONFIG_FILE_NAME)
    }

    /// Load configuration, using defaults if not exists
    pub async fn load(&self) -> ImgcacheResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let mut config = self.load_from_file(&self.config_path).await?;
        self.anchor_contexts(&mut config);
        Ok(config)
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> ImgcacheResult<Config> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            ImgcacheError::io(format!("reading config from {}", path.display()), e)
        })?;

        toml::from_str(&content).map_err(|e| ImgcacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Resolve relative artifact contexts against the config file's directory
    fn anchor_contexts(&self, config: &mut Config) {
        let base = match self.config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => return,
        };

        for artifact in &mut config.artifacts {
            if artifact.context.is_relative() {
                artifact.context = base.join(&artifact.context);
            }
        }
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> ImgcacheResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            ImgcacheError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> ImgcacheResult<()> {
        if let Some(parent) = self.config_path.parent() {
            if parent.as_os_str().is_empty() {
                return Ok(());
            }
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ImgcacheError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert!(config.cache.enabled);
        assert!(config.artifacts.is_empty());
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("imgcache.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.cache.enabled = false;
        config.daemon.insecure_registries = vec!["localhost:5000".to_string()];

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert!(!loaded.cache.enabled);
        assert_eq!(loaded.daemon.insecure_registries, vec!["localhost:5000"]);
    }

    #[tokio::test]
    async fn load_anchors_relative_contexts() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("imgcache.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.artifacts.push(Artifact::new("app", "web"));
        manager.save(&config).await.unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.artifacts[0].context, temp.path().join("web"));
    }

    #[tokio::test]
    async fn load_rejects_invalid_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("imgcache.toml");
        fs::write(&path, "[cache\nenabled = yes").await.unwrap();

        let err = ConfigManager::with_path(path).load().await.unwrap_err();
        assert!(matches!(err, ImgcacheError::ConfigInvalid { .. }));
    }
}
