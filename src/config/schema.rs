//! Configuration schema for imgcache
//!
//! Configuration is stored in the project's `imgcache.toml`

use crate::artifact::Artifact;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Artifact cache settings
    pub cache: CacheConfig,

    /// Container daemon settings
    pub daemon: DaemonConfig,

    /// Images to build
    pub artifacts: Vec<Artifact>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Artifact cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Reuse previously built images (default: true)
    pub enabled: bool,

    /// Explicit cache file (default: ~/.imgcache/cache)
    pub file: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: None,
        }
    }
}

/// Container engine CLI to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Docker,
    Podman,
}

impl Engine {
    /// Executable name
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary())
    }
}

/// Container daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Engine CLI (docker or podman)
    pub engine: Engine,

    /// Built images stay in the local store; false means every image is pushed
    pub images_are_local: bool,

    /// Registries reached without TLS verification
    pub insecure_registries: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Docker,
            images_are_local: true,
            insecure_registries: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("[daemon]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.cache.enabled);
        assert!(config.daemon.images_are_local);
        assert_eq!(config.daemon.engine, Engine::Docker);
        assert!(config.artifacts.is_empty());
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [daemon]
            engine = "podman"
            insecure_registries = ["localhost:5000"]

            [[artifacts]]
            image = "registry.example.com/team/api"
            context = "services/api"

            [artifacts.build_args]
            VERSION = "1.2"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.daemon.engine, Engine::Podman);
        assert_eq!(config.daemon.insecure_registries, vec!["localhost:5000"]);
        assert!(config.daemon.images_are_local); // default preserved
        assert_eq!(config.artifacts.len(), 1);

        let artifact = &config.artifacts[0];
        assert_eq!(artifact.dockerfile, "Dockerfile");
        assert_eq!(artifact.tag, "latest");
        assert_eq!(artifact.build_args.get("VERSION").unwrap(), "1.2");
    }

    #[test]
    fn engine_binary() {
        assert_eq!(Engine::Docker.binary(), "docker");
        assert_eq!(Engine::Podman.to_string(), "podman");
    }
}
