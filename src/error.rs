//! Error types for imgcache
//!
//! All modules use `ImgcacheResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for imgcache operations
pub type ImgcacheResult<T> = Result<T, ImgcacheError>;

/// All errors that can occur in imgcache
#[derive(Error, Debug)]
pub enum ImgcacheError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No artifacts configured")]
    NoArtifacts,

    // Cache file errors
    #[error("Could not determine home directory for the default cache file")]
    HomeDirUnknown,

    #[error("Failed to read cache file {path}: {reason}")]
    CacheFileRead { path: PathBuf, reason: String },

    #[error("Failed to write cache file {path}: {reason}")]
    CacheFileWrite { path: PathBuf, reason: String },

    // Daemon errors
    #[error("Container daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Image tag failed: {source_ref} -> {target}: {reason}")]
    ImageTag {
        source_ref: String,
        target: String,
        reason: String,
    },

    #[error("Image pull failed: {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Image push failed: {image}: {reason}")]
    ImagePush { image: String, reason: String },

    #[error("Image build failed for {tag}:\n{reason}")]
    ImageBuild { tag: String, reason: String },

    // Artifact errors
    #[error("Failed to list dependencies for {artifact}: {reason}")]
    Dependencies { artifact: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ImgcacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether this error only means "the image is not there"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::DaemonUnavailable(_) => {
                Some("Start the container daemon, or set daemon.engine in imgcache.toml")
            }
            Self::NoArtifacts => Some("Add an [[artifacts]] entry to imgcache.toml"),
            Self::HomeDirUnknown => Some("Set cache.file in imgcache.toml or pass --cache-file"),
            Self::CacheFileRead { .. } => {
                Some("Delete the cache file to start over; it is rebuilt on the next build")
            }
            _ => None,
        }
    }
}
