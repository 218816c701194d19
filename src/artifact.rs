//! Artifact definitions
//!
//! An artifact is one image to build: a source context, build
//! instructions, and the tag the result should carry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A named unit of build configuration that produces one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Image repository (e.g., "registry.example.com/team/api")
    pub image: String,

    /// Build context directory
    #[serde(default = "default_context")]
    pub context: PathBuf,

    /// Dockerfile path, relative to the context
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    /// Tag applied to the built or reused image
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Build arguments passed to the build
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_tag() -> String {
    "latest".to_string()
}

impl Artifact {
    /// Create an artifact with default dockerfile, tag, and no build args
    pub fn new(image: impl Into<String>, context: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            context: context.into(),
            dockerfile: default_dockerfile(),
            tag: default_tag(),
            build_args: BTreeMap::new(),
        }
    }

    /// The reference the artifact's image must end up tagged as
    pub fn target_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Reference pinning the image repository to a registry digest
    pub fn digest_ref(&self, digest: &str) -> String {
        format!("{}@{}", self.image, digest)
    }

    /// Dockerfile path joined onto the context
    pub fn dockerfile_path(&self) -> PathBuf {
        self.context.join(&self.dockerfile)
    }
}
