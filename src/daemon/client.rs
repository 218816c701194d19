//! Container daemon abstraction
//!
//! Provides a trait for the image operations the cache needs, so the
//! decision logic works the same against docker, podman, or a test double.

use crate::artifact::Artifact;
use crate::error::ImgcacheResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What the daemon knows about a local image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInspect {
    /// Daemon-local image ID (e.g., "sha256:3f2a...")
    pub id: String,
    /// Registry digests recorded for the image ("repo@sha256:...")
    pub repo_digests: Vec<String>,
}

/// One row of an image listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    /// Image ID
    pub id: String,
    /// "repository:tag", or "<none>:<none>" for dangling images
    pub reference: String,
    /// Registry digest, if known
    pub digest: Option<String>,
}

/// Options for a single image build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Build context directory
    pub context: PathBuf,
    /// Dockerfile path
    pub dockerfile: PathBuf,
    /// Tags applied to the result
    pub tags: Vec<String>,
    /// Build arguments
    pub build_args: BTreeMap<String, String>,
}

impl BuildOptions {
    /// Build options producing the artifact's target tag
    pub fn for_artifact(artifact: &Artifact) -> Self {
        Self {
            context: artifact.context.clone(),
            dockerfile: artifact.dockerfile_path(),
            tags: vec![artifact.target_ref()],
            build_args: artifact.build_args.clone(),
        }
    }
}

/// Abstract container daemon interface
///
/// Every operation distinguishes "the image does not exist" from "the call
/// failed": inspect returns `Ok(None)` for unknown images, and tag reports
/// an unknown source as `ImgcacheError::ImageNotFound`.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Check if the daemon answers at all
    async fn is_available(&self) -> bool;

    /// Resolve a tag, ID, or digest reference to the image it names
    async fn inspect_image(&self, reference: &str) -> ImgcacheResult<Option<ImageInspect>>;

    /// Point `target` at the image named by `source`
    async fn tag(&self, source: &str, target: &str) -> ImgcacheResult<()>;

    /// Push an image, returning the digest the registry assigned
    async fn push(&self, reference: &str, insecure: bool) -> ImgcacheResult<String>;

    /// Fetch an image by tag or digest into the local store
    async fn pull(&self, reference: &str, insecure: bool) -> ImgcacheResult<()>;

    /// Build an image, streaming output lines; returns the new image ID
    async fn build(
        &self,
        options: &BuildOptions,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> ImgcacheResult<String>;

    /// List local images whose reference matches `filter` (empty = all)
    async fn image_list(&self, filter: &str) -> ImgcacheResult<Vec<ImageSummary>>;

    /// Address of the daemon's default registry index
    async fn registry_info(&self) -> ImgcacheResult<String>;

    /// Get the human-readable daemon name for display
    fn name(&self) -> &'static str;
}
