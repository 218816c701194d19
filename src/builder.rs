//! Build session pipeline
//!
//! Resolves every artifact through the cache in parallel, builds (and in
//! remote mode pushes) the ones that missed, records their results, and
//! writes the cache file once at the end.

use crate::artifact::Artifact;
use crate::cache::{ImageCache, ImageDetails, Resolution};
use crate::cancel::CancelSignal;
use crate::daemon::{BuildOptions, DaemonClient, InsecureRegistries};
use crate::error::{ImgcacheError, ImgcacheResult};
use futures_util::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How an artifact's image came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Reused,
    Built,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reused => write!(f, "reused"),
            Self::Built => write!(f, "built"),
        }
    }
}

/// Result of one artifact in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltImage {
    pub image: String,
    pub tag: String,
    /// Reference to deploy: `image:tag` locally, `image:tag@digest` remotely
    pub reference: String,
    pub outcome: Outcome,
    pub details: ImageDetails,
}

/// Runs build sessions against one cache and daemon
#[derive(Clone)]
pub struct Builder {
    cache: Arc<dyn ImageCache>,
    daemon: Arc<dyn DaemonClient>,
    images_are_local: bool,
    insecure: Arc<InsecureRegistries>,
}

impl Builder {
    pub fn new(
        cache: Arc<dyn ImageCache>,
        daemon: Arc<dyn DaemonClient>,
        images_are_local: bool,
        insecure: Arc<InsecureRegistries>,
    ) -> Self {
        Self {
            cache,
            daemon,
            images_are_local,
            insecure,
        }
    }

    /// Produce an image for every artifact
    ///
    /// All artifacts run to completion even when some fail; the cache is
    /// saved once afterwards and the first failure is returned.
    pub async fn build_all(
        &self,
        artifacts: &[Artifact],
        cancel: &CancelSignal,
    ) -> ImgcacheResult<Vec<BuiltImage>> {
        let tasks = artifacts.iter().cloned().map(|artifact| {
            let builder = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let result = builder.build_one(&artifact, &cancel).await;
                if let Err(ref e) = result {
                    warn!("Failed to produce {}: {}", artifact.target_ref(), e);
                }
                result
            })
        });
        let results = join_all(tasks).await;

        if let Err(e) = self.cache.save().await {
            warn!("Error saving artifact cache: {}", e);
        }

        let mut images = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(Ok(image)) => images.push(image),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(ImgcacheError::Internal(format!(
                        "build task panicked: {}",
                        e
                    )));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(images),
        }
    }

    /// Reuse or build a single artifact
    pub async fn build_one(
        &self,
        artifact: &Artifact,
        cancel: &CancelSignal,
    ) -> ImgcacheResult<BuiltImage> {
        let (key, reason) = match cancel.run(self.cache.resolve(artifact)).await? {
            Resolution::Reused {
                reference, details, ..
            } => {
                info!("Reusing cached image for {}", artifact.target_ref());
                return Ok(BuiltImage {
                    image: artifact.image.clone(),
                    tag: artifact.tag.clone(),
                    reference,
                    outcome: Outcome::Reused,
                    details,
                });
            }
            Resolution::Build { key, reason } => (key, reason),
        };

        let target = artifact.target_ref();
        info!("Building {} ({})", target, reason);

        let options = BuildOptions::for_artifact(artifact);
        let image = artifact.image.clone();
        let on_output = move |line: String| debug!("[{}] {}", image, line);
        let id = cancel.run(self.daemon.build(&options, &on_output)).await?;

        let (reference, digest) = if self.images_are_local {
            (target, None)
        } else {
            let insecure = cancel
                .run(async { Ok(self.insecure.is_insecure(&target, self.daemon.as_ref()).await) })
                .await?;
            let digest = cancel.run(self.daemon.push(&target, insecure)).await?;
            info!("Pushed {}@{}", target, digest);
            (format!("{}@{}", target, digest), Some(digest))
        };

        let details = ImageDetails {
            digest,
            id: Some(id),
        };
        if let Some(key) = key {
            self.cache.record(&key, details.clone());
        }

        Ok(BuiltImage {
            image: artifact.image.clone(),
            tag: artifact.tag.clone(),
            reference,
            outcome: Outcome::Built,
            details,
        })
    }
}
