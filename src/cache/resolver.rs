//! Cache-backed resolution
//!
//! A hit is only trusted after the daemon confirms the image still exists:
//! locally by inspecting the cached ID (or digest) and tagging it, remotely
//! by pulling the cached digest. Any failure along the way means a build.

use crate::artifact::Artifact;
use crate::cache::hash::{cache_key, DependencyLister};
use crate::cache::store::{CacheStore, ImageDetails};
use crate::cache::{BuildReason, ImageCache, Resolution};
use crate::daemon::{DaemonClient, InsecureRegistries};
use crate::error::ImgcacheResult;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Artifact cache backed by a [`CacheStore`]
pub struct Cache {
    store: CacheStore,
    daemon: Arc<dyn DaemonClient>,
    lister: Arc<dyn DependencyLister>,
    images_are_local: bool,
    insecure: Arc<InsecureRegistries>,
}

impl Cache {
    pub fn new(
        store: CacheStore,
        daemon: Arc<dyn DaemonClient>,
        lister: Arc<dyn DependencyLister>,
        images_are_local: bool,
        insecure: Arc<InsecureRegistries>,
    ) -> Self {
        Self {
            store,
            daemon,
            lister,
            images_are_local,
            insecure,
        }
    }

    /// Backing store
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Check a hit against the local daemon store
    ///
    /// The ID is preferred over the digest: it needs no registry and stays
    /// valid for images that were never pushed.
    async fn verify_local(
        &self,
        artifact: &Artifact,
        key: String,
        details: ImageDetails,
    ) -> Resolution {
        let lookup = match (details.id(), details.digest()) {
            (Some(id), _) => id.to_string(),
            (None, Some(digest)) => artifact.digest_ref(digest),
            (None, None) => {
                debug!("Cache entry for {} has neither id nor digest", artifact.image);
                return Resolution::Build {
                    key: Some(key),
                    reason: BuildReason::NoUsableDetails,
                };
            }
        };

        let found = match self.daemon.inspect_image(&lookup).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                debug!("Cached image {} no longer present locally", lookup);
                return Resolution::Build {
                    key: Some(key),
                    reason: BuildReason::LocalImageMissing,
                };
            }
            Err(e) => {
                warn!("Error inspecting cached image {}: {}", lookup, e);
                return Resolution::Build {
                    key: Some(key),
                    reason: BuildReason::VerificationFailed,
                };
            }
        };

        let target = artifact.target_ref();
        if let Err(e) = self.daemon.tag(&found.id, &target).await {
            warn!("Error tagging cached image {} as {}: {}", found.id, target, e);
            return Resolution::Build {
                key: Some(key),
                reason: BuildReason::VerificationFailed,
            };
        }

        info!("Found {} locally, tagged as {}", found.id, target);
        Resolution::Reused {
            key,
            reference: target,
            details,
        }
    }

    /// Check a hit against the registry
    ///
    /// Local IDs mean nothing here; only a pullable digest counts.
    async fn verify_remote(
        &self,
        artifact: &Artifact,
        key: String,
        details: ImageDetails,
    ) -> Resolution {
        let Some(digest) = details.digest() else {
            debug!("Cache entry for {} has no digest", artifact.image);
            return Resolution::Build {
                key: Some(key),
                reason: BuildReason::NoUsableDetails,
            };
        };

        let pinned = artifact.digest_ref(digest);
        let insecure = self.insecure.is_insecure(&pinned, self.daemon.as_ref()).await;
        if let Err(e) = self.daemon.pull(&pinned, insecure).await {
            warn!("Cached digest {} not retrievable: {}", pinned, e);
            return Resolution::Build {
                key: Some(key),
                reason: BuildReason::DigestUnavailable,
            };
        }

        let reference = format!("{}@{}", artifact.target_ref(), digest);
        info!("Found {} remotely", reference);
        Resolution::Reused {
            key,
            reference,
            details,
        }
    }
}

#[async_trait]
impl ImageCache for Cache {
    async fn resolve(&self, artifact: &Artifact) -> ImgcacheResult<Resolution> {
        let key = cache_key(artifact, self.lister.as_ref()).await?;

        let Some(details) = self.store.lookup(&key) else {
            debug!("No cache entry for {}", artifact.image);
            return Ok(Resolution::Build {
                key: Some(key),
                reason: BuildReason::NotCached,
            });
        };

        let resolution = if self.images_are_local {
            self.verify_local(artifact, key, details).await
        } else {
            self.verify_remote(artifact, key, details).await
        };
        Ok(resolution)
    }

    fn record(&self, key: &str, details: ImageDetails) {
        debug!("Recording cache entry {}", key);
        self.store.insert(key, details);
    }

    async fn save(&self) -> ImgcacheResult<()> {
        self.store.save().await
    }

    fn is_enabled(&self) -> bool {
        true
    }
}
