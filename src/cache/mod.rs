//! Artifact cache: build avoidance for container images
//!
//! Maps a content hash of an artifact's inputs to the image that was built
//! from them, and decides per artifact whether that image can be reused.
//!
//! # Flow
//!
//! | Step | Hit | Miss |
//! |------|-----|------|
//! | Hash inputs | cache key | cache key |
//! | Lookup | `{digest, id}` | nothing |
//! | Verify | inspect + tag (local) or pull by digest (remote) | no daemon calls |
//! | Outcome | reuse, or build if the image is gone | build, then record |
//!
//! Caching is an optimization: every failure to resolve, read, or parse the
//! cache file turns the session into a [`NoCache`], and every failure to
//! verify an entry turns that artifact into a build.

pub mod hash;
pub mod lister;
mod noop;
mod resolver;
pub mod store;

pub use hash::{cache_key, DependencyLister};
pub use lister::ContextLister;
pub use noop::NoCache;
pub use resolver::Cache;
pub use store::{ArtifactCache, CacheStore, ImageDetails};

use crate::artifact::Artifact;
use crate::config::Config;
use crate::daemon::{DaemonClient, InsecureRegistries};
use crate::error::ImgcacheResult;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why an artifact has to be built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildReason {
    /// Caching is off for this session
    CacheDisabled,
    /// No entry for the artifact's current inputs
    NotCached,
    /// The entry holds neither a usable ID nor digest
    NoUsableDetails,
    /// The cached image was removed from the local store
    LocalImageMissing,
    /// The cached digest can no longer be pulled
    DigestUnavailable,
    /// A daemon call failed while checking the entry
    VerificationFailed,
}

impl fmt::Display for BuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::CacheDisabled => "cache disabled",
            Self::NotCached => "not cached",
            Self::NoUsableDetails => "cache entry incomplete",
            Self::LocalImageMissing => "cached image no longer present",
            Self::DigestUnavailable => "cached digest not retrievable",
            Self::VerificationFailed => "cache verification failed",
        };
        write!(f, "{}", reason)
    }
}

/// Outcome of looking an artifact up in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// An existing image satisfies the artifact; no build needed
    Reused {
        key: String,
        /// Reference the artifact's image is now reachable as
        reference: String,
        details: ImageDetails,
    },
    /// A build is required
    Build {
        /// Key to record the build result under (absent when caching is off)
        key: Option<String>,
        reason: BuildReason,
    },
}

impl Resolution {
    /// Whether a build is required
    pub fn needs_build(&self) -> bool {
        matches!(self, Self::Build { .. })
    }
}

/// Build-avoidance cache interface
///
/// Implemented by the real [`Cache`] and by [`NoCache`]; callers never need
/// to know which one they hold.
#[async_trait]
pub trait ImageCache: Send + Sync {
    /// Decide whether `artifact` can reuse a previous image
    async fn resolve(&self, artifact: &Artifact) -> ImgcacheResult<Resolution>;

    /// Remember the image built for `key`
    fn record(&self, key: &str, details: ImageDetails);

    /// Write recorded entries to the cache file
    async fn save(&self) -> ImgcacheResult<()>;

    /// Whether this cache can ever report a hit
    fn is_enabled(&self) -> bool;
}

/// Everything needed to open a session's cache
#[derive(Debug, Clone, Default)]
pub struct CacheSettings {
    /// Caching switched on
    pub enabled: bool,
    /// Explicit cache file, else the default under the home directory
    pub file: Option<PathBuf>,
    /// Images are served from the local daemon store
    pub images_are_local: bool,
    /// Registries reached without TLS verification
    pub insecure_registries: Vec<String>,
}

impl CacheSettings {
    /// Settings from the loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.cache.enabled,
            file: config.cache.file.clone(),
            images_are_local: config.daemon.images_are_local,
            insecure_registries: config.daemon.insecure_registries.clone(),
        }
    }
}

/// Open the cache for a build session
///
/// Never fails: anything that prevents a working cache is logged and the
/// session falls back to [`NoCache`]. `insecure` is shared with the rest of
/// the session so the daemon's default registry is looked up only once.
pub async fn new_cache(
    settings: &CacheSettings,
    daemon: Arc<dyn DaemonClient>,
    lister: Arc<dyn DependencyLister>,
    insecure: Arc<InsecureRegistries>,
) -> Arc<dyn ImageCache> {
    if !settings.enabled {
        debug!("Artifact caching disabled");
        return Arc::new(NoCache);
    }

    let cache_file = match store::resolve_cache_file(settings.file.as_deref()).await {
        Ok(path) => path,
        Err(e) => {
            warn!("Error resolving cache file, not using artifact cache: {}", e);
            return Arc::new(NoCache);
        }
    };

    let store = match CacheStore::open(cache_file).await {
        Ok(store) => store,
        Err(e) => {
            warn!("Error retrieving artifact cache, not using artifact cache: {}", e);
            return Arc::new(NoCache);
        }
    };

    if settings.images_are_local && !daemon.is_available().await {
        warn!(
            "{} daemon not available for local images, not using artifact cache",
            daemon.name()
        );
        return Arc::new(NoCache);
    }

    debug!(
        "Artifact cache loaded from {} ({} entries)",
        store.path().display(),
        store.len()
    );

    Arc::new(Cache::new(
        store,
        daemon,
        lister,
        settings.images_are_local,
        insecure,
    ))
}
