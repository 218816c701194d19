//! Cache key computation
//!
//! The key is a SHA256 over the artifact's build configuration and the
//! path and contents of every file it depends on. Same inputs = same key;
//! any edit to a dependency produces a different key.

use crate::artifact::Artifact;
use crate::error::{ImgcacheError, ImgcacheResult};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mixed into every key; bump when the hashed inputs change shape so old
/// entries turn into misses
pub const HASH_SCHEME: &str = "imgcache-v2";

/// Lists the files an artifact's image is built from
#[async_trait]
pub trait DependencyLister: Send + Sync {
    /// Paths of every input file, relative to the artifact context
    async fn dependencies_for_artifact(&self, artifact: &Artifact) -> ImgcacheResult<Vec<PathBuf>>;
}

/// Build instructions that shape the image besides the input files
#[derive(Serialize)]
struct BuildConfig<'a> {
    dockerfile: &'a str,
    build_args: &'a BTreeMap<String, String>,
}

/// Digest of one dependency: a symlink by its target, anything else by content
async fn dependency_digest(path: &Path) -> ImgcacheResult<[u8; 32]> {
    let read_error =
        |e: std::io::Error| ImgcacheError::io(format!("reading dependency {}", path.display()), e);

    let metadata = tokio::fs::symlink_metadata(path).await.map_err(read_error)?;
    let digest = if metadata.file_type().is_symlink() {
        let target = tokio::fs::read_link(path).await.map_err(read_error)?;
        let mut hasher = Sha256::new();
        hasher.update(b"symlink\0");
        hasher.update(target.to_string_lossy().as_bytes());
        hasher.finalize()
    } else {
        Sha256::digest(tokio::fs::read(path).await.map_err(read_error)?)
    };

    Ok(digest.into())
}

/// Compute the cache key for an artifact's current inputs
///
/// Dependencies are hashed in sorted order so the lister's ordering does
/// not matter. A dependency that cannot be read fails the whole key.
/// Symlinks are not followed, so a dangling link still hashes.
pub async fn cache_key(
    artifact: &Artifact,
    lister: &dyn DependencyLister,
) -> ImgcacheResult<String> {
    let mut deps = lister.dependencies_for_artifact(artifact).await?;
    deps.sort();
    deps.dedup();

    let mut hasher = Sha256::new();
    hasher.update(HASH_SCHEME.as_bytes());

    let config = BuildConfig {
        dockerfile: &artifact.dockerfile,
        build_args: &artifact.build_args,
    };
    hasher.update(serde_json::to_vec(&config)?);

    for dep in &deps {
        hasher.update([0u8]);
        hasher.update(dep.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(dependency_digest(&artifact.context.join(dep)).await?);
    }

    let key = hex::encode(hasher.finalize());
    debug!(
        "Cache key for {}: {} ({} dependencies)",
        artifact.image,
        key,
        deps.len()
    );
    Ok(key)
}
