//! Cache file persistence
//!
//! The cache file is a YAML mapping from cache key to image details:
//!
//! ```yaml
//! 9f86d081884c7d65...:
//!   digest: sha256:4b2e...
//!   id: sha256:77af...
//! ```
//!
//! It is loaded once per session, mutated in memory, and overwritten as a
//! whole on save. Writes are not atomic; a torn file fails to parse on the
//! next load, which only disables caching for that session.

use crate::error::{ImgcacheError, ImgcacheResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::fs;
use tracing::debug;

/// Directory under the home directory holding the default cache file
pub const DEFAULT_CACHE_DIR: &str = ".imgcache";

/// Default cache file name
pub const DEFAULT_CACHE_FILE: &str = "cache";

/// Everything needed to find a previously built image again
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDetails {
    /// Registry digest, set once the image was pushed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Daemon-local image ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ImageDetails {
    /// Details of a local, never pushed image
    pub fn local(id: impl Into<String>) -> Self {
        Self {
            digest: None,
            id: Some(id.into()),
        }
    }

    /// Registry digest, ignoring blank values from hand-edited files
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref().filter(|d| !d.trim().is_empty())
    }

    /// Image ID, ignoring blank values from hand-edited files
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

/// Cache key -> image details
pub type ArtifactCache = BTreeMap<String, ImageDetails>;

/// Path of the default cache file (`~/.imgcache/cache`)
pub fn default_cache_file() -> ImgcacheResult<PathBuf> {
    let home = dirs::home_dir().ok_or(ImgcacheError::HomeDirUnknown)?;
    Ok(home.join(DEFAULT_CACHE_DIR).join(DEFAULT_CACHE_FILE))
}

/// Make sure either the given cache file or the default one exists
pub async fn resolve_cache_file(explicit: Option<&Path>) -> ImgcacheResult<PathBuf> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => default_cache_file()?,
    };
    verify_or_create_file(&path).await?;
    Ok(path)
}

/// Create an empty file (and its parent directories) if absent
async fn verify_or_create_file(path: &Path) -> ImgcacheResult<()> {
    if fs::metadata(path).await.is_ok() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            ImgcacheError::io(format!("creating cache directory {}", parent.display()), e)
        })?;
    }

    debug!("Creating empty cache file {}", path.display());
    fs::write(path, b"")
        .await
        .map_err(|e| ImgcacheError::io(format!("creating cache file {}", path.display()), e))
}

/// Read and parse a cache file
pub async fn load_artifact_cache(path: &Path) -> ImgcacheResult<ArtifactCache> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| ImgcacheError::CacheFileRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    parse_artifact_cache(&content).map_err(|e| ImgcacheError::CacheFileRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Parse cache file content; a key with no value (`key: ~`) is an empty entry
fn parse_artifact_cache(content: &str) -> ImgcacheResult<ArtifactCache> {
    if content.trim().is_empty() {
        return Ok(ArtifactCache::new());
    }

    let raw: Option<BTreeMap<String, Option<ImageDetails>>> = serde_yaml::from_str(content)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, details)| (key, details.unwrap_or_default()))
        .collect())
}

/// Serialize a cache and overwrite the file
pub async fn save_artifact_cache(path: &Path, contents: &ArtifactCache) -> ImgcacheResult<()> {
    let data = serde_yaml::to_string(contents)?;

    fs::write(path, data)
        .await
        .map_err(|e| ImgcacheError::CacheFileWrite {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

struct StoreState {
    entries: ArtifactCache,
    dirty: bool,
}

/// In-memory cache backed by one file
///
/// Lookups and inserts share a single lock; no call holds it across an
/// `.await`. Saves are serialized by a separate async lock.
pub struct CacheStore {
    path: PathBuf,
    state: Mutex<StoreState>,
    save_lock: tokio::sync::Mutex<()>,
}

impl CacheStore {
    /// Wrap already loaded entries
    pub fn new(path: PathBuf, entries: ArtifactCache) -> Self {
        Self {
            path,
            state: Mutex::new(StoreState {
                entries,
                dirty: false,
            }),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the cache stored at `path`
    pub async fn open(path: PathBuf) -> ImgcacheResult<Self> {
        let entries = load_artifact_cache(&path).await?;
        Ok(Self::new(path, entries))
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Details recorded for `key`
    pub fn lookup(&self, key: &str) -> Option<ImageDetails> {
        self.lock().entries.get(key).cloned()
    }

    /// Record details for `key`, replacing any previous entry
    pub fn insert(&self, key: &str, details: ImageDetails) {
        let mut state = self.lock();
        state.entries.insert(key.to_string(), details);
        state.dirty = true;
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all entries
    pub fn snapshot(&self) -> ArtifactCache {
        self.lock().entries.clone()
    }

    /// Write the whole cache to its file if anything changed since the last save
    pub async fn save(&self) -> ImgcacheResult<()> {
        let _guard = self.save_lock.lock().await;

        let contents = {
            let mut state = self.lock();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.entries.clone()
        };

        if let Err(e) = save_artifact_cache(&self.path, &contents).await {
            self.lock().dirty = true;
            return Err(e);
        }

        debug!(
            "Saved {} cache entries to {}",
            contents.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn sample() -> ArtifactCache {
        let mut cache = ArtifactCache::new();
        cache.insert(
            "key-a".to_string(),
            ImageDetails {
                digest: Some("sha256:abc".to_string()),
                id: Some("sha256:1".to_string()),
            },
        );
        cache.insert("key-b".to_string(), ImageDetails::local("sha256:2"));
        cache
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache");

        save_artifact_cache(&path, &sample()).await.unwrap();
        let loaded = load_artifact_cache(&path).await.unwrap();

        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn omits_empty_fields() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache");

        save_artifact_cache(&path, &sample()).await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();

        assert_eq!(content.matches("digest").count(), 1);
        assert!(!content.contains("null"));
    }

    #[test]
    fn parses_hand_written_yaml() {
        let yaml = "abc:\n  id: sha256:9\ndef:\n  digest: sha256:ff\n";
        let cache = parse_artifact_cache(yaml).unwrap();

        assert_eq!(cache["abc"].id(), Some("sha256:9"));
        assert_eq!(cache["abc"].digest(), None);
        assert_eq!(cache["def"].digest(), Some("sha256:ff"));
    }

    #[test]
    fn null_entries_parse_as_empty() {
        let yaml = "abc: ~\ndef:\nghi:\n  id: sha256:1\n";
        let cache = parse_artifact_cache(yaml).unwrap();

        assert_eq!(cache.len(), 3);
        assert_eq!(cache["abc"], ImageDetails::default());
        assert_eq!(cache["def"], ImageDetails::default());
        assert_eq!(cache["ghi"].id(), Some("sha256:1"));
    }

    #[test]
    fn null_document_is_empty_cache() {
        assert!(parse_artifact_cache("~\n").unwrap().is_empty());
    }

    #[test]
    fn empty_content_is_empty_cache() {
        assert!(parse_artifact_cache("").unwrap().is_empty());
        assert!(parse_artifact_cache("\n  \n").unwrap().is_empty());
    }

    #[test]
    fn malformed_content_is_error() {
        assert!(parse_artifact_cache("- just\n- a list\n").is_err());
        assert!(parse_artifact_cache("key: [unterminated").is_err());
    }

    #[test]
    fn blank_fields_are_absent() {
        let details = ImageDetails {
            digest: Some(String::new()),
            id: Some("  ".to_string()),
        };
        assert!(details.digest().is_none());
        assert!(details.id().is_none());
    }

    #[tokio::test]
    async fn load_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let err = load_artifact_cache(&temp.path().join("absent"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImgcacheError::CacheFileRead { .. }));
    }

    #[tokio::test]
    async fn resolve_explicit_file_creates_it() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sub").join("my-cache");

        let resolved = resolve_cache_file(Some(&path)).await.unwrap();

        assert_eq!(resolved, path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn resolve_keeps_existing_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache");
        std::fs::write(&path, "abc:\n  id: sha256:1\n").unwrap();

        resolve_cache_file(Some(&path)).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "abc:\n  id: sha256:1\n"
        );
    }

    #[tokio::test]
    #[serial]
    async fn resolve_default_file_under_home() {
        let temp = TempDir::new().unwrap();
        let previous = std::env::var_os("HOME");
        std::env::set_var("HOME", temp.path());

        let resolved = resolve_cache_file(None).await;

        match previous {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }

        let resolved = resolved.unwrap();
        assert_eq!(resolved, temp.path().join(".imgcache").join("cache"));
        assert!(resolved.exists());
    }

    #[tokio::test]
    async fn store_lookup_insert_save() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache");
        std::fs::write(&path, "").unwrap();

        let store = CacheStore::open(path.clone()).await.unwrap();
        assert!(store.is_empty());
        assert!(store.lookup("k").is_none());

        store.insert("k", ImageDetails::local("sha256:1"));
        assert_eq!(store.lookup("k"), Some(ImageDetails::local("sha256:1")));

        store.save().await.unwrap();
        let reopened = CacheStore::open(path).await.unwrap();
        assert_eq!(reopened.snapshot(), store.snapshot());
    }

    #[tokio::test]
    async fn insert_overwrites_stale_entry() {
        let store = CacheStore::new(PathBuf::from("/unused"), sample());

        store.insert("key-b", ImageDetails::local("sha256:99"));

        assert_eq!(store.len(), 2);
        assert_eq!(store.lookup("key-b").unwrap().id(), Some("sha256:99"));
    }

    #[tokio::test]
    async fn clean_store_skips_write() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("never-written");

        let store = CacheStore::new(path.clone(), sample());
        store.save().await.unwrap();

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_save_stays_dirty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing-dir").join("cache");

        let store = CacheStore::new(path.clone(), ArtifactCache::new());
        store.insert("k", ImageDetails::local("sha256:1"));

        assert!(store.save().await.is_err());
        assert_eq!(store.lookup("k").unwrap().id(), Some("sha256:1"));

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        store.save().await.unwrap();
        assert!(path.exists());
    }
}
