//! In-memory daemon double
//!
//! Tracks tags and image IDs in memory, records every call, and lets a
//! test force any single operation to fail (or never return) while the
//! others keep working.

use crate::daemon::client::{BuildOptions, DaemonClient, ImageInspect, ImageSummary};
use crate::daemon::reference::DEFAULT_INDEX_SERVER;
use crate::error::{ImgcacheError, ImgcacheResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Daemon operations that can be failed or stalled independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Inspect,
    Tag,
    Push,
    Pull,
    Build,
    List,
    Info,
}

#[derive(Default)]
struct FakeState {
    tag_to_id: HashMap<String, String>,
    repo_digests: Vec<String>,
    next_id: u32,
    calls: HashMap<Op, usize>,
    tagged: Vec<String>,
    pushed: Vec<String>,
    pulled: Vec<String>,
    built: Vec<BuildOptions>,
}

/// Fake daemon for tests
#[derive(Default)]
pub struct FakeDaemon {
    state: Mutex<FakeState>,
    failing: HashSet<Op>,
    hanging: HashSet<Op>,
    unavailable: bool,
}

impl FakeDaemon {
    /// Create an empty, fully working daemon
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local image under a tag (the ID also resolves to itself)
    pub fn with_image(self, tag: &str, id: &str) -> Self {
        {
            let mut state = self.lock();
            state.tag_to_id.insert(id.to_string(), id.to_string());
            state.tag_to_id.insert(tag.to_string(), id.to_string());
        }
        self
    }

    /// Repo digests reported by every inspect
    pub fn with_repo_digests(self, digests: &[&str]) -> Self {
        self.lock().repo_digests = digests.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Make `op` fail with a daemon error
    pub fn failing(mut self, op: Op) -> Self {
        self.failing.insert(op);
        self
    }

    /// Make `op` never complete
    pub fn hanging(mut self, op: Op) -> Self {
        self.hanging.insert(op);
        self
    }

    /// Report the daemon as unreachable
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Number of times `op` was called
    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Targets of successful tag calls
    pub fn tagged(&self) -> Vec<String> {
        self.lock().tagged.clone()
    }

    /// References pushed
    pub fn pushed(&self) -> Vec<String> {
        self.lock().pushed.clone()
    }

    /// References pulled
    pub fn pulled(&self) -> Vec<String> {
        self.lock().pulled.clone()
    }

    /// Options of every completed build
    pub fn built(&self) -> Vec<BuildOptions> {
        self.lock().built.clone()
    }

    /// Image ID a reference currently resolves to
    pub fn image_id(&self, reference: &str) -> Option<String> {
        self.lock().tag_to_id.get(reference).cloned()
    }

    /// Digest the fake registry assigns to an image ID
    pub fn digest_for(id: &str) -> String {
        format!("sha256:{}", hex::encode(Sha256::digest(id.as_bytes())))
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, op: Op) -> ImgcacheResult<()> {
        *self.lock().calls.entry(op).or_insert(0) += 1;

        if self.hanging.contains(&op) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(&op) {
            return Err(ImgcacheError::command_exec(
                format!("fake {:?}", op),
                "injected failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DaemonClient for FakeDaemon {
    async fn is_available(&self) -> bool {
        !self.unavailable
    }

    async fn inspect_image(&self, reference: &str) -> ImgcacheResult<Option<ImageInspect>> {
        self.enter(Op::Inspect).await?;

        let state = self.lock();
        let found = state
            .tag_to_id
            .iter()
            .find(|(tag, id)| tag.as_str() == reference || id.as_str() == reference)
            .map(|(_, id)| ImageInspect {
                id: id.clone(),
                repo_digests: state.repo_digests.clone(),
            });
        Ok(found)
    }

    async fn tag(&self, source: &str, target: &str) -> ImgcacheResult<()> {
        self.enter(Op::Tag).await?;

        let mut state = self.lock();
        let id = state
            .tag_to_id
            .get(source)
            .cloned()
            .ok_or_else(|| ImgcacheError::ImageNotFound(source.to_string()))?;
        state.tag_to_id.insert(target.to_string(), id);
        state.tagged.push(target.to_string());
        Ok(())
    }

    async fn push(&self, reference: &str, _insecure: bool) -> ImgcacheResult<String> {
        self.enter(Op::Push).await?;

        let mut state = self.lock();
        let id = state.tag_to_id.get(reference).cloned().unwrap_or_default();
        state.pushed.push(reference.to_string());
        Ok(Self::digest_for(&id))
    }

    async fn pull(&self, reference: &str, _insecure: bool) -> ImgcacheResult<()> {
        self.enter(Op::Pull).await?;

        self.lock().pulled.push(reference.to_string());
        Ok(())
    }

    async fn build(
        &self,
        options: &BuildOptions,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> ImgcacheResult<String> {
        self.enter(Op::Build).await?;

        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = format!("sha256:{}", state.next_id);
            state.tag_to_id.insert(id.clone(), id.clone());
            for tag in &options.tags {
                state.tag_to_id.insert(tag.clone(), id.clone());
                if !tag.contains(':') {
                    state.tag_to_id.insert(format!("{}:latest", tag), id.clone());
                }
            }
            state.built.push(options.clone());
            id
        };

        on_output(format!("Successfully built {}", id));
        Ok(id)
    }

    async fn image_list(&self, filter: &str) -> ImgcacheResult<Vec<ImageSummary>> {
        self.enter(Op::List).await?;

        let state = self.lock();
        let mut images: Vec<ImageSummary> = state
            .tag_to_id
            .iter()
            .filter(|(tag, id)| tag != id && tag.starts_with(filter))
            .map(|(tag, id)| ImageSummary {
                id: id.clone(),
                reference: tag.clone(),
                digest: None,
            })
            .collect();
        images.sort_by(|a, b| a.reference.cmp(&b.reference));
        Ok(images)
    }

    async fn registry_info(&self) -> ImgcacheResult<String> {
        self.enter(Op::Info).await?;
        Ok(DEFAULT_INDEX_SERVER.to_string())
    }

    fn name(&self) -> &'static str {
        "Fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;

    #[tokio::test]
    async fn inspect_by_tag_or_id() {
        let daemon = FakeDaemon::new().with_image("app:v1", "sha256:1");

        let by_tag = daemon.inspect_image("app:v1").await.unwrap().unwrap();
        assert_eq!(by_tag.id, "sha256:1");
        assert!(daemon.inspect_image("sha256:1").await.unwrap().is_some());
        assert!(daemon.inspect_image("other").await.unwrap().is_none());
        assert_eq!(daemon.calls(Op::Inspect), 3);
    }

    #[tokio::test]
    async fn inspect_reports_repo_digests() {
        let daemon = FakeDaemon::new()
            .with_image("app:v1", "sha256:1")
            .with_repo_digests(&["app@sha256:aa", "mirror/app@sha256:aa"]);

        let found = daemon.inspect_image("app:v1").await.unwrap().unwrap();
        assert_eq!(found.repo_digests, vec!["app@sha256:aa", "mirror/app@sha256:aa"]);
    }

    #[tokio::test]
    async fn tag_unknown_source_is_not_found() {
        let daemon = FakeDaemon::new();
        let err = daemon.tag("missing", "app:v1").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(daemon.tagged().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_is_isolated() {
        let daemon = FakeDaemon::new()
            .with_image("app:v1", "sha256:1")
            .failing(Op::Pull);

        assert!(daemon.pull("app@sha256:x", false).await.is_err());
        assert!(daemon.tag("app:v1", "app:v2").await.is_ok());
        assert_eq!(daemon.image_id("app:v2").as_deref(), Some("sha256:1"));
    }

    #[tokio::test]
    async fn build_assigns_sequential_ids() {
        let daemon = FakeDaemon::new();
        let options = BuildOptions::for_artifact(&Artifact::new("app", "/src"));

        let first = daemon.build(&options, &|_| {}).await.unwrap();
        let second = daemon.build(&options, &|_| {}).await.unwrap();

        assert_eq!(first, "sha256:1");
        assert_eq!(second, "sha256:2");
        assert_eq!(daemon.image_id("app:latest").as_deref(), Some("sha256:2"));
        assert_eq!(daemon.built().len(), 2);
    }

    #[tokio::test]
    async fn push_digest_follows_image_id() {
        let daemon = FakeDaemon::new().with_image("app:v1", "sha256:7");
        let digest = daemon.push("app:v1", false).await.unwrap();

        assert_eq!(digest, FakeDaemon::digest_for("sha256:7"));
        assert_eq!(daemon.pushed(), vec!["app:v1"]);
    }
}
