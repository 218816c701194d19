//! Docker/Podman CLI client
//!
//! Implements the DaemonClient trait by executing the engine's CLI.
//! Every child process is killed when its future is dropped, so callers
//! cancel in-flight operations by dropping them.

use crate::config::Engine;
use crate::daemon::client::{BuildOptions, DaemonClient, ImageInspect, ImageSummary};
use crate::daemon::reference::{self, DEFAULT_INDEX_SERVER};
use crate::error::{ImgcacheError, ImgcacheResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tracing::{debug, info};

/// Stderr fragments engines print for unknown images
const NOT_FOUND_MARKERS: &[&str] = &["no such image", "image not known", "failed to find image"];

static DIGEST_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Daemon client driving the docker or podman CLI
pub struct EngineClient {
    engine: Engine,
}

impl EngineClient {
    /// Create a client for the given engine
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(self.engine.binary());
        cmd.args(args).kill_on_drop(true);
        cmd
    }

    /// Execute an engine command and return the output
    async fn exec(&self, args: &[&str]) -> ImgcacheResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.engine, args);

        self.command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ImgcacheError::command_failed(format!("{} {:?}", self.engine, args), e))
    }

    /// Podman takes TLS trust per command; docker only from daemon config
    fn tls_args(&self, args: &mut Vec<String>, insecure: bool) {
        if !insecure {
            return;
        }
        match self.engine {
            Engine::Podman => args.push("--tls-verify=false".to_string()),
            Engine::Docker => {
                debug!("docker reads insecure registries from daemon.json, not per command")
            }
        }
    }

    fn digest_file() -> PathBuf {
        let n = DIGEST_FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("imgcache-digest-{}-{}", std::process::id(), n))
    }

    /// Find a digest recorded for `reference`'s repository after a push
    async fn digest_from_inspect(&self, reference: &str) -> ImgcacheResult<Option<String>> {
        let repository = reference::repository(reference);
        let digest = self.inspect_image(reference).await?.and_then(|image| {
            image
                .repo_digests
                .iter()
                .find_map(|d| d.strip_prefix(repository)?.strip_prefix('@').map(String::from))
        });
        Ok(digest)
    }
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    NOT_FOUND_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Engines differ on whether IDs carry the algorithm prefix
fn normalize_id(id: &str) -> String {
    if id.contains(':') {
        id.to_string()
    } else {
        format!("sha256:{}", id)
    }
}

/// Parse `docker image inspect` / `podman image inspect` JSON output
fn parse_inspect(stdout: &str) -> ImgcacheResult<Option<ImageInspect>> {
    let images: Vec<serde_json::Value> = serde_json::from_str(stdout)?;

    let image = match images.first() {
        Some(image) => image,
        None => return Ok(None),
    };

    let id = image["Id"]
        .as_str()
        .ok_or_else(|| ImgcacheError::Internal("image inspect output has no Id".to_string()))?;

    let repo_digests = image["RepoDigests"]
        .as_array()
        .map(|digests| {
            digests
                .iter()
                .filter_map(|d| d.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    Ok(Some(ImageInspect {
        id: normalize_id(id),
        repo_digests,
    }))
}

/// Find the digest in `docker push` output ("latest: digest: sha256:... size: 528")
fn parse_push_digest(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = &line[line.find("digest: ")? + "digest: ".len()..];
        rest.split_whitespace()
            .next()
            .filter(|d| d.starts_with("sha256:"))
            .map(String::from)
    })
}

/// Parse `images --format "{{.ID}}\t{{.Repository}}:{{.Tag}}\t{{.Digest}}"` output
fn parse_image_list(stdout: &str) -> Vec<ImageSummary> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let id = fields.next()?.trim();
            let reference = fields.next().unwrap_or_default().trim();
            let digest = fields
                .next()
                .map(str::trim)
                .filter(|d| d.starts_with("sha256:"))
                .map(String::from);
            Some(ImageSummary {
                id: normalize_id(id),
                reference: reference.to_string(),
                digest,
            })
        })
        .collect()
}

/// Pull the index address out of `info --format "{{json .}}"` output
fn parse_index_server(stdout: &str) -> ImgcacheResult<String> {
    let info: serde_json::Value = serde_json::from_str(stdout)?;

    // docker reports IndexServerAddress, podman its search registries
    let address = info["IndexServerAddress"]
        .as_str()
        .or_else(|| info["registries"]["search"][0].as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_INDEX_SERVER);

    Ok(address.to_string())
}

#[async_trait]
impl DaemonClient for EngineClient {
    async fn is_available(&self) -> bool {
        self.command(&["version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn inspect_image(&self, reference: &str) -> ImgcacheResult<Option<ImageInspect>> {
        let output = self.exec(&["image", "inspect", reference]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Ok(None);
            }
            return Err(ImgcacheError::command_exec(
                format!("{} image inspect", self.engine),
                stderr,
            ));
        }

        parse_inspect(&String::from_utf8_lossy(&output.stdout))
    }

    async fn tag(&self, source: &str, target: &str) -> ImgcacheResult<()> {
        debug!("Tagging {} as {}", source, target);

        let output = self.exec(&["tag", source, target]).await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            Err(ImgcacheError::ImageNotFound(source.to_string()))
        } else {
            Err(ImgcacheError::ImageTag {
                source_ref: source.to_string(),
                target: target.to_string(),
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn push(&self, reference: &str, insecure: bool) -> ImgcacheResult<String> {
        info!("Pushing image: {}", reference);

        let mut args = vec!["push".to_string()];
        self.tls_args(&mut args, insecure);

        let digest_file = match self.engine {
            Engine::Podman => {
                let path = Self::digest_file();
                args.push(format!("--digestfile={}", path.display()));
                Some(path)
            }
            Engine::Docker => None,
        };
        args.push(reference.to_string());

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec(&args_refs).await?;

        if !output.status.success() {
            return Err(ImgcacheError::ImagePush {
                image: reference.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut digest = parse_push_digest(&String::from_utf8_lossy(&output.stdout));

        if let Some(path) = digest_file {
            if digest.is_none() {
                digest = tokio::fs::read_to_string(&path)
                    .await
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
            }
            let _ = tokio::fs::remove_file(&path).await;
        }

        if digest.is_none() {
            digest = self.digest_from_inspect(reference).await?;
        }

        digest.ok_or_else(|| ImgcacheError::ImagePush {
            image: reference.to_string(),
            reason: "registry did not report a digest".to_string(),
        })
    }

    async fn pull(&self, reference: &str, insecure: bool) -> ImgcacheResult<()> {
        info!("Pulling image: {}", reference);

        let mut args = vec!["pull".to_string()];
        self.tls_args(&mut args, insecure);
        args.push(reference.to_string());

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec(&args_refs).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ImgcacheError::ImagePull {
                image: reference.to_string(),
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn build(
        &self,
        options: &BuildOptions,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> ImgcacheResult<String> {
        let primary_tag = options
            .tags
            .first()
            .ok_or_else(|| ImgcacheError::Internal("build needs at least one tag".to_string()))?;

        let mut args = vec!["build".to_string()];
        for tag in &options.tags {
            args.push("-t".to_string());
            args.push(tag.clone());
        }
        args.push("-f".to_string());
        args.push(options.dockerfile.display().to_string());
        for (key, value) in &options.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(options.context.display().to_string());

        debug!("Building image: {} {:?}", self.engine, args);

        let mut child = Command::new(self.engine.binary())
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ImgcacheError::command_failed(format!("{} build", self.engine), e))?;

        let all_output = super::stream_child_output(&mut child, on_output).await?;

        let status = child
            .wait()
            .await
            .map_err(|e| ImgcacheError::command_failed(format!("{} build", self.engine), e))?;

        if !status.success() {
            return Err(ImgcacheError::ImageBuild {
                tag: primary_tag.clone(),
                reason: super::build_error_output(&all_output),
            });
        }

        let image = self
            .inspect_image(primary_tag)
            .await?
            .ok_or_else(|| ImgcacheError::ImageNotFound(primary_tag.clone()))?;

        Ok(image.id)
    }

    async fn image_list(&self, filter: &str) -> ImgcacheResult<Vec<ImageSummary>> {
        let reference_filter = format!("reference={}", filter);
        let mut args = vec![
            "images",
            "--no-trunc",
            "--format",
            "{{.ID}}\t{{.Repository}}:{{.Tag}}\t{{.Digest}}",
        ];
        if !filter.is_empty() {
            args.push("--filter");
            args.push(&reference_filter);
        }

        let output = self.exec(&args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ImgcacheError::command_exec(
                format!("{} images", self.engine),
                stderr,
            ));
        }

        Ok(parse_image_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn registry_info(&self) -> ImgcacheResult<String> {
        let output = self.exec(&["info", "--format", "{{json .}}"]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ImgcacheError::command_exec(
                format!("{} info", self.engine),
                stderr,
            ));
        }

        parse_index_server(&String::from_utf8_lossy(&output.stdout))
    }

    fn name(&self) -> &'static str {
        match self.engine {
            Engine::Docker => "Docker",
            Engine::Podman => "Podman",
        }
    }
}
