//! Image reference helpers
//!
//! Works out which registry a reference points at, so pulls and pushes
//! can honour the insecure-registry list.

use crate::daemon::client::DaemonClient;
use std::collections::HashSet;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Registry host that Docker Hub references resolve to
pub const DOCKER_HUB: &str = "docker.io";

/// Index address reported by daemons that do not say otherwise
pub const DEFAULT_INDEX_SERVER: &str = "https://index.docker.io/v1/";

/// Explicit registry host of a reference, if it names one.
///
/// The first path component is a registry when it contains a `.` or `:`
/// or is `localhost`; anything else belongs to the default registry.
pub fn explicit_registry(reference: &str) -> Option<&str> {
    let (first, _) = reference.split_once('/')?;
    if first.contains('.') || first.contains(':') || first == "localhost" {
        Some(first)
    } else {
        None
    }
}

/// Turn an index server address into a registry host.
///
/// `https://index.docker.io/v1/` becomes `docker.io`.
pub fn registry_host_from_index(index: &str) -> String {
    let trimmed = index
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = trimmed.split('/').next().unwrap_or_default();

    match host {
        "" | "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB.to_string(),
        other => other.to_string(),
    }
}

/// Repository part of a reference, without tag or digest
pub fn repository(reference: &str) -> &str {
    let name = reference.split('@').next().unwrap_or(reference);
    match name.rfind(':') {
        Some(colon) if !name[colon..].contains('/') => &name[..colon],
        _ => name,
    }
}

/// Registries reached without TLS verification
///
/// References without an explicit registry belong to the daemon's default
/// registry, which is asked for at most once per instance and only if the
/// list is not empty. A build session shares one instance behind an `Arc`
/// between its cache and its builder.
#[derive(Debug, Default)]
pub struct InsecureRegistries {
    hosts: HashSet<String>,
    default_registry: OnceCell<String>,
}

impl InsecureRegistries {
    pub fn new(hosts: &[String]) -> Self {
        let hosts = hosts
            .iter()
            .map(|h| registry_host_from_index(h))
            .collect();
        Self {
            hosts,
            default_registry: OnceCell::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Whether pulls and pushes of `reference` must skip TLS verification
    pub async fn is_insecure(&self, reference: &str, daemon: &dyn DaemonClient) -> bool {
        if self.hosts.is_empty() {
            return false;
        }

        let host = match explicit_registry(reference) {
            Some(host) => host.to_string(),
            None => self.default_registry(daemon).await.to_string(),
        };
        self.hosts.contains(&host)
    }

    async fn default_registry(&self, daemon: &dyn DaemonClient) -> &str {
        self.default_registry
            .get_or_init(|| async {
                match daemon.registry_info().await {
                    Ok(index) => {
                        let host = registry_host_from_index(&index);
                        debug!("Default registry of {} daemon: {}", daemon.name(), host);
                        host
                    }
                    Err(e) => {
                        warn!("Could not query default registry, assuming {}: {}", DOCKER_HUB, e);
                        DOCKER_HUB.to_string()
                    }
                }
            })
            .await
    }
}
