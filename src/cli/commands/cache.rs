//! Cache command - inspect the artifact cache

use crate::cache::store::{default_cache_file, load_artifact_cache};
use crate::cache::{cache_key, ArtifactCache, ContextLister, ImageDetails};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::daemon::{create_client, DaemonClient};
use crate::error::ImgcacheResult;
use console::style;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> ImgcacheResult<()> {
    let path = cache_file(args.cache_file, config)?;

    match args.action {
        CacheAction::List { format } => list_entries(&path, config, format).await,
        CacheAction::Hash => show_hashes(&path, config).await,
        CacheAction::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

/// Cache file chosen by flag, then config, then the default location
fn cache_file(flag: Option<PathBuf>, config: &Config) -> ImgcacheResult<PathBuf> {
    match flag.or_else(|| config.cache.file.clone()) {
        Some(path) => Ok(path),
        None => default_cache_file(),
    }
}

/// Entries of the cache file; a missing file is an empty cache
async fn read_entries(path: &Path) -> ImgcacheResult<ArtifactCache> {
    if !path.exists() {
        debug!("Cache file {} does not exist", path.display());
        return Ok(ArtifactCache::new());
    }
    load_artifact_cache(path).await
}

/// List cache entries
async fn list_entries(path: &Path, config: &Config, format: OutputFormat) -> ImgcacheResult<()> {
    let entries = read_entries(path).await?;

    if entries.is_empty() {
        println!("No cache entries found.");
        return Ok(());
    }

    match format {
        OutputFormat::Table => {
            let daemon = create_client(&config.daemon);
            let local = local_image_ids(daemon.as_ref()).await;
            print_entry_table(&entries, local.as_ref());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for key in entries.keys() {
                println!("{}", key);
            }
        }
    }

    Ok(())
}

/// IDs of every local image, or `None` when the daemon cannot tell
async fn local_image_ids(daemon: &dyn DaemonClient) -> Option<HashSet<String>> {
    if !daemon.is_available().await {
        return None;
    }

    match daemon.image_list("").await {
        Ok(images) => Some(images.into_iter().map(|i| i.id).collect()),
        Err(e) => {
            debug!("Could not list local images: {}", e);
            None
        }
    }
}

fn short(value: &str, len: usize) -> &str {
    let value = value.strip_prefix("sha256:").unwrap_or(value);
    value.get(..len).unwrap_or(value)
}

fn print_entry_table(entries: &ArtifactCache, local: Option<&HashSet<String>>) {
    println!("{:<14} {:<14} {:<14} {:<8}", "KEY", "IMAGE ID", "DIGEST", "LOCAL");
    println!("{}", "-".repeat(54));

    for (key, details) in entries {
        let presence = match (local, details.id()) {
            (Some(ids), Some(id)) if ids.contains(id) => style("yes").green().to_string(),
            (Some(_), _) => style("no").dim().to_string(),
            (None, _) => style("?").dim().to_string(),
        };

        println!(
            "{:<14} {:<14} {:<14} {:<8}",
            short(key, 12),
            details.id().map(|id| short(id, 12)).unwrap_or("-"),
            details.digest().map(|d| short(d, 12)).unwrap_or("-"),
            presence
        );
    }

    println!();
    println!("Total: {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
}

/// Show the current cache key of every configured artifact
async fn show_hashes(path: &Path, config: &Config) -> ImgcacheResult<()> {
    if config.artifacts.is_empty() {
        println!("No artifacts configured.");
        return Ok(());
    }

    let entries = read_entries(path).await?;
    let lister = ContextLister::new();

    for artifact in &config.artifacts {
        let key = cache_key(artifact, &lister).await?;
        let status = match entries.get(&key) {
            Some(details) => style(describe(details)).green(),
            None => style("not cached".to_string()).dim(),
        };
        println!("{} {} {}", artifact.target_ref(), style(&key).cyan(), status);
    }

    Ok(())
}

fn describe(details: &ImageDetails) -> String {
    match (details.id(), details.digest()) {
        (_, Some(digest)) => format!("cached ({})", digest),
        (Some(id), None) => format!("cached ({})", id),
        (None, None) => "cached (empty entry)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_config() {
        let mut config = Config::default();
        config.cache.file = Some(PathBuf::from("/config/cache"));

        let path = cache_file(Some(PathBuf::from("/flag/cache")), &config).unwrap();
        assert_eq!(path, PathBuf::from("/flag/cache"));

        let path = cache_file(None, &config).unwrap();
        assert_eq!(path, PathBuf::from("/config/cache"));
    }

    #[test]
    fn short_strips_algorithm() {
        assert_eq!(short("sha256:0123456789abcdef", 12), "0123456789ab");
        assert_eq!(short("abc", 12), "abc");
    }

    #[test]
    fn describe_prefers_digest() {
        let details = ImageDetails {
            digest: Some("sha256:abc".to_string()),
            id: Some("sha256:1".to_string()),
        };
        assert_eq!(describe(&details), "cached (sha256:abc)");
        assert_eq!(describe(&ImageDetails::local("sha256:1")), "cached (sha256:1)");
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let temp = tempfile::TempDir::new().unwrap();
        let entries = read_entries(&temp.path().join("absent")).await.unwrap();
        assert!(entries.is_empty());
    }
}
