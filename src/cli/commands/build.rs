//! Build command - produce every configured artifact

use crate::builder::{BuiltImage, Builder, Outcome};
use crate::cache::{new_cache, CacheSettings, ContextLister};
use crate::cancel::CancelSignal;
use crate::cli::args::BuildArgs;
use crate::config::Config;
use crate::daemon::{create_client, InsecureRegistries};
use crate::error::{ImgcacheError, ImgcacheResult};
use console::style;
use std::sync::Arc;
use tracing::debug;

/// Execute the build command
pub async fn execute(
    args: BuildArgs,
    config: &Config,
    cancel: CancelSignal,
) -> ImgcacheResult<()> {
    if config.artifacts.is_empty() {
        return Err(ImgcacheError::NoArtifacts);
    }

    let settings = settings_for(&args, config);
    let daemon = create_client(&config.daemon);

    if !daemon.is_available().await {
        return Err(ImgcacheError::DaemonUnavailable(format!(
            "{} is not running or not installed",
            daemon.name()
        )));
    }

    let insecure = Arc::new(InsecureRegistries::new(&settings.insecure_registries));
    let cache = new_cache(
        &settings,
        daemon.clone(),
        Arc::new(ContextLister::new()),
        insecure.clone(),
    )
    .await;
    debug!(
        "Building {} artifact(s), cache {}",
        config.artifacts.len(),
        if cache.is_enabled() { "enabled" } else { "disabled" }
    );

    let builder = Builder::new(cache, daemon, settings.images_are_local, insecure);
    let images = builder.build_all(&config.artifacts, &cancel).await?;

    print_summary(&images);
    Ok(())
}

/// Cache settings from the config with command-line overrides applied
fn settings_for(args: &BuildArgs, config: &Config) -> CacheSettings {
    let mut settings = CacheSettings::from_config(config);
    if args.no_cache {
        settings.enabled = false;
    }
    if let Some(ref file) = args.cache_file {
        settings.file = Some(file.clone());
    }
    if args.remote {
        settings.images_are_local = false;
    }
    settings
}

fn print_summary(images: &[BuiltImage]) {
    for image in images {
        let outcome = match image.outcome {
            Outcome::Reused => style("reused").green(),
            Outcome::Built => style("built").cyan(),
        };
        println!("{} {:<7} {}", style("✓").green(), outcome, image.reference);
    }

    let reused = images
        .iter()
        .filter(|i| i.outcome == Outcome::Reused)
        .count();
    println!();
    println!(
        "{} image(s): {} reused, {} built",
        images.len(),
        reused,
        images.len() - reused
    );
}
