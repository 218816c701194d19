use crate::artifact::Artifact;
use crate::cache::store::ImageDetails;
use crate::cache::{BuildReason, ImageCache, Resolution};
use crate::error::ImgcacheResult;
use async_trait::async_trait;

/// Cache that never hits
///
/// Stands in for [`Cache`](super::Cache) whenever caching is off or could
/// not be set up. Touches neither the filesystem nor the daemon.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl ImageCache for NoCache {
    async fn resolve(&self, _artifact: &Artifact) -> ImgcacheResult<Resolution> {
        Ok(Resolution::Build {
            key: None,
            reason: BuildReason::CacheDisabled,
        })
    }

    fn record(&self, _key: &str, _details: ImageDetails) {}

    async fn save(&self) -> ImgcacheResult<()> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
