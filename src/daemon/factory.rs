//! Daemon client factory

use crate::config::DaemonConfig;
use crate::daemon::client::DaemonClient;
use crate::daemon::engine::EngineClient;
use std::sync::Arc;
use tracing::debug;

/// Create the daemon client selected by the configuration
///
/// The client is shared between the cache and the build pipeline, so it is
/// returned behind an `Arc`.
pub fn create_client(config: &DaemonConfig) -> Arc<dyn DaemonClient> {
    debug!("Using {} daemon client", config.engine);
    Arc::new(EngineClient::new(config.engine))
}
