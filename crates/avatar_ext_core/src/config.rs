//! Ingestion tunables.
//!
//! Security limits (string/key lengths, depth, array and image caps, MIME
//! allow-list) are constants in `validation`, not configuration.

use crate::rate_limit::DEFAULT_WINDOW;
use crate::validation::MAX_FILE_SIZE_BYTES;
use std::time::Duration;

/// Tunables of one `ExtensionService`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Manifest fetches admitted per URL per window.
    pub manifest_rate_limit: u32,
    /// Asset fetches admitted per URL per window.
    pub asset_rate_limit: u32,
    pub rate_window: Duration,
    /// Upper bound on concurrently resolving assets of one ingestion.
    pub max_in_flight_assets: usize,
    pub max_asset_bytes: u64,
    /// Per-request timeout applied by `HttpFetcher`.
    pub fetch_timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            manifest_rate_limit: 10,
            asset_rate_limit: 50,
            rate_window: DEFAULT_WINDOW,
            max_in_flight_assets: 4,
            max_asset_bytes: MAX_FILE_SIZE_BYTES,
            fetch_timeout: Some(Duration::from_secs(30)),
            user_agent: format!("avatar-ext/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
