//! Application state shared across handlers

use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use crate::aggregate::StatsInfo;
use crate::cache::{Refresh, SnapshotCache};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::filters::Filters;
use crate::presentation::Pages;
use crate::routes::metrics::Metrics;
use crate::stats::get_stats;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Snapshot cache, refreshed on TTL expiry
    pub cache: Arc<SnapshotCache>,
    /// HTML page renderer
    pub pages: Arc<Pages>,
    /// Application metrics for Prometheus
    pub metrics: Arc<Metrics>,
    /// Name, version and start time reported by `/serverinfo`
    pub server_info: Arc<String>,
}

impl AppState {
    /// Create new application state
    ///
    /// # Arguments
    /// * `config` - Loaded configuration
    /// * `cache` - Snapshot cache for the configured feed
    pub fn new(config: Config, cache: SnapshotCache) -> Result<Self> {
        let server_info = format!(
            "wmstats version={} started={}",
            env!("CARGO_PKG_VERSION"),
            chrono::Utc::now().to_rfc3339()
        );
        let pages = Pages::new(config.base_path(), server_info.clone())?;
        Ok(Self {
            config: Arc::new(config),
            cache: Arc::new(cache),
            pages: Arc::new(pages),
            metrics: Arc::new(Metrics::new()),
            server_info: Arc::new(server_info),
        })
    }

    /// Refresh the snapshot if its TTL expired, recording the outcome.
    ///
    /// Failures are logged by the cache and counted here; the stale snapshot
    /// stays in place.
    pub async fn refresh(&self) {
        match self.cache.refresh_if_expired().await {
            Ok(Refresh::Updated) => self.metrics.inc_refreshes(),
            Ok(Refresh::Fresh) => {}
            Err(_) => self.metrics.inc_refresh_failures(),
        }
    }

    /// Aggregate the current snapshot with the given filters.
    pub async fn stats(&self, filters: Filters) -> Result<StatsInfo> {
        self.refresh().await;
        let snapshot = self.cache.require()?;
        let verbose = self.config.verbose;

        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || get_stats(&snapshot.data, &filters, verbose))
            .await
            .map_err(|e| AppError::Internal(format!("aggregation task failed: {}", e)))?;

        match &result {
            Ok(_) => self.metrics.record_aggregation(started.elapsed()),
            Err(e) => {
                error!(error = %e, "Aggregation failed");
                self.metrics.inc_aggregation_failures();
            }
        }
        result
    }
}
