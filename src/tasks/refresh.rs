//! Refresh task - keeps the snapshot cache warm

use std::time::Duration;
use tracing::info;

use crate::state::AppState;

/// Background task that periodically refreshes the snapshot cache.
///
/// Ticks at `interval`; the cache decides whether its TTL has expired.
pub async fn refresh_task(state: AppState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);

    info!(
        uri = %state.cache.uri(),
        interval_secs = interval.as_secs(),
        "Refresh task started"
    );

    loop {
        ticker.tick().await;
        state.refresh().await;
    }
}
