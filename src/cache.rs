//! TTL-gated snapshot cache
//!
//! Owned by the application state and shared by handle; there is no
//! process-wide snapshot.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::fetch::SnapshotSource;

/// Immutable snapshot handed to the aggregation façade
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub data: Arc<Vec<u8>>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Snapshot>,
    expires_at: Option<Instant>,
}

impl CacheState {
    fn expired(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() >= at)
    }
}

/// Outcome of a refresh attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Snapshot still within its TTL
    Fresh,
    /// New bytes were fetched
    Updated,
}

pub struct SnapshotCache {
    source: SnapshotSource,
    ttl: Duration,
    state: RwLock<CacheState>,
    // Serialises fetches so concurrent callers do not stampede the upstream.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SnapshotCache {
    pub fn new(source: SnapshotSource, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: RwLock::new(CacheState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn uri(&self) -> &str {
        self.source.uri()
    }

    /// Re-fetch when the TTL has elapsed.
    ///
    /// A failed fetch keeps the previous bytes and still pushes the expiry
    /// forward, so callers keep serving the stale snapshot.
    pub async fn refresh_if_expired(&self) -> Result<Refresh> {
        let _guard = self.refresh_lock.lock().await;
        if !self.state.read().expired() {
            return Ok(Refresh::Fresh);
        }

        let result = self.source.fetch().await;
        let mut state = self.state.write();
        state.expires_at = Some(Instant::now() + self.ttl);
        match result {
            Ok(data) => {
                info!(uri = %self.source.uri(), bytes = data.len(), "Updated snapshot cache");
                state.snapshot = Some(Snapshot {
                    data: Arc::new(data),
                    fetched_at: Utc::now(),
                });
                Ok(Refresh::Updated)
            }
            Err(e) => {
                warn!(
                    uri = %self.source.uri(),
                    error = %e,
                    stale = state.snapshot.is_some(),
                    "Snapshot refresh failed"
                );
                Err(e)
            }
        }
    }

    /// Current snapshot, if any fetch has ever succeeded.
    pub fn current(&self) -> Option<Snapshot> {
        self.state.read().snapshot.clone()
    }

    /// Current snapshot, or an error when nothing has been fetched yet.
    pub fn require(&self) -> Result<Snapshot> {
        self.current().ok_or_else(|| {
            AppError::Fetch(format!("no snapshot available yet from {}", self.source.uri()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cache_for(path: &std::path::Path, ttl: Duration) -> SnapshotCache {
        let source = SnapshotSource::new(path.to_string_lossy(), Some("t".into()), None).unwrap();
        SnapshotCache::new(source, ttl)
    }

    #[tokio::test]
    async fn test_first_refresh_loads_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "first").unwrap();
        let cache = cache_for(file.path(), Duration::from_secs(300));

        assert!(cache.current().is_none());
        assert_eq!(cache.refresh_if_expired().await.unwrap(), Refresh::Updated);
        assert_eq!(cache.require().unwrap().data.as_slice(), b"first");
    }

    #[tokio::test]
    async fn test_snapshot_kept_within_ttl() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "first").unwrap();
        let cache = cache_for(file.path(), Duration::from_secs(300));
        cache.refresh_if_expired().await.unwrap();

        std::fs::write(file.path(), "second").unwrap();
        assert_eq!(cache.refresh_if_expired().await.unwrap(), Refresh::Fresh);
        assert_eq!(cache.require().unwrap().data.as_slice(), b"first");
    }

    #[tokio::test]
    async fn test_expired_snapshot_is_refetched() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "first").unwrap();
        let cache = cache_for(file.path(), Duration::ZERO);
        cache.refresh_if_expired().await.unwrap();

        std::fs::write(file.path(), "second").unwrap();
        assert_eq!(cache.refresh_if_expired().await.unwrap(), Refresh::Updated);
        assert_eq!(cache.require().unwrap().data.as_slice(), b"second");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wmstats.json");
        std::fs::write(&path, "stale").unwrap();
        let cache = cache_for(&path, Duration::ZERO);
        cache.refresh_if_expired().await.unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(cache.refresh_if_expired().await.is_err());
        assert_eq!(cache.require().unwrap().data.as_slice(), b"stale");
    }

    #[tokio::test]
    async fn test_require_without_snapshot() {
        let cache = cache_for(std::path::Path::new("/nonexistent"), Duration::ZERO);
        assert!(matches!(cache.require(), Err(AppError::Fetch(_))));
    }
}
