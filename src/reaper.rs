use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::session::SessionTracker;
use crate::store::LogStore;

/// How often the session reaper looks for idle dialogs.
pub fn reaper_period(max_idle: Duration) -> Duration {
    (max_idle / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

/// Background task that discards dialogs abandoned for `max_idle`.
pub async fn run_session_reaper(sessions: SessionTracker, max_idle: Duration) {
    let mut interval = tokio::time::interval(reaper_period(max_idle));
    loop {
        interval.tick().await;
        let evicted = sessions.evict_idle(Utc::now(), max_idle).await;
        if evicted > 0 {
            info!("reaped {evicted} idle booking dialogs");
        }
    }
}

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(store: Arc<LogStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold).await {
            warn!("compaction failed: {e}");
        }
    }
}

/// One compactor pass. `Ok(true)` when the log was rewritten.
pub async fn compact_if_due(
    store: &LogStore,
    threshold: u64,
) -> Result<bool, crate::engine::EngineError> {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    let compacted = store.compact_wal().await?;
    if compacted {
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("compacted WAL after {appends} appends");
    } else {
        debug!("compaction deferred, store busy");
    }
    Ok(compacted)
}
