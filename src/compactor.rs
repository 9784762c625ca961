use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the organization's WAL once `threshold` events have been appended
/// since the last compaction. Returns whether it compacted.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if threshold == 0 || appended < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            info!(organization = engine.organization_id(), appended, "compacted WAL");
            true
        }
        Err(e) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
            warn!(organization = engine.organization_id(), "WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task checking one organization's WAL every 30 seconds.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}
