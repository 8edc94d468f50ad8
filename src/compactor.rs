use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;

pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that rewrites the WAL once `threshold` appends have
/// accumulated since the last compaction.
pub async fn run_compactor(
    engine: Arc<Engine>,
    threshold: u64,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        compact_if_due(&engine, threshold).await;
    }
    debug!("compactor stopped");
}

/// One compaction check. Returns the number of bookings written if it ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Option<usize> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return None;
    }
    match engine.compact_wal().await {
        Ok(count) => {
            info!("compacted WAL after {appends} appends");
            Some(count)
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            None
        }
    }
}
