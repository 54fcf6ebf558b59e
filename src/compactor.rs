use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

/// Background task that rewrites a facility's WAL once enough appends have
/// accumulated since the last compaction. The threshold is in WAL records,
/// not bytes; a quiet facility never gets rewritten.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
