use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::store::WalSlotStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the store's WAL once `threshold` appends have piled up since the
/// last rewrite. Returns whether a compaction ran.
pub async fn compact_if_needed(store: &WalSlotStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(kept) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted WAL: {appends} appends folded into {kept} events");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task: periodically compacts the WAL.
pub async fn run_compactor(store: Arc<WalSlotStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}
