use tracing::debug;

use crate::store::{MemoryStore, StoreError};

/// Compact the log once at least `threshold` appends have accumulated.
/// Returns whether a compaction ran.
pub async fn compact_if_needed(store: &MemoryStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "log compaction not due");
        return Ok(false);
    }
    store.compact().await?;
    Ok(true)
}
