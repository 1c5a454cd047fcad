use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;
use webhooks::{DuplicateDetector, Timestamp};

/// Expires duplicate-tracking entries every TTL period.
///
/// The task runs until aborted. It only removes entries, so deliveries
/// observed concurrently are never delayed by it.
pub fn spawn_duplicate_sweeper(detector: Arc<DuplicateDetector>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(detector.ttl());
        // The first tick completes immediately and there is nothing to expire yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = detector.sweep(Timestamp::now());
            if removed > 0 {
                debug!(removed, remaining = detector.counts().len(), "Expired delivery ids");
            }
        }
    })
}
