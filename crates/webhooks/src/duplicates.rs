//! Time-windowed tracking of delivery identifiers.
//!
//! GitHub reuses the `X-GitHub-Delivery` id when a delivery is redelivered,
//! and two hooks pointing at the same callback produce two deliveries of the
//! same event. [`DuplicateDetector`] counts ids it has seen within a TTL
//! window so operators can be told that something is delivering twice.
//!
//! The detector is deliberately approximate: entries expire a fixed TTL after
//! they were *last* seen, and only on [`DuplicateDetector::sweep`], so a
//! duplicate arriving after expiry goes unnoticed. It flags administrative
//! attention; it does not provide exactly-once delivery.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::identifiers::DeliveryId;
use crate::types::Timestamp;

/// TTL used when none is configured.
pub const DEFAULT_DUPLICATE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    last_seen: Timestamp,
}

/// Counts recently seen delivery ids.
///
/// Observers and the sweep share a concurrent map; the sweep only removes
/// entries and never blocks observers for longer than a shard lock.
#[derive(Debug)]
pub struct DuplicateDetector {
    ttl: Duration,
    entries: DashMap<DeliveryId, Entry>,
}

impl DuplicateDetector {
    /// Creates a detector whose entries expire `ttl` after they were last seen.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// The configured TTL, which is also the sweep period.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Records one occurrence of `delivery_id` at `now`.
    ///
    /// Returns the number of times the id has now been seen within the
    /// window, or `0` if `delivery_id` is `None` (untracked).
    pub fn observe(&self, delivery_id: Option<&DeliveryId>, now: Timestamp) -> u64 {
        let Some(id) = delivery_id else {
            return 0;
        };
        let mut entry = self.entries.entry(id.clone()).or_insert(Entry {
            count: 0,
            last_seen: now,
        });
        entry.count += 1;
        entry.last_seen = now;
        entry.count
    }

    /// Removes every entry last seen more than the TTL before `now`.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_seen) <= self.ttl);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Expired delivery ids");
        }
        removed
    }

    /// Returns `true` if some tracked id has been seen more than once.
    pub fn is_duplicate_recently_seen(&self) -> bool {
        self.entries.iter().any(|entry| entry.count > 1)
    }

    /// Snapshot of the tracked ids and their counts.
    pub fn counts(&self) -> HashMap<DeliveryId, u64> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.count))
            .collect()
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DEFAULT_DUPLICATE_TTL)
    }
}

#[cfg(test)]
#[path = "duplicates_tests.rs"]
mod tests;
