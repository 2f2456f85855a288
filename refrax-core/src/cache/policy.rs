//! Retention policy for the local disk cache.
//!
//! Keeps an access record per original path and decides (a) whether a newly
//! produced artifact is worth keeping on disk and (b) when the cache needs
//! trimming. Cleanup runs probabilistically from the request path instead of
//! a dedicated timer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::info;

use refrax_model::fingerprint::safe_stem;

use super::DiskCache;

/// Accesses older than this stop counting toward retention.
const HOT_WINDOW: Duration = Duration::from_secs(3600);
/// Cleanup starts once tracked bytes exceed this share of the ceiling.
const CLEANUP_THRESHOLD: f64 = 0.8;
/// Share of entries evicted per cleanup, oldest access first.
const EVICT_SHARE: f64 = 0.2;
/// Per-request probability of running the cleanup check.
const CLEANUP_LOTTERY: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
struct AccessRecord {
    count: u64,
    last_access: Instant,
    total_size: u64,
}

#[derive(Debug)]
pub struct SmartCachePolicy {
    records: Mutex<HashMap<String, AccessRecord>>,
    max_bytes: u64,
}

impl SmartCachePolicy {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            max_bytes: max_bytes.max(1),
        }
    }

    pub fn record_access(&self, original: &str, size: u64) {
        let mut records = self.records.lock().expect("access records mutex poisoned");
        let now = Instant::now();
        let record = records.entry(original.to_string()).or_insert(AccessRecord {
            count: 0,
            last_access: now,
            total_size: 0,
        });
        // A cold record restarts its window.
        if now.duration_since(record.last_access) > HOT_WINDOW {
            record.count = 0;
            record.total_size = 0;
        }
        record.count += 1;
        record.last_access = now;
        record.total_size += size;
    }

    /// Keep an artifact locally iff its original was requested more than
    /// once within the last hour.
    pub fn should_keep_local(&self, original: &str) -> bool {
        let records = self.records.lock().expect("access records mutex poisoned");
        records.get(original).is_some_and(|record| {
            record.count > 1 && record.last_access.elapsed() <= HOT_WINDOW
        })
    }

    pub fn should_cleanup(&self, tracked_bytes: u64) -> bool {
        tracked_bytes as f64 > self.max_bytes as f64 * CLEANUP_THRESHOLD
    }

    /// Evict the 20 % of tracked originals with the oldest last access,
    /// removing their cached variants from disk. Returns files removed.
    pub async fn cleanup(&self, disk: &DiskCache) -> usize {
        let victims: Vec<String> = {
            let records = self.records.lock().expect("access records mutex poisoned");
            let mut by_age: Vec<(&String, Instant)> = records
                .iter()
                .map(|(path, record)| (path, record.last_access))
                .collect();
            by_age.sort_by_key(|(_, last_access)| *last_access);
            let count = ((by_age.len() as f64 * EVICT_SHARE).ceil() as usize).min(by_age.len());
            by_age
                .into_iter()
                .take(count)
                .map(|(path, _)| path.clone())
                .collect()
        };

        let mut removed = 0;
        for original in &victims {
            removed += disk
                .delete_matching(&safe_stem(original))
                .await
                .unwrap_or(0);
        }
        if !victims.is_empty() {
            let mut records = self.records.lock().expect("access records mutex poisoned");
            for original in &victims {
                records.remove(original);
            }
            info!(
                evicted = victims.len(),
                files = removed,
                "smart cache cleanup"
            );
        }
        removed
    }

    /// The 1 % request lottery: occasionally check pressure and clean up.
    pub async fn maybe_cleanup(&self, disk: &DiskCache) {
        if rand::random::<f64>() >= CLEANUP_LOTTERY {
            return;
        }
        if self.should_cleanup(disk.tracked_bytes()) {
            self.cleanup(disk).await;
        }
    }
}
