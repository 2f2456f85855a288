//! Short-TTL memoization of object-store existence probes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

/// Positive entries expire after this long.
const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(60);
/// Negative entries expire sooner so new uploads become visible quickly.
const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(30);
const DEFAULT_CAPACITY: usize = 10_000;
/// Background sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
pub struct ExistenceEntry {
    pub exists: bool,
    pub inserted_at: Instant,
}

/// Mutex-guarded map of `key -> (exists, timestamp)`. Every operation is
/// O(1) under the lock except cleanup, which only runs at capacity or from
/// the background sweeper.
#[derive(Debug)]
pub struct ExistenceCache {
    inner: Mutex<HashMap<String, ExistenceEntry>>,
    capacity: usize,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl Default for ExistenceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_POSITIVE_TTL, DEFAULT_NEGATIVE_TTL)
    }
}

impl ExistenceCache {
    pub fn new(capacity: usize, positive_ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            positive_ttl,
            negative_ttl,
        }
    }

    fn ttl_for(&self, entry: &ExistenceEntry) -> Duration {
        if entry.exists {
            self.positive_ttl
        } else {
            self.negative_ttl
        }
    }

    fn is_expired(&self, entry: &ExistenceEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) >= self.ttl_for(entry)
    }

    /// Look up a key, dropping it when expired so a stale answer is never
    /// returned.
    pub fn get(&self, key: &str) -> Option<bool> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("existence cache mutex poisoned");
        match inner.get(key) {
            Some(entry) if self.is_expired(entry, now) => {
                inner.remove(key);
                None
            }
            Some(entry) => Some(entry.exists),
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, exists: bool) {
        let mut inner = self.inner.lock().expect("existence cache mutex poisoned");
        if inner.len() >= self.capacity {
            Self::cleanup_locked(&mut inner, self.capacity, |entry, now| {
                self.is_expired(entry, now)
            });
        }
        inner.insert(
            key.into(),
            ExistenceEntry {
                exists,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.inner
            .lock()
            .expect("existence cache mutex poisoned")
            .remove(key);
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("existence cache mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Drop every entry whose key contains `needle`. Used by invalidation to
    /// clear entries referencing an original path.
    pub fn remove_matching(&self, needle: &str) -> usize {
        let mut inner = self.inner.lock().expect("existence cache mutex poisoned");
        let before = inner.len();
        inner.retain(|key, _| !key.contains(needle));
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("existence cache mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prune expired entries; if still at or above 80 % of capacity, drop
    /// the oldest 20 % by insertion time.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock().expect("existence cache mutex poisoned");
        Self::cleanup_locked(&mut inner, self.capacity, |entry, now| {
            self.is_expired(entry, now)
        });
    }

    fn cleanup_locked(
        inner: &mut HashMap<String, ExistenceEntry>,
        capacity: usize,
        expired: impl Fn(&ExistenceEntry, Instant) -> bool,
    ) {
        let now = Instant::now();
        inner.retain(|_, entry| !expired(entry, now));

        if inner.len() >= capacity * 4 / 5 {
            let mut by_age: Vec<(String, Instant)> = inner
                .iter()
                .map(|(key, entry)| (key.clone(), entry.inserted_at))
                .collect();
            by_age.sort_by_key(|(_, inserted_at)| *inserted_at);
            let drop_count = inner.len() / 5;
            for (key, _) in by_age.into_iter().take(drop_count) {
                inner.remove(&key);
            }
            debug!(dropped = drop_count, "existence cache pressure eviction");
        }
    }

    /// Spawn the 10-minute background sweep.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                self.cleanup();
            }
        })
    }
}
