//! Cache invalidation and coordinated asset deletion.
//!
//! Invalidation sweeps all three tiers for one original: local disk files
//! matched by safe stem, remote `cache/` objects matched by their
//! `x-original-path` tag, and in-memory existence entries. No single tier
//! failure is fatal; partial results are reported per tier.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use refrax_model::fingerprint::{CACHE_PREFIX, PUBLIC_PREFIX, safe_stem};

use crate::cache::{DiskCache, ExistenceCache};
use crate::error::{RefraxError, Result};
use crate::jobs::JobStore;
use crate::storage::{METADATA_ORIGINAL_PATH, ObjectStore};

#[derive(Debug, Default, Clone, Serialize)]
pub struct InvalidationReport {
    pub local_deleted: usize,
    pub remote_deleted: usize,
    pub existence_cleared: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AssetDeletionReport {
    pub jobs_deleted: u64,
    pub invalidation: InvalidationReport,
    pub original_deleted: bool,
}

#[derive(Clone)]
pub struct Invalidator {
    storage: Arc<dyn ObjectStore>,
    disk: Arc<DiskCache>,
    existence: Arc<ExistenceCache>,
}

impl std::fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invalidator").finish_non_exhaustive()
    }
}

impl Invalidator {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        disk: Arc<DiskCache>,
        existence: Arc<ExistenceCache>,
    ) -> Self {
        Self {
            storage,
            disk,
            existence,
        }
    }

    /// Remove every derived artifact of `original` from every tier.
    /// Idempotent: a second call reports zero deletions.
    pub async fn invalidate(&self, original: &str) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        let stem = safe_stem(original);

        match self.disk.delete_matching(&stem).await {
            Ok(count) => report.local_deleted = count,
            Err(err) => report.errors.push(format!("local tier: {err}")),
        }

        match self.remote_variants_of(original).await {
            Ok(keys) if !keys.is_empty() => {
                match self.storage.delete_many(&keys).await {
                    Ok(count) => report.remote_deleted = count,
                    Err(err) => report.errors.push(format!("remote tier: {err}")),
                }
                for key in &keys {
                    self.existence.delete(key);
                    report.existence_cleared += 1;
                }
            }
            Ok(_) => {}
            Err(err) => report.errors.push(format!("remote listing: {err}")),
        }

        report.existence_cleared += self.existence.remove_matching(original);

        info!(
            original,
            local = report.local_deleted,
            remote = report.remote_deleted,
            existence = report.existence_cleared,
            "invalidation complete"
        );
        report
    }

    /// Remote cache keys whose `x-original-path` tag matches the original.
    async fn remote_variants_of(&self, original: &str) -> Result<Vec<String>> {
        let entries = self.storage.list(CACHE_PREFIX).await?;
        let mut matched = Vec::new();
        for entry in entries {
            match self.storage.head_meta(&entry.key).await {
                Ok(Some(meta)) => {
                    if meta
                        .metadata
                        .get(METADATA_ORIGINAL_PATH)
                        .is_some_and(|path| path == original)
                    {
                        matched.push(entry.key);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(key = %entry.key, %err, "head failed during invalidation scan");
                }
            }
        }
        Ok(matched)
    }
}

#[derive(Clone)]
pub struct AssetDeleter {
    storage: Arc<dyn ObjectStore>,
    invalidator: Invalidator,
    existence: Arc<ExistenceCache>,
    jobs: Option<Arc<JobStore>>,
}

impl std::fmt::Debug for AssetDeleter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetDeleter").finish_non_exhaustive()
    }
}

impl AssetDeleter {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        invalidator: Invalidator,
        existence: Arc<ExistenceCache>,
        jobs: Option<Arc<JobStore>>,
    ) -> Self {
        Self {
            storage,
            invalidator,
            existence,
            jobs,
        }
    }

    /// Delete an original plus everything derived from it: jobs first, then
    /// caches, then the original object, then in-memory entries. Partial
    /// failures surface in the report rather than aborting the cascade.
    pub async fn delete_asset(&self, original: &str) -> Result<AssetDeletionReport> {
        let key = format!("{PUBLIC_PREFIX}{original}");
        if !self.storage.head(&key).await? {
            return Err(RefraxError::NotFound(format!("asset {original}")));
        }

        let jobs_deleted = match &self.jobs {
            Some(jobs) => match jobs.delete_by_file_path(original).await {
                Ok(count) => count,
                Err(err) => {
                    warn!(original, %err, "job deletion failed during asset delete");
                    0
                }
            },
            None => 0,
        };

        let invalidation = self.invalidator.invalidate(original).await;

        let original_deleted = match self.storage.delete(&key).await {
            Ok(()) => true,
            Err(err) => {
                warn!(original, %err, "original deletion failed");
                false
            }
        };
        self.existence.delete(&key);

        info!(original, jobs_deleted, original_deleted, "asset deleted");
        Ok(AssetDeletionReport {
            jobs_deleted,
            invalidation,
            original_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refrax_model::{Fingerprint, TransformParams};
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::storage::LocalObjectStore;

    async fn setup() -> (
        tempfile::TempDir,
        Arc<LocalObjectStore>,
        Arc<DiskCache>,
        Arc<ExistenceCache>,
        Invalidator,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalObjectStore::new(dir.path().join("store")));
        let disk = Arc::new(DiskCache::new(dir.path().join("cache")));
        disk.init().await.unwrap();
        let existence = Arc::new(ExistenceCache::new(
            100,
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        let invalidator = Invalidator::new(
            storage.clone(),
            disk.clone(),
            existence.clone(),
        );
        (dir, storage, disk, existence, invalidator)
    }

    async fn seed_variant(
        storage: &LocalObjectStore,
        disk: &DiskCache,
        existence: &ExistenceCache,
        original: &str,
        width: u32,
    ) -> String {
        let params = TransformParams {
            width: Some(width),
            ..Default::default()
        };
        let fp = Fingerprint::compute(original, &params);
        let metadata = HashMap::from([(
            METADATA_ORIGINAL_PATH.to_string(),
            original.to_string(),
        )]);
        storage
            .put(&fp.remote_key(), b"artifact", "image/jpeg", &metadata)
            .await
            .unwrap();
        disk.write(&fp.local_file_name(original), b"artifact")
            .await
            .unwrap();
        existence.set(fp.remote_key(), true);
        fp.remote_key()
    }

    #[tokio::test]
    async fn invalidation_clears_every_tier_and_is_idempotent() {
        let (_dir, storage, disk, existence, invalidator) = setup().await;
        let original = "photos/cat.jpg";

        for width in [100, 200, 300] {
            seed_variant(&storage, &disk, &existence, original, width).await;
        }
        // A variant of a different original must survive.
        let other_key = seed_variant(&storage, &disk, &existence, "other.jpg", 100).await;

        let report = invalidator.invalidate(original).await;
        assert_eq!(report.local_deleted, 3);
        assert_eq!(report.remote_deleted, 3);
        assert!(report.errors.is_empty());

        assert!(storage.list(CACHE_PREFIX).await.unwrap().iter().all(|e| e.key == other_key));
        assert_eq!(existence.get(&other_key), Some(true));

        let second = invalidator.invalidate(original).await;
        assert_eq!(second.local_deleted, 0);
        assert_eq!(second.remote_deleted, 0);
        assert!(second.errors.is_empty());
    }

    #[tokio::test]
    async fn asset_delete_cascades() {
        let (_dir, storage, disk, existence, invalidator) = setup().await;
        let original = "clips/intro.mp4";

        storage
            .put(
                &format!("{PUBLIC_PREFIX}{original}"),
                b"original",
                "video/mp4",
                &HashMap::new(),
            )
            .await
            .unwrap();
        seed_variant(&storage, &disk, &existence, original, 640).await;

        let deleter = AssetDeleter::new(
            storage.clone(),
            invalidator,
            existence.clone(),
            None,
        );
        let report = deleter.delete_asset(original).await.unwrap();
        assert!(report.original_deleted);
        assert_eq!(report.invalidation.remote_deleted, 1);
        assert!(!storage.head(&format!("{PUBLIC_PREFIX}{original}")).await.unwrap());

        // Second delete: the original is gone.
        assert!(matches!(
            deleter.delete_asset(original).await,
            Err(RefraxError::NotFound(_))
        ));
    }
}
