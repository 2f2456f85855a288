//! Boot sequence: storage backend, cache tiers, database pool, job queue,
//! worker pool, and the assembled [`AppState`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use refrax_config::{Config, StorageMode};
use refrax_core::cache::{DiskCache, ExistenceCache, SmartCachePolicy};
use refrax_core::invalidate::{AssetDeleter, Invalidator};
use refrax_core::jobs::{JobEventBus, JobStore, MIGRATOR, WorkerPool};
use refrax_core::pipeline::TransformPipeline;
use refrax_core::storage::{LocalObjectStore, ObjectStore, S3ObjectStore};
use refrax_core::upload::Uploader;
use refrax_core::video::VideoTransformer;

use super::app_state::AppState;

/// Build every service the router needs. Returns the state plus the worker
/// pool (when a database is configured) so the caller owns its lifecycle.
pub async fn build_state(config: Config) -> Result<(AppState, Option<Arc<WorkerPool>>)> {
    let config = Arc::new(config);

    let storage: Arc<dyn ObjectStore> = match config.storage.mode {
        StorageMode::S3 => {
            info!(
                bucket = %config.storage.bucket,
                endpoint = ?config.storage.endpoint,
                "using S3-compatible object store"
            );
            Arc::new(
                S3ObjectStore::new(&config.storage)
                    .await
                    .context("object store initialization failed")?,
            )
        }
        StorageMode::Local => {
            info!(root = %config.storage.local_root.display(), "using local object store");
            Arc::new(LocalObjectStore::new(&config.storage.local_root))
        }
    };

    let existence = Arc::new(ExistenceCache::new(
        config.cache.existence_capacity,
        Duration::from_secs(config.cache.existence_positive_ttl_secs),
        Duration::from_secs(config.cache.existence_negative_ttl_secs),
    ));
    Arc::clone(&existence).spawn_sweeper();

    let disk = Arc::new(DiskCache::new(&config.cache.cache_dir));
    disk.init().await.context("disk cache initialization failed")?;
    let policy = Arc::new(SmartCachePolicy::new(config.cache.local_max_bytes));

    let (db, jobs) = match &config.database.url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(url)
                .await
                .context("database connection failed")?;
            MIGRATOR.run(&pool).await.context("migrations failed")?;
            info!("database connected, migrations applied");
            (Some(pool.clone()), Some(Arc::new(JobStore::new(pool))))
        }
        None => {
            warn!("no database configured, video job queue disabled");
            (None, None)
        }
    };

    let events = Arc::new(JobEventBus::default());
    let transformer = Arc::new(VideoTransformer::new(config.video.clone()));

    let pipeline = Arc::new(TransformPipeline::new(
        Arc::clone(&storage),
        Arc::clone(&existence),
        Arc::clone(&disk),
        Arc::clone(&policy),
        jobs.clone(),
        Arc::clone(&events),
        Arc::clone(&transformer),
        config.cache.public_dir.clone(),
        config.cache.temp_dir.clone(),
        config.video.max_retries,
    ));

    let uploader = Arc::new(Uploader::new(
        Arc::clone(&storage),
        jobs.clone(),
        Arc::clone(&events),
        config.upload.max_bytes,
        config.video.max_retries,
    ));

    let invalidator = Invalidator::new(
        Arc::clone(&storage),
        Arc::clone(&disk),
        Arc::clone(&existence),
    );
    let deleter = Arc::new(AssetDeleter::new(
        Arc::clone(&storage),
        invalidator,
        Arc::clone(&existence),
        jobs.clone(),
    ));

    let workers = jobs.as_ref().map(|jobs| {
        WorkerPool::new(
            Arc::clone(jobs),
            Arc::clone(&events),
            Arc::clone(&storage),
            Arc::clone(&disk),
            Arc::clone(&transformer),
            config.cache.public_dir.clone(),
            config.cache.temp_dir.clone(),
            config.video.concurrency,
            Duration::from_millis(config.video.poll_interval_ms),
            config.video.cleanup_retention_hours,
        )
    });

    let state = AppState {
        config,
        storage,
        existence,
        disk,
        pipeline,
        uploader,
        deleter,
        events,
        jobs,
        db,
    };

    Ok((state, workers))
}
