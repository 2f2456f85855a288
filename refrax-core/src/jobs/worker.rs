//! Bounded polling consumer of the job store.
//!
//! One pool per process. Each poll tick claims at most one job (re-entrancy
//! guarded) and only while the count of processing rows is under the
//! concurrency bound; the claimed job runs on its own task so ticks stay
//! cheap. Orphaned `processing` rows are reset to `pending` at startup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sysinfo::System;
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

use refrax_model::{
    Fingerprint, JobEvent, JobEventKind, JobStatus, TransformParams, VideoJob,
    fingerprint::PUBLIC_PREFIX, format::sniff_content_type,
};

use crate::cache::DiskCache;
use crate::error::{RefraxError, Result};
use crate::storage::{METADATA_ORIGINAL_PATH, ObjectStore};
use crate::video::VideoTransformer;

use super::events::JobEventBus;
use super::store::JobStore;

/// Cleanup of terminal rows runs this often.
const CLEANUP_CADENCE: Duration = Duration::from_secs(3600);

pub struct WorkerPool {
    store: Arc<JobStore>,
    events: Arc<JobEventBus>,
    storage: Arc<dyn ObjectStore>,
    disk: Arc<DiskCache>,
    transformer: Arc<VideoTransformer>,
    public_dir: PathBuf,
    temp_dir: PathBuf,
    concurrency: usize,
    poll_interval: Duration,
    retention_hours: i64,
    ticking: AtomicBool,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("concurrency", &self.concurrency)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<JobStore>,
        events: Arc<JobEventBus>,
        storage: Arc<dyn ObjectStore>,
        disk: Arc<DiskCache>,
        transformer: Arc<VideoTransformer>,
        public_dir: PathBuf,
        temp_dir: PathBuf,
        concurrency: Option<usize>,
        poll_interval: Duration,
        retention_hours: i64,
    ) -> Arc<Self> {
        let concurrency = concurrency
            .unwrap_or_else(Self::detect_concurrency)
            .max(1);
        Arc::new(Self {
            store,
            events,
            storage,
            disk,
            transformer,
            public_dir,
            temp_dir,
            concurrency,
            poll_interval,
            retention_hours,
            ticking: AtomicBool::new(false),
        })
    }

    /// `max(1, min(16, RAM_GiB / 2))` when not configured explicitly.
    pub fn detect_concurrency() -> usize {
        let mut sys = System::new();
        sys.refresh_memory();
        let gib = sys.total_memory() / (1024 * 1024 * 1024);
        ((gib / 2) as usize).clamp(1, 16)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Reset orphans, then poll until the task is aborted.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match self.store.reset_orphans().await {
                Ok(_) => {}
                Err(err) => error!(%err, "orphan reset failed at worker startup"),
            }
            info!(
                concurrency = self.concurrency,
                poll_ms = self.poll_interval.as_millis() as u64,
                "worker pool started"
            );

            let mut interval = tokio::time::interval(self.poll_interval);
            let mut last_cleanup = Instant::now();
            loop {
                interval.tick().await;
                Arc::clone(&self).tick().await;

                if last_cleanup.elapsed() >= CLEANUP_CADENCE {
                    last_cleanup = Instant::now();
                    match self.store.cleanup(self.retention_hours).await {
                        Ok(purged) if purged > 0 => {
                            info!(purged, "purged terminal jobs past retention");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(%err, "job cleanup failed"),
                    }
                }
            }
        })
    }

    /// One poll tick: claim at most one pending job while under the bound.
    /// The re-entrancy flag keeps overlapping ticks from double-claiming.
    pub async fn tick(self: Arc<Self>) {
        if self.ticking.swap(true, Ordering::AcqRel) {
            return;
        }

        let claim = async {
            let processing = self.store.count_processing().await?;
            if processing as usize >= self.concurrency {
                return Ok(None);
            }
            self.store.claim_next().await
        }
        .await;

        match claim {
            Ok(Some(job)) => {
                let pool = Arc::clone(&self);
                tokio::spawn(async move {
                    pool.process(job).await;
                });
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "job claim failed"),
        }

        self.ticking.store(false, Ordering::Release);
    }

    async fn process(&self, job: VideoJob) {
        info!(job_id = %job.id, file_path = %job.file_path, "job started");
        self.events
            .publish(JobEvent::new(JobEventKind::Started, job.id, &job.file_path));

        match self.run(&job).await {
            Ok(()) => {
                if let Err(err) = self
                    .store
                    .update(job.id, JobStatus::Completed, Some(100), None)
                    .await
                {
                    error!(job_id = %job.id, %err, "failed to mark job completed");
                }
                self.events.publish(
                    JobEvent::new(JobEventKind::Completed, job.id, &job.file_path)
                        .with_progress(100),
                );
                info!(job_id = %job.id, "job completed");
            }
            Err(err) => {
                let message = err.to_string();
                error!(job_id = %job.id, error = %message, "job failed");
                if let Err(err) = self
                    .store
                    .update(job.id, JobStatus::Error, None, Some(&message))
                    .await
                {
                    error!(job_id = %job.id, %err, "failed to record job error");
                }
                self.events.publish(
                    JobEvent::new(JobEventKind::Error, job.id, &job.file_path)
                        .with_error(&message),
                );
                // Schedule another attempt; a no-op once retries are spent.
                match self.store.retry(job.id).await {
                    Ok(true) => info!(job_id = %job.id, "job scheduled for retry"),
                    Ok(false) => {}
                    Err(err) => error!(job_id = %job.id, %err, "retry scheduling failed"),
                }
            }
        }
    }

    async fn run(&self, job: &VideoJob) -> Result<()> {
        let params = TransformParams::from_json_normalized(&job.params_json)
            .map_err(RefraxError::InvalidRequest)?;
        let fingerprint = Fingerprint::compute(&job.file_path, &params);

        fs::create_dir_all(&self.temp_dir).await?;

        // Prefer a local original; otherwise fetch the remote copy into a
        // uniquely named temp file.
        let local_original = self.public_dir.join(&job.file_path);
        let mut temp_source: Option<PathBuf> = None;
        let source = if fs::try_exists(&local_original).await.unwrap_or(false) {
            local_original
        } else {
            let remote_key = format!("{PUBLIC_PREFIX}{}", job.file_path);
            let bytes = self.storage.get(&remote_key).await?;
            let path = self.temp_dir.join(format!("src-{}", Uuid::new_v4()));
            fs::write(&path, &bytes).await?;
            temp_source = Some(path.clone());
            path
        };

        let output = self
            .temp_dir
            .join(format!("out-{}.{}", Uuid::new_v4(), fingerprint.ext()));

        let progress = self.progress_callback(job);
        let result = self
            .transformer
            .transform(&source, &output, &params, Some(progress))
            .await;

        let outcome = match result {
            Ok(()) => self.persist(job, &params, &fingerprint, &output).await,
            Err(err) => Err(err),
        };

        if let Some(path) = temp_source {
            let _ = fs::remove_file(path).await;
        }
        let _ = fs::remove_file(&output).await;

        outcome
    }

    async fn persist(
        &self,
        job: &VideoJob,
        params: &TransformParams,
        fingerprint: &Fingerprint,
        output: &std::path::Path,
    ) -> Result<()> {
        let bytes = fs::read(output).await?;
        let content_type = params
            .format
            .map(|f| f.mime())
            .or_else(|| sniff_content_type(&bytes))
            .unwrap_or("application/octet-stream");

        self.disk.write(&job.cache_path, &bytes).await?;

        let metadata = HashMap::from([(
            METADATA_ORIGINAL_PATH.to_string(),
            job.file_path.clone(),
        )]);
        self.storage
            .put(&fingerprint.remote_key(), &bytes, content_type, &metadata)
            .await?;

        Ok(())
    }

    fn progress_callback(&self, job: &VideoJob) -> crate::video::TranscodeProgress {
        let store = Arc::clone(&self.store);
        let events = Arc::clone(&self.events);
        let job_id = job.id;
        let file_path = job.file_path.clone();
        Box::new(move |percent| {
            events.publish(
                JobEvent::new(JobEventKind::Progress, job_id, &file_path)
                    .with_progress(percent),
            );
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _ = store
                    .update(job_id, JobStatus::Processing, Some(percent), None)
                    .await;
            });
        })
    }
}
