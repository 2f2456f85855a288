//! The request-to-artifact pipeline.
//!
//! Every transform request flows through here: parse, fingerprint, cache
//! probes, production, dual cache write, response assembly. Video requests
//! without a thumbnail flag take the deferred path: the original streams
//! back immediately while a durable job produces the artifact for later
//! requests.

pub mod parser;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use refrax_model::{
    Fingerprint, ImageFormat, JobEvent, JobEventKind, JobPriority, JobStatus, MediaKind,
    OutputFormat, TransformParams,
    fingerprint::PUBLIC_PREFIX,
    format::{self, sniff_content_type},
};

use crate::cache::{DiskCache, ExistenceCache, SmartCachePolicy};
use crate::error::{RefraxError, Result};
use crate::image::{self, ClientCapabilities, OptimizationMetrics};
use crate::invalidate::Invalidator;
use crate::jobs::{JobEventBus, JobStore};
use crate::storage::{METADATA_ORIGINAL_PATH, ObjectStore};
use crate::video::VideoTransformer;

pub use parser::{ParsedRequest, parse_transform_path, to_directives};

/// Capability signals extracted from the incoming request.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub accept: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    pub fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities::detect(self.accept.as_deref(), self.user_agent.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Ready,
    Processing,
}

/// What the HTTP layer renders: body, type, caching directives, and the
/// optional video/optimization annotations.
#[derive(Debug)]
pub struct Delivery {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub etag: String,
    pub cache_hit: bool,
    /// True on the deferred-video path; the response must not be cached.
    pub no_store: bool,
    pub video_status: Option<VideoStatus>,
    pub optimization: Option<OptimizationMetrics>,
}

/// Metadata-only answer for HEAD probes; produces nothing.
#[derive(Debug, Default)]
pub struct ProbeReply {
    pub cached: bool,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub video_status: Option<VideoStatus>,
}

pub struct TransformPipeline {
    storage: Arc<dyn ObjectStore>,
    existence: Arc<ExistenceCache>,
    disk: Arc<DiskCache>,
    policy: Arc<SmartCachePolicy>,
    jobs: Option<Arc<JobStore>>,
    events: Arc<JobEventBus>,
    transformer: Arc<VideoTransformer>,
    invalidator: Invalidator,
    public_dir: PathBuf,
    temp_dir: PathBuf,
    max_retries: i32,
}

impl std::fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformPipeline").finish_non_exhaustive()
    }
}

impl TransformPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        existence: Arc<ExistenceCache>,
        disk: Arc<DiskCache>,
        policy: Arc<SmartCachePolicy>,
        jobs: Option<Arc<JobStore>>,
        events: Arc<JobEventBus>,
        transformer: Arc<VideoTransformer>,
        public_dir: PathBuf,
        temp_dir: PathBuf,
        max_retries: i32,
    ) -> Self {
        let invalidator = Invalidator::new(
            Arc::clone(&storage),
            Arc::clone(&disk),
            Arc::clone(&existence),
        );
        Self {
            storage,
            existence,
            disk,
            policy,
            jobs,
            events,
            transformer,
            invalidator,
            public_dir,
            temp_dir,
            max_retries,
        }
    }

    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    /// Serve a `GET /t/...` request end to end.
    pub async fn handle(&self, path: &str, client: &ClientContext) -> Result<Delivery> {
        let parsed = parse_transform_path(path)?;
        let kind = MediaKind::from_path(&parsed.file_path);
        let (params, optimizer_params) = self.adjust_params(&parsed, kind, client);
        let fingerprint = Fingerprint::compute(&parsed.file_path, &params);
        let file_path = parsed.file_path;

        // Remote cache tier, fronted by the existence cache.
        if let Some(delivery) = self.probe_remote_cache(&params, &fingerprint, kind).await {
            self.finish(&file_path, delivery.bytes.len() as u64).await;
            return Ok(delivery);
        }

        // Local disk tier.
        if let Some(delivery) = self
            .probe_local_cache(&file_path, &params, &fingerprint, kind)
            .await
        {
            self.finish(&file_path, delivery.bytes.len() as u64).await;
            return Ok(delivery);
        }

        // Cache miss: the original must exist before any production.
        if !self.original_exists(&file_path).await? {
            let report = self.invalidator.invalidate(&file_path).await;
            debug!(
                file_path,
                stale_local = report.local_deleted,
                stale_remote = report.remote_deleted,
                "original missing, stale derived artifacts invalidated"
            );
            return Err(RefraxError::NotFound(format!("original {file_path}")));
        }

        let delivery = match kind {
            MediaKind::Image => {
                self.produce_image(&file_path, &optimizer_params, &fingerprint, client)
                    .await?
            }
            MediaKind::Video if params.thumbnail => {
                self.produce_video_sync(&file_path, &params, &fingerprint)
                    .await?
            }
            MediaKind::Video => {
                self.defer_video(&file_path, &params, &fingerprint).await?
            }
            MediaKind::Other => {
                return Err(RefraxError::InvalidRequest(format!(
                    "unsupported media type: {file_path}"
                )));
            }
        };

        self.finish(&file_path, delivery.bytes.len() as u64).await;
        Ok(delivery)
    }

    /// Metadata probe backing HEAD requests. Never produces an artifact.
    pub async fn probe(&self, path: &str, client: &ClientContext) -> Result<ProbeReply> {
        let parsed = parse_transform_path(path)?;
        let kind = MediaKind::from_path(&parsed.file_path);
        let (params, _) = self.adjust_params(&parsed, kind, client);
        let fingerprint = Fingerprint::compute(&parsed.file_path, &params);

        if let Ok(Some(meta)) = self.storage.head_meta(&fingerprint.remote_key()).await {
            return Ok(ProbeReply {
                cached: true,
                size: Some(meta.size),
                content_type: meta.content_type,
                etag: Some(fingerprint.etag()),
                video_status: (kind == MediaKind::Video).then_some(VideoStatus::Ready),
            });
        }

        let local_name = fingerprint.local_file_name(&parsed.file_path);
        if self.disk.exists(&local_name).await {
            let size = fs::metadata(self.disk.path_for(&local_name))
                .await
                .map(|m| m.len())
                .ok();
            return Ok(ProbeReply {
                cached: true,
                size,
                content_type: Some(content_type_for(&params, &[])),
                etag: Some(fingerprint.etag()),
                video_status: (kind == MediaKind::Video).then_some(VideoStatus::Ready),
            });
        }

        if !self.original_exists(&parsed.file_path).await? {
            return Err(RefraxError::NotFound(format!(
                "original {}",
                parsed.file_path
            )));
        }

        let video_status = if kind == MediaKind::Video && !params.thumbnail {
            Some(VideoStatus::Processing)
        } else {
            None
        };
        Ok(ProbeReply {
            cached: false,
            video_status,
            ..ProbeReply::default()
        })
    }

    /// Auto-format injection: when no explicit format is requested, embed
    /// the client-adapted choice in the params so the cache key carries it.
    /// Returns `(key params, optimizer params)`; the optimizer still sees
    /// the unconstrained record so it can compare candidates by size.
    fn adjust_params(
        &self,
        parsed: &ParsedRequest,
        kind: MediaKind,
        client: &ClientContext,
    ) -> (TransformParams, TransformParams) {
        let mut params = parsed.params.clone();
        let optimizer_params = params.clone();

        match kind {
            MediaKind::Image if params.format.is_none() => {
                if let Some(source) =
                    format::extension(&parsed.file_path).and_then(|e| ImageFormat::parse(&e))
                {
                    let chosen = image::select_format(source, &client.capabilities());
                    params.format = Some(OutputFormat::Image(chosen));
                }
            }
            MediaKind::Video if params.thumbnail => {
                // Thumbnails are image outputs; default the container.
                if !matches!(params.format, Some(OutputFormat::Image(_))) {
                    params.format = Some(OutputFormat::Image(ImageFormat::Jpeg));
                }
            }
            _ => {}
        }

        (params, optimizer_params)
    }

    async fn probe_remote_cache(
        &self,
        params: &TransformParams,
        fingerprint: &Fingerprint,
        kind: MediaKind,
    ) -> Option<Delivery> {
        let key = fingerprint.remote_key();

        let known = match self.existence.get(&key) {
            Some(exists) => exists,
            None => match self.storage.head(&key).await {
                Ok(exists) => {
                    self.existence.set(key.clone(), exists);
                    exists
                }
                Err(err) => {
                    // Probe errors fall through to the next tier.
                    warn!(key, %err, "remote existence probe failed");
                    false
                }
            },
        };
        if !known {
            return None;
        }

        match self.storage.get(&key).await {
            Ok(bytes) => {
                debug!(key, size = bytes.len(), "remote cache hit");
                let content_type = content_type_for(params, &bytes);
                Some(Delivery {
                    content_type,
                    etag: fingerprint.etag(),
                    cache_hit: true,
                    no_store: false,
                    video_status: (kind == MediaKind::Video).then_some(VideoStatus::Ready),
                    optimization: None,
                    bytes,
                })
            }
            Err(err) => {
                warn!(key, %err, "remote cache fetch failed, falling through");
                self.existence.delete(&key);
                None
            }
        }
    }

    async fn probe_local_cache(
        &self,
        file_path: &str,
        params: &TransformParams,
        fingerprint: &Fingerprint,
        kind: MediaKind,
    ) -> Option<Delivery> {
        let name = fingerprint.local_file_name(file_path);
        if !self.disk.exists(&name).await {
            return None;
        }
        match self.disk.read(&name).await {
            Ok(bytes) => {
                debug!(name, size = bytes.len(), "local cache hit");
                let content_type = content_type_for(params, &bytes);
                Some(Delivery {
                    content_type,
                    etag: fingerprint.etag(),
                    cache_hit: true,
                    no_store: false,
                    video_status: (kind == MediaKind::Video).then_some(VideoStatus::Ready),
                    optimization: None,
                    bytes,
                })
            }
            Err(err) => {
                warn!(name, %err, "local cache read failed, falling through");
                None
            }
        }
    }

    async fn original_exists(&self, file_path: &str) -> Result<bool> {
        if fs::try_exists(self.public_dir.join(file_path))
            .await
            .unwrap_or(false)
        {
            return Ok(true);
        }
        let key = format!("{PUBLIC_PREFIX}{file_path}");
        if let Some(exists) = self.existence.get(&key) {
            return Ok(exists);
        }
        let exists = self.storage.head(&key).await?;
        self.existence.set(key, exists);
        Ok(exists)
    }

    async fn fetch_original(&self, file_path: &str) -> Result<Vec<u8>> {
        let local = self.public_dir.join(file_path);
        if fs::try_exists(&local).await.unwrap_or(false) {
            return Ok(fs::read(local).await?);
        }
        self.storage
            .get(&format!("{PUBLIC_PREFIX}{file_path}"))
            .await
    }

    async fn produce_image(
        &self,
        file_path: &str,
        optimizer_params: &TransformParams,
        fingerprint: &Fingerprint,
        client: &ClientContext,
    ) -> Result<Delivery> {
        let source = self.fetch_original(file_path).await?;
        let optimized = image::optimize(
            source,
            optimizer_params.clone(),
            client.capabilities(),
        )
        .await?;

        info!(
            file_path,
            format = optimized.format.ext(),
            original = optimized.metrics.original_size,
            optimized = optimized.metrics.optimized_size,
            "image produced"
        );

        self.store_artifact(
            file_path,
            fingerprint,
            &optimized.bytes,
            optimized.format.mime(),
        )
        .await;

        Ok(Delivery {
            content_type: optimized.format.mime().to_string(),
            etag: fingerprint.etag(),
            cache_hit: false,
            no_store: false,
            video_status: None,
            optimization: Some(optimized.metrics),
            bytes: optimized.bytes,
        })
    }

    /// Thumbnail extraction runs synchronously; callers wait for the frame.
    async fn produce_video_sync(
        &self,
        file_path: &str,
        params: &TransformParams,
        fingerprint: &Fingerprint,
    ) -> Result<Delivery> {
        fs::create_dir_all(&self.temp_dir).await?;

        let local_original = self.public_dir.join(file_path);
        let mut temp_source = None;
        let source = if fs::try_exists(&local_original).await.unwrap_or(false) {
            local_original
        } else {
            let bytes = self
                .storage
                .get(&format!("{PUBLIC_PREFIX}{file_path}"))
                .await?;
            let path = self.temp_dir.join(format!("src-{}", Uuid::new_v4()));
            fs::write(&path, &bytes).await?;
            temp_source = Some(path.clone());
            path
        };

        let output = self
            .temp_dir
            .join(format!("out-{}.{}", Uuid::new_v4(), fingerprint.ext()));

        let result = self
            .transformer
            .transform(&source, &output, params, None)
            .await;

        let outcome = match result {
            Ok(()) => fs::read(&output).await.map_err(RefraxError::from),
            Err(err) => Err(err),
        };

        if let Some(path) = temp_source {
            let _ = fs::remove_file(path).await;
        }
        let _ = fs::remove_file(&output).await;

        let bytes = outcome?;
        let content_type = content_type_for(params, &bytes);
        self.store_artifact(file_path, fingerprint, &bytes, &content_type)
            .await;

        Ok(Delivery {
            content_type,
            etag: fingerprint.etag(),
            cache_hit: false,
            no_store: false,
            video_status: None,
            optimization: None,
            bytes,
        })
    }

    /// The deferred path: consult the job store, enqueue if needed, and
    /// stream the original back immediately.
    async fn defer_video(
        &self,
        file_path: &str,
        params: &TransformParams,
        fingerprint: &Fingerprint,
    ) -> Result<Delivery> {
        let jobs = self.jobs.as_ref().ok_or_else(|| {
            RefraxError::Internal("video job queue unavailable".to_string())
        })?;

        let params_json = params.to_json_normalized();
        let local_name = fingerprint.local_file_name(file_path);

        if let Some(job) = jobs.get_by_key(file_path, &params_json).await? {
            if job.status == JobStatus::Completed {
                if self.disk.exists(&job.cache_path).await {
                    let bytes = self.disk.read(&job.cache_path).await?;
                    let content_type = content_type_for(params, &bytes);
                    return Ok(Delivery {
                        content_type,
                        etag: fingerprint.etag(),
                        cache_hit: true,
                        no_store: false,
                        video_status: Some(VideoStatus::Ready),
                        optimization: None,
                        bytes,
                    });
                }
                // Completed but the artifact is gone; self-heal by
                // rebuilding.
                warn!(job_id = %job.id, "completed job lost its artifact, resetting");
                jobs.reset_to_pending(job.id).await?;
            }
        }

        let (job, created) = jobs
            .create(
                file_path,
                &params_json,
                &local_name,
                JobPriority::Normal,
                self.max_retries,
            )
            .await?;
        if created {
            self.events
                .publish(JobEvent::new(JobEventKind::Created, job.id, file_path));
        }

        let bytes = self.fetch_original(file_path).await?;
        let content_type = format::extension(file_path)
            .and_then(|ext| refrax_model::VideoFormat::parse(&ext))
            .map(|f| f.mime().to_string())
            .or_else(|| sniff_content_type(&bytes).map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        Ok(Delivery {
            content_type,
            // Distinct from the artifact's ETag; this response is the
            // original, not the derived bytes.
            etag: format!("\"{}-processing\"", fingerprint.digest()),
            cache_hit: false,
            no_store: true,
            video_status: Some(VideoStatus::Processing),
            optimization: None,
            bytes,
        })
    }

    /// Dual cache write. The remote tier always receives the artifact; the
    /// local tier only when the policy says the original is hot.
    async fn store_artifact(
        &self,
        file_path: &str,
        fingerprint: &Fingerprint,
        bytes: &[u8],
        content_type: &str,
    ) {
        let metadata = HashMap::from([(
            METADATA_ORIGINAL_PATH.to_string(),
            file_path.to_string(),
        )]);
        let key = fingerprint.remote_key();
        match self.storage.put(&key, bytes, content_type, &metadata).await {
            Ok(()) => self.existence.set(key, true),
            Err(err) => warn!(key, %err, "remote cache write failed"),
        }

        if self.policy.should_keep_local(file_path) {
            let name = fingerprint.local_file_name(file_path);
            if let Err(err) = self.disk.write(&name, bytes).await {
                warn!(name, %err, "local cache write failed");
            }
        }
    }

    /// Per-request bookkeeping: access record plus the cleanup lottery.
    async fn finish(&self, file_path: &str, size: u64) {
        self.policy.record_access(file_path, size);
        self.policy.maybe_cleanup(&self.disk).await;
    }
}

/// Content type from the (possibly injected) format param, else sniffed
/// from the bytes.
fn content_type_for(params: &TransformParams, bytes: &[u8]) -> String {
    params
        .format
        .map(|f| f.mime().to_string())
        .or_else(|| sniff_content_type(bytes).map(str::to_string))
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
