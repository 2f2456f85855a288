//! Original ingestion: validation, path sanitization, unique-path probing,
//! and the fire-and-forget default video thumbnail.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use refrax_model::{
    CropMode, Fingerprint, ImageFormat, JobEvent, JobEventKind, JobPriority, MediaKind,
    OutputFormat, TransformParams, VideoFormat,
    fingerprint::PUBLIC_PREFIX,
    format::{self, sniff_content_type},
};

use crate::error::{RefraxError, Result};
use crate::jobs::{JobEventBus, JobStore};
use crate::storage::ObjectStore;

/// Unique-path probing gives up after this many suffix attempts.
const MAX_SUFFIX_ATTEMPTS: u32 = 100;

/// Default thumbnail scheduled for every uploaded video: frame at 5 s,
/// 500x500 WebP, crop fill, quality 80.
fn default_thumbnail_params() -> TransformParams {
    TransformParams {
        width: Some(500),
        height: Some(500),
        crop: Some(CropMode::Fill),
        quality: Some(80),
        format: Some(OutputFormat::Image(ImageFormat::Webp)),
        thumbnail: true,
        thumbnail_time: Some(5.0),
        resize: Some("500x500".to_string()),
        ..Default::default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    pub filename: String,
    pub path: String,
    pub size: usize,
    pub url: String,
}

#[derive(Clone)]
pub struct Uploader {
    storage: Arc<dyn ObjectStore>,
    jobs: Option<Arc<JobStore>>,
    events: Arc<JobEventBus>,
    max_bytes: u64,
    max_retries: i32,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

impl Uploader {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        jobs: Option<Arc<JobStore>>,
        events: Arc<JobEventBus>,
        max_bytes: u64,
        max_retries: i32,
    ) -> Self {
        Self {
            storage,
            jobs,
            events,
            max_bytes,
            max_retries,
        }
    }

    /// Validate and persist one file, returning its final (possibly
    /// suffixed) path. Video uploads additionally get a default thumbnail
    /// job; its failure never blocks the upload.
    pub async fn store_file(&self, filename: &str, bytes: &[u8]) -> Result<UploadedFile> {
        if bytes.len() as u64 > self.max_bytes {
            return Err(RefraxError::InvalidRequest(format!(
                "upload is {} bytes, ceiling is {}",
                bytes.len(),
                self.max_bytes
            )));
        }

        let sanitized = sanitize_relative_path(filename)?;
        let kind = validate_media_type(&sanitized, bytes)?;
        let path = self.unique_path(&sanitized).await?;

        let content_type = content_type_for(&path);
        self.storage
            .put(
                &format!("{PUBLIC_PREFIX}{path}"),
                bytes,
                &content_type,
                &HashMap::new(),
            )
            .await?;
        info!(path, size = bytes.len(), "original uploaded");

        if kind == MediaKind::Video {
            self.schedule_default_thumbnail(&path).await;
        }

        Ok(UploadedFile {
            filename: filename.to_string(),
            path: path.clone(),
            size: bytes.len(),
            url: format!("/t/{path}"),
        })
    }

    /// Probe for a free path, appending ` (1)`..` (100)` before the
    /// extension on collision. Attempt 101 errors out.
    async fn unique_path(&self, sanitized: &str) -> Result<String> {
        if !self.exists(sanitized).await? {
            return Ok(sanitized.to_string());
        }
        for attempt in 1..=MAX_SUFFIX_ATTEMPTS {
            let candidate = suffixed_path(sanitized, attempt);
            if !self.exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(RefraxError::InvalidRequest(format!(
            "no free path for {sanitized} after {MAX_SUFFIX_ATTEMPTS} attempts"
        )))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.storage.head(&format!("{PUBLIC_PREFIX}{path}")).await
    }

    async fn schedule_default_thumbnail(&self, path: &str) {
        let Some(jobs) = &self.jobs else {
            return;
        };
        let params = default_thumbnail_params();
        let fingerprint = Fingerprint::compute(path, &params);
        match jobs
            .create(
                path,
                &params.to_json_normalized(),
                &fingerprint.local_file_name(path),
                JobPriority::High,
                self.max_retries,
            )
            .await
        {
            Ok((job, true)) => {
                self.events
                    .publish(JobEvent::new(JobEventKind::Created, job.id, path));
            }
            Ok((_, false)) => {}
            Err(err) => {
                warn!(path, %err, "default thumbnail scheduling failed");
            }
        }
    }
}

/// Strip leading slashes, drop empty/`.`/`..` segments, collapse
/// separators. Rejects paths with no usable segments.
pub fn sanitize_relative_path(path: &str) -> Result<String> {
    let normalized = path.replace('\\', "/");
    let kept: Vec<&str> = normalized
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();
    if kept.is_empty() {
        return Err(RefraxError::InvalidRequest(format!(
            "unusable upload path: {path:?}"
        )));
    }
    Ok(kept.join("/"))
}

/// Extension allow-list plus a magic-byte cross-check when the content is
/// sniffable.
fn validate_media_type(path: &str, bytes: &[u8]) -> Result<MediaKind> {
    let ext = format::extension(path).ok_or_else(|| {
        RefraxError::InvalidRequest(format!("upload has no extension: {path}"))
    })?;
    let kind = MediaKind::from_path(path);
    if kind == MediaKind::Other {
        return Err(RefraxError::InvalidRequest(format!(
            "unsupported upload type: .{ext}"
        )));
    }

    if let Some(sniffed) = sniff_content_type(bytes) {
        let sniffed_kind = if sniffed.starts_with("image/") {
            MediaKind::Image
        } else {
            MediaKind::Video
        };
        if sniffed_kind != kind {
            return Err(RefraxError::InvalidRequest(format!(
                "content does not match extension .{ext}"
            )));
        }
    }

    Ok(kind)
}

fn content_type_for(path: &str) -> String {
    format::extension(path)
        .and_then(|ext| {
            ImageFormat::parse(&ext)
                .map(|f| f.mime())
                .or_else(|| VideoFormat::parse(&ext).map(|f| f.mime()))
        })
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn suffixed_path(path: &str, attempt: u32) -> String {
    match path.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({attempt}).{ext}"),
        _ => format!("{path} ({attempt})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalObjectStore;

    const PNG_MAGIC: &[u8] = &[
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0,
    ];

    fn uploader(storage: Arc<LocalObjectStore>, max_bytes: u64) -> Uploader {
        Uploader::new(
            storage,
            None,
            Arc::new(JobEventBus::default()),
            max_bytes,
            3,
        )
    }

    #[test]
    fn sanitization_strips_dangerous_segments() {
        assert_eq!(
            sanitize_relative_path("/photos//../cat.jpg").unwrap(),
            "photos/cat.jpg"
        );
        assert_eq!(
            sanitize_relative_path("\\windows\\style\\pic.png").unwrap(),
            "windows/style/pic.png"
        );
        assert!(sanitize_relative_path("/../..").is_err());
    }

    #[test]
    fn suffix_insertion_goes_before_the_extension() {
        assert_eq!(suffixed_path("cat.jpg", 1), "cat (1).jpg");
        assert_eq!(suffixed_path("a/b/cat.tar.gz", 2), "a/b/cat.tar (2).gz");
        assert_eq!(suffixed_path("noext", 3), "noext (3)");
    }

    #[test]
    fn type_validation() {
        assert!(validate_media_type("a.jpg", &[]).is_ok());
        assert!(validate_media_type("a.mp4", &[]).is_ok());
        assert!(validate_media_type("a.exe", &[]).is_err());
        assert!(validate_media_type("noext", &[]).is_err());
        // Declared image, sniffs as video.
        let mut mp4 = vec![0, 0, 0, 0x18];
        mp4.extend_from_slice(b"ftypisom");
        mp4.extend_from_slice(&[0; 8]);
        assert!(validate_media_type("fake.png", &mp4).is_err());
        assert!(validate_media_type("real.png", PNG_MAGIC).is_ok());
    }

    #[tokio::test]
    async fn size_ceiling_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalObjectStore::new(dir.path()));
        let up = uploader(storage, PNG_MAGIC.len() as u64);

        // Exactly at the ceiling succeeds.
        up.store_file("ok.png", PNG_MAGIC).await.unwrap();

        let up = uploader(
            Arc::new(LocalObjectStore::new(dir.path())),
            PNG_MAGIC.len() as u64 - 1,
        );
        assert!(matches!(
            up.store_file("big.png", PNG_MAGIC).await,
            Err(RefraxError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn collisions_get_numbered_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalObjectStore::new(dir.path()));
        let up = uploader(storage, 1024);

        let first = up.store_file("pic.png", PNG_MAGIC).await.unwrap();
        assert_eq!(first.path, "pic.png");
        let second = up.store_file("pic.png", PNG_MAGIC).await.unwrap();
        assert_eq!(second.path, "pic (1).png");
        let third = up.store_file("pic.png", PNG_MAGIC).await.unwrap();
        assert_eq!(third.path, "pic (2).png");
        assert_eq!(third.url, "/t/pic (2).png");
    }
}
