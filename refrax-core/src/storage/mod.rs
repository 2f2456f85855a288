//! Typed object-store seam.
//!
//! The wire protocol is out of scope; everything above this module talks to
//! an [`ObjectStore`] trait object. Two implementations exist: the
//! S3-compatible remote and a filesystem-backed store for local deployments
//! and tests. The adapter never retries; retry policy belongs to callers.

mod local;
mod s3;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

/// Custom metadata tag recording which original a derived artifact belongs
/// to; invalidation reverse-looks-up through it.
pub const METADATA_ORIGINAL_PATH: &str = "x-original-path";

/// Derived artifacts are immutable by construction (content-addressed keys),
/// so puts carry a long-lived cache-control header.
pub const CACHE_CONTROL_LONG: &str = "public, max-age=31536000, immutable";

/// Batch ceiling for [`ObjectStore::delete_many`].
pub const DELETE_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Cheap existence probe.
    async fn head(&self, key: &str) -> Result<bool>;

    /// Fetch a whole object. `NotFound` when the key is absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Store an object with a content type and custom metadata tags.
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;

    /// Size, timestamps, and metadata without the body. `None` when absent.
    async fn head_meta(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// Every key under `prefix`, paginating transparently over any
    /// continuation token.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete in batches of [`DELETE_BATCH_SIZE`]; returns how many the
    /// store acknowledged.
    async fn delete_many(&self, keys: &[String]) -> Result<usize>;
}
