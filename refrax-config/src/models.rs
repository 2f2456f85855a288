use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub video: VideoConfig,
    pub upload: UploadConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP listener binds to.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Which object-store backend serves originals and the remote cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// S3-compatible remote (AWS, MinIO, R2, ...).
    S3,
    /// Filesystem-backed store, for development and single-node setups.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: StorageMode,
    /// Custom endpoint for S3-compatible services; unset means AWS proper.
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Path-style addressing, required by most non-AWS endpoints.
    pub force_path_style: bool,
    pub connect_timeout_secs: u64,
    /// Whole-request deadline.
    pub request_timeout_secs: u64,
    /// Per-read socket deadline.
    pub socket_timeout_secs: u64,
    /// Root directory of the `local` storage mode.
    pub local_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Local,
            endpoint: None,
            region: "us-east-1".to_string(),
            bucket: "refrax".to_string(),
            access_key: None,
            secret_key: None,
            force_path_style: true,
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            socket_timeout_secs: 10,
            local_root: PathBuf::from("./storage"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection string. Unset disables the video job queue.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Derived-artifact disk cache.
    pub cache_dir: PathBuf,
    /// Local originals, mirroring the remote `public/` prefix.
    pub public_dir: PathBuf,
    /// Transient source copies.
    pub temp_dir: PathBuf,
    /// Ceiling for the smart-cache policy; cleanup starts at 80 %.
    pub local_max_bytes: u64,
    pub existence_capacity: usize,
    pub existence_positive_ttl_secs: u64,
    pub existence_negative_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
            public_dir: PathBuf::from("./public"),
            temp_dir: PathBuf::from("./temp"),
            local_max_bytes: 1024 * 1024 * 1024,
            existence_capacity: 10_000,
            existence_positive_ttl_secs: 60,
            existence_negative_ttl_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Worker concurrency; unset auto-detects from system memory.
    pub concurrency: Option<usize>,
    pub max_retries: i32,
    pub poll_interval_ms: u64,
    /// Terminal jobs older than this are purged.
    pub cleanup_retention_hours: i64,
    /// Pre-flight source size ceiling.
    pub source_max_bytes: u64,
    /// Hard transcode deadline before the child is killed.
    pub timeout_secs: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            max_retries: 3,
            poll_interval_ms: 1000,
            cleanup_retention_hours: 24,
            source_max_bytes: 200 * 1024 * 1024,
            timeout_secs: 300,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted API keys; empty disables key-protected endpoints.
    pub api_keys: Vec<String>,
    /// HMAC secret for signed transformation URLs; unset disables them.
    pub signature_secret: Option<String>,
}
