//! Environment overlay on top of the built-in defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::debug;

use crate::models::{Config, StorageMode};

/// All recognized variables start with this prefix.
pub const ENV_PREFIX: &str = "REFRAX_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

impl Config {
    /// Build a configuration from defaults plus `REFRAX_*` environment
    /// variables. Unknown variables are ignored; malformed values are
    /// rejected rather than silently defaulted.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = var("BIND_ADDR") {
            config.server.bind_addr = addr;
        }

        if let Some(mode) = var("STORAGE_MODE") {
            config.storage.mode = match mode.to_ascii_lowercase().as_str() {
                "s3" => StorageMode::S3,
                "local" => StorageMode::Local,
                _ => return Err(invalid("STORAGE_MODE", &mode)),
            };
        }
        config.storage.endpoint = var("STORAGE_ENDPOINT").or(config.storage.endpoint);
        if let Some(region) = var("STORAGE_REGION") {
            config.storage.region = region;
        }
        if let Some(bucket) = var("STORAGE_BUCKET") {
            config.storage.bucket = bucket;
        }
        config.storage.access_key = var("STORAGE_ACCESS_KEY").or(config.storage.access_key);
        config.storage.secret_key = var("STORAGE_SECRET_KEY").or(config.storage.secret_key);
        set_parsed(
            &mut config.storage.force_path_style,
            "STORAGE_FORCE_PATH_STYLE",
        )?;
        set_parsed(
            &mut config.storage.connect_timeout_secs,
            "STORAGE_CONNECT_TIMEOUT_SECS",
        )?;
        set_parsed(
            &mut config.storage.request_timeout_secs,
            "STORAGE_REQUEST_TIMEOUT_SECS",
        )?;
        set_parsed(
            &mut config.storage.socket_timeout_secs,
            "STORAGE_SOCKET_TIMEOUT_SECS",
        )?;
        if let Some(root) = var("STORAGE_LOCAL_ROOT") {
            config.storage.local_root = PathBuf::from(root);
        }

        config.database.url = var("DATABASE_URL").or(config.database.url);
        set_parsed(&mut config.database.max_connections, "DATABASE_MAX_CONNECTIONS")?;

        if let Some(dir) = var("CACHE_DIR") {
            config.cache.cache_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("PUBLIC_DIR") {
            config.cache.public_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("TEMP_DIR") {
            config.cache.temp_dir = PathBuf::from(dir);
        }
        set_parsed(&mut config.cache.local_max_bytes, "LOCAL_CACHE_MAX_BYTES")?;

        if let Some(value) = var("VIDEO_CONCURRENCY") {
            let parsed = value
                .parse::<usize>()
                .map_err(|_| invalid("VIDEO_CONCURRENCY", &value))?;
            config.video.concurrency = Some(parsed);
        }
        set_parsed(&mut config.video.max_retries, "VIDEO_MAX_RETRIES")?;
        set_parsed(&mut config.video.poll_interval_ms, "POLL_INTERVAL_MS")?;
        set_parsed(
            &mut config.video.cleanup_retention_hours,
            "CLEANUP_RETENTION_HOURS",
        )?;
        set_parsed(&mut config.video.source_max_bytes, "VIDEO_SOURCE_MAX_BYTES")?;
        set_parsed(&mut config.video.timeout_secs, "VIDEO_TIMEOUT_SECS")?;
        if let Some(path) = var("FFMPEG_PATH") {
            config.video.ffmpeg_path = path;
        }
        if let Some(path) = var("FFPROBE_PATH") {
            config.video.ffprobe_path = path;
        }

        set_parsed(&mut config.upload.max_bytes, "UPLOAD_MAX_BYTES")?;

        if let Some(keys) = var("API_KEYS") {
            config.auth.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        config.auth.signature_secret = var("SIGNATURE_SECRET").or(config.auth.signature_secret);

        debug!(
            storage = ?config.storage.mode,
            database = config.database.url.is_some(),
            "configuration loaded from environment"
        );
        Ok(config)
    }
}

fn var(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .filter(|v| !v.is_empty())
}

fn invalid(suffix: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: format!("{ENV_PREFIX}{suffix}"),
        value: value.to_string(),
    }
}

fn set_parsed<T: FromStr>(slot: &mut T, suffix: &str) -> Result<(), ConfigError> {
    if let Some(value) = var(suffix) {
        *slot = value.parse().map_err(|_| invalid(suffix, &value))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them in one test so they
    // cannot race each other under the parallel test runner.
    #[test]
    fn defaults_overlay_and_validation() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.video.max_retries, 3);
        assert_eq!(config.upload.max_bytes, 50 * 1024 * 1024);

        unsafe {
            env::set_var("REFRAX_VIDEO_MAX_RETRIES", "7");
            env::set_var("REFRAX_API_KEYS", "alpha, beta,,gamma");
            env::set_var("REFRAX_STORAGE_MODE", "s3");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.video.max_retries, 7);
        assert_eq!(config.auth.api_keys, vec!["alpha", "beta", "gamma"]);
        assert_eq!(config.storage.mode, StorageMode::S3);

        unsafe {
            env::set_var("REFRAX_VIDEO_MAX_RETRIES", "not-a-number");
        }
        assert!(Config::from_env().is_err());

        unsafe {
            env::remove_var("REFRAX_VIDEO_MAX_RETRIES");
            env::remove_var("REFRAX_API_KEYS");
            env::remove_var("REFRAX_STORAGE_MODE");
        }
    }
}
