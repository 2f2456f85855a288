//! Configuration for the refrax media transformation service.
//!
//! Every setting has a documented default; the environment loader overlays
//! `REFRAX_*` variables on top. Nothing here touches the network or the
//! filesystem.

mod loader;
mod models;

pub use loader::{ConfigError, ENV_PREFIX};
pub use models::{
    AuthConfig, CacheConfig, Config, DatabaseConfig, ServerConfig, StorageConfig, StorageMode,
    UploadConfig, VideoConfig,
};
