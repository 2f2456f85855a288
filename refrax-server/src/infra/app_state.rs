use std::fmt;
use std::sync::Arc;

use sqlx::PgPool;

use refrax_config::Config;
use refrax_core::cache::{DiskCache, ExistenceCache};
use refrax_core::invalidate::AssetDeleter;
use refrax_core::jobs::{JobEventBus, JobStore};
use refrax_core::pipeline::TransformPipeline;
use refrax_core::storage::ObjectStore;
use refrax_core::upload::Uploader;

/// Lifecycle-owned singletons, built once at boot and shared by reference
/// through every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<dyn ObjectStore>,
    pub existence: Arc<ExistenceCache>,
    pub disk: Arc<DiskCache>,
    pub pipeline: Arc<TransformPipeline>,
    pub uploader: Arc<Uploader>,
    pub deleter: Arc<AssetDeleter>,
    pub events: Arc<JobEventBus>,
    pub jobs: Option<Arc<JobStore>>,
    pub db: Option<PgPool>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Job store, or the 500-grade error the video endpoints surface when
    /// the database is down.
    pub fn require_jobs(&self) -> Result<&Arc<JobStore>, refrax_core::RefraxError> {
        self.jobs.as_ref().ok_or_else(|| {
            refrax_core::RefraxError::Internal("video job queue unavailable".to_string())
        })
    }
}
