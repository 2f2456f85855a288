//! Postgres repository for the `video_jobs` table.
//!
//! Uses the runtime query API throughout so the crate builds without a live
//! database. Every state transition is a single statement or transaction;
//! `claim_next` relies on `FOR UPDATE SKIP LOCKED` for at-most-once claims
//! across workers.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use refrax_model::{JobPriority, JobStatus, QueueStats, VideoJob};

use crate::error::{RefraxError, Result};

/// Embedded schema migrations, applied at startup.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const JOB_COLUMNS: &str = "id, file_path, params_json, cache_path, status, priority, \
     progress, error_text, retry_count, max_retries, created_at, started_at, completed_at";

#[derive(Debug)]
struct JobRow {
    id: Uuid,
    file_path: String,
    params_json: String,
    cache_path: String,
    status: String,
    priority: i16,
    progress: i16,
    error_text: Option<String>,
    retry_count: i32,
    max_retries: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl FromRow<'_, PgRow> for JobRow {
    fn from_row(row: &PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            file_path: row.try_get("file_path")?,
            params_json: row.try_get("params_json")?,
            cache_path: row.try_get("cache_path")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            progress: row.try_get("progress")?,
            error_text: row.try_get("error_text")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl JobRow {
    fn into_job(self) -> Result<VideoJob> {
        let status = JobStatus::parse(&self.status).ok_or_else(|| {
            RefraxError::Internal(format!("unknown job status in database: {}", self.status))
        })?;
        Ok(VideoJob {
            id: self.id,
            file_path: self.file_path,
            params_json: self.params_json,
            cache_path: self.cache_path,
            status,
            priority: JobPriority::from_i16(self.priority),
            progress: self.progress,
            error_text: self.error_text,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueue a job, or return the existing active one for the same
    /// `(file_path, normalized params)` key. The probe and insert share a
    /// transaction so concurrent enqueues cannot race a duplicate in.
    /// Returns `(job, created)`.
    pub async fn create(
        &self,
        file_path: &str,
        params_json: &str,
        cache_path: &str,
        priority: JobPriority,
        max_retries: i32,
    ) -> Result<(VideoJob, bool)> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM video_jobs \
             WHERE file_path = $1 AND params_json = $2 \
               AND status IN ('pending', 'processing') \
             LIMIT 1 FOR UPDATE"
        ))
        .bind(file_path)
        .bind(params_json)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            tx.commit().await?;
            debug!(job_id = %row.id, file_path, "reusing active job");
            return Ok((row.into_job()?, false));
        }

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "INSERT INTO video_jobs \
               (id, file_path, params_json, cache_path, status, priority, \
                progress, retry_count, max_retries, created_at) \
             VALUES ($1, $2, $3, $4, 'pending', $5, 0, 0, $6, now()) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(file_path)
        .bind(params_json)
        .bind(cache_path)
        .bind(priority.as_i16())
        .bind(max_retries)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(job_id = %row.id, file_path, "job enqueued");
        Ok((row.into_job()?, true))
    }

    /// Atomically claim the top pending job: `(priority ASC, created_at
    /// ASC)` order, marked `processing` with `started_at = now()`. This is
    /// the queue's only legal consumption path.
    pub async fn claim_next(&self) -> Result<Option<VideoJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "WITH next AS ( \
                 SELECT id FROM video_jobs \
                 WHERE status = 'pending' \
                 ORDER BY priority ASC, created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE video_jobs SET status = 'processing', started_at = now() \
             FROM next WHERE video_jobs.id = next.id \
             RETURNING {JOB_COLUMNS}"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_job).transpose()
    }

    /// Update status (and optionally progress/error). Terminal states also
    /// stamp `completed_at`.
    pub async fn update(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: Option<i16>,
        error: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE video_jobs SET \
                 status = $2, \
                 progress = COALESCE($3, progress), \
                 error_text = COALESCE($4, error_text), \
                 completed_at = CASE \
                     WHEN $2 IN ('completed', 'error', 'cancelled') THEN now() \
                     ELSE completed_at END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(progress)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<VideoJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM video_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// Most recent job for a `(file_path, params)` key, any status.
    pub async fn get_by_key(
        &self,
        file_path: &str,
        params_json: &str,
    ) -> Result<Option<VideoJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM video_jobs \
             WHERE file_path = $1 AND params_json = $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(file_path)
        .bind(params_json)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// Most recent job for a file path regardless of params; backs the
    /// public video-status endpoint.
    pub async fn latest_by_file_path(&self, file_path: &str) -> Result<Option<VideoJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM video_jobs \
             WHERE file_path = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_job).transpose()
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<VideoJob>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM video_jobs ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT \
                 COUNT(*) AS total, \
                 COUNT(*) FILTER (WHERE status = 'pending') AS pending, \
                 COUNT(*) FILTER (WHERE status = 'processing') AS processing, \
                 COUNT(*) FILTER (WHERE status = 'completed') AS completed, \
                 COUNT(*) FILTER (WHERE status = 'error') AS error, \
                 COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled \
             FROM video_jobs",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            total: row.try_get("total")?,
            pending: row.try_get("pending")?,
            processing: row.try_get("processing")?,
            completed: row.try_get("completed")?,
            error: row.try_get("error")?,
            cancelled: row.try_get("cancelled")?,
        })
    }

    pub async fn count_processing(&self) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM video_jobs WHERE status = 'processing'")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.try_get("n")?)
    }

    /// Errored jobs with retry budget go back to pending. Returns false for
    /// anything else (including non-errored jobs, where retry is a no-op).
    pub async fn retry(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE video_jobs SET \
                 status = 'pending', retry_count = retry_count + 1, \
                 progress = 0, error_text = NULL, \
                 started_at = NULL, completed_at = NULL \
             WHERE id = $1 AND status = 'error' AND retry_count < max_retries",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Pending jobs may be cancelled; anything else is refused.
    pub async fn cancel(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE video_jobs SET status = 'cancelled', completed_at = now() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Self-healing for completed jobs whose cached artifact vanished: back
    /// to pending so a worker rebuilds it.
    pub async fn reset_to_pending(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE video_jobs SET \
                 status = 'pending', progress = 0, error_text = NULL, \
                 started_at = NULL, completed_at = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM video_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_by_file_path(&self, file_path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM video_jobs WHERE file_path = $1")
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Rewrite every `processing` row back to `pending`. Run once at worker
    /// startup; live processing rows can only belong to a crashed process.
    pub async fn reset_orphans(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE video_jobs SET status = 'pending', started_at = NULL, progress = 0 \
             WHERE status = 'processing'",
        )
        .execute(&self.pool)
        .await?;
        let orphans = result.rows_affected();
        if orphans > 0 {
            info!(orphans, "reset orphaned processing jobs to pending");
        }
        Ok(orphans)
    }

    /// Purge terminal jobs older than the retention window.
    pub async fn cleanup(&self, older_than_hours: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM video_jobs \
             WHERE status IN ('completed', 'error', 'cancelled') \
               AND created_at < now() - make_interval(hours => $1)",
        )
        .bind(older_than_hours as i32)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
