//! Durable video job model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job lifecycle state. `Pending` and `Processing` are the active states;
/// the rest are terminal (an errored job may be reset to pending by retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// Claim order is ascending: lower numbers are claimed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High = 1,
    Normal = 2,
    Low = 3,
}

impl JobPriority {
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }

    pub fn from_i16(value: i16) -> Self {
        match value {
            v if v <= 1 => Self::High,
            2 => Self::Normal,
            _ => Self::Low,
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// One row of the `video_jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoJob {
    pub id: Uuid,
    pub file_path: String,
    /// Normalized parameter JSON; together with `file_path` this is the
    /// logical uniqueness key for active jobs.
    pub params_json: String,
    /// Local cache path the completed artifact is expected at.
    pub cache_path: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    /// 0–100.
    pub progress: i16,
    pub error_text: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl VideoJob {
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Error && self.retry_count < self.max_retries
    }
}

/// Counts by status for queue introspection.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub error: i64,
    pub cancelled: i64,
}

/// Job state transition event, fanned out to SSE subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEventKind {
    #[serde(rename = "job:created")]
    Created,
    #[serde(rename = "job:started")]
    Started,
    #[serde(rename = "job:progress")]
    Progress,
    #[serde(rename = "job:completed")]
    Completed,
    #[serde(rename = "job:error")]
    Error,
}

impl JobEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "job:created",
            Self::Started => "job:started",
            Self::Progress => "job:progress",
            Self::Completed => "job:completed",
            Self::Error => "job:error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job_id: Uuid,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, job_id: Uuid, file_path: impl Into<String>) -> Self {
        Self {
            kind,
            job_id,
            file_path: file_path.into(),
            progress: None,
            error: None,
        }
    }

    pub fn with_progress(mut self, progress: i16) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
