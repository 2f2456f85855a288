//! Shared data models for the refrax media transformation service.
//!
//! Everything that crosses a crate boundary lives here: the typed
//! transformation parameter record, media format enums, fingerprint/key
//! derivation, and the durable video job row.

pub mod fingerprint;
pub mod format;
pub mod job;
pub mod params;

pub use fingerprint::Fingerprint;
pub use format::{ImageFormat, MediaKind, OutputFormat, VideoFormat};
pub use job::{JobEvent, JobEventKind, JobPriority, JobStatus, QueueStats, VideoJob};
pub use params::{AspectRatio, Background, CropMode, Gravity, Rotation, TransformParams};
