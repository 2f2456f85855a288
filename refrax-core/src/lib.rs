//! Core engine for the refrax media transformation service.
//!
//! Layers, bottom up: the [`storage`] seam over S3-compatible or local
//! object stores, the in-process [`cache`] tiers, the [`image`] optimizer
//! and [`video`] transcoder, the durable [`jobs`] queue with its worker
//! pool and event fan-out, and the [`pipeline`] orchestrating a request
//! from URL to bytes. [`upload`], [`invalidate`], and [`signature`] cover
//! ingestion, cache teardown, and signed URLs.

pub mod cache;
pub mod error;
pub mod image;
pub mod invalidate;
pub mod jobs;
pub mod pipeline;
pub mod signature;
pub mod storage;
pub mod upload;
pub mod video;

pub use error::{RefraxError, Result};
