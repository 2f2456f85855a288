//! Deterministic image transformation and adaptive format selection.

mod capability;
mod optimizer;

pub use capability::ClientCapabilities;
pub use optimizer::{
    DEFAULT_QUALITY, OptimizationMetrics, OptimizedImage, optimize, select_format,
};
