//! Video probing and single-shot transcoding via the external ffmpeg tools.

mod probe;
mod transformer;

pub use probe::{VideoProbe, probe_source};
pub use transformer::{TranscodeProgress, VideoTransformer};
