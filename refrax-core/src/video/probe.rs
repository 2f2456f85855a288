//! Source inspection through `ffprobe`.

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;
use tracing::warn;

use crate::error::{RefraxError, Result};

/// Resolutions at or beyond this width get a warning; they are legal but
/// expensive to transcode.
const WIDE_SOURCE_WARN_PX: u32 = 3000;

#[derive(Debug, Clone, Default)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub codec: String,
    pub bit_rate: u64,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Run `ffprobe` against a local file and extract the fields the
/// transformer cares about.
pub async fn probe_source(ffprobe_path: &str, source: &Path) -> Result<VideoProbe> {
    let output = Command::new(ffprobe_path)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(source)
        .output()
        .await
        .map_err(|err| RefraxError::Internal(format!("failed to spawn ffprobe: {err}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RefraxError::Encoding(format!(
            "ffprobe exited with {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.lines().take(3).collect::<Vec<_>>().join("; ")
        )));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let probe = VideoProbe {
        width: video_stream.and_then(|s| s.width).unwrap_or(0),
        height: video_stream.and_then(|s| s.height).unwrap_or(0),
        duration_secs: parsed
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0),
        codec: video_stream
            .and_then(|s| s.codec_name.clone())
            .unwrap_or_default(),
        bit_rate: parsed
            .format
            .as_ref()
            .and_then(|f| f.bit_rate.as_deref())
            .and_then(|b| b.parse().ok())
            .unwrap_or(0),
    };

    if probe.width >= WIDE_SOURCE_WARN_PX {
        warn!(
            width = probe.width,
            height = probe.height,
            source = %source.display(),
            "very wide video source, transcode will be expensive"
        );
    }

    Ok(probe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_json_shape() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080}
            ],
            "format": {"duration": "12.500000", "bit_rate": "5823000"}
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        let video = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .unwrap();
        assert_eq!(video.width, Some(1920));
        assert_eq!(video.codec_name.as_deref(), Some("h264"));
        let format = parsed.format.unwrap();
        assert_eq!(format.duration.as_deref(), Some("12.500000"));
    }
}
