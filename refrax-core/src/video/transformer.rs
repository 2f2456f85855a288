//! Single-shot ffmpeg invocation with computed arguments.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use refrax_config::VideoConfig;
use refrax_model::{CropMode, OutputFormat, TransformParams};

use crate::error::{RefraxError, Result};

use super::probe::{VideoProbe, probe_source};

/// Percent callback invoked as encode progress is parsed off stderr.
pub type TranscodeProgress = Box<dyn Fn(i16) + Send + Sync>;

/// Quality defaults to 60 when the request does not specify one, mapping to
/// CRF 31.
const DEFAULT_VIDEO_QUALITY: u8 = 60;
/// Auto-downscale bounds when the request asks for no explicit size.
const AUTO_MAX_WIDTH: u32 = 1280;
const AUTO_MAX_HEIGHT: u32 = 720;
/// How many trailing stderr lines are kept for diagnostics.
const STDERR_TAIL: usize = 40;

#[derive(Debug)]
pub struct VideoTransformer {
    config: VideoConfig,
}

impl VideoTransformer {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    /// Probe the source, reject oversize inputs, then run ffmpeg once with
    /// the computed arguments. The child is killed at the hard deadline.
    pub async fn transform(
        &self,
        source: &Path,
        output: &Path,
        params: &TransformParams,
        progress: Option<TranscodeProgress>,
    ) -> Result<()> {
        let source_size = tokio::fs::metadata(source).await?.len();
        if source_size > self.config.source_max_bytes {
            return Err(RefraxError::InvalidRequest(format!(
                "video source is {source_size} bytes, ceiling is {}",
                self.config.source_max_bytes
            )));
        }

        let probe = probe_source(&self.config.ffprobe_path, source).await?;
        debug!(
            width = probe.width,
            height = probe.height,
            duration = probe.duration_secs,
            codec = %probe.codec,
            bit_rate = probe.bit_rate,
            "video source probed"
        );

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = build_ffmpeg_args(source, output, params, &probe);
        info!(ffmpeg = %self.config.ffmpeg_path, ?args, "starting transcode");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| RefraxError::Internal(format!("failed to spawn ffmpeg: {err}")))?;

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL)));
        let monitor = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&tail);
            let total = effective_duration(params, &probe);
            tokio::spawn(async move {
                monitor_stderr(stderr, tail, total, progress).await;
            })
        });

        let deadline = Duration::from_secs(self.config.timeout_secs);
        let status = match timeout(deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(timeout_secs = self.config.timeout_secs, "transcode deadline hit, killing ffmpeg");
                let _ = child.kill().await;
                if let Some(handle) = monitor {
                    handle.abort();
                }
                return Err(RefraxError::Timeout(format!(
                    "transcode exceeded {} seconds",
                    self.config.timeout_secs
                )));
            }
        };

        if let Some(handle) = monitor {
            let _ = handle.await;
        }

        if !status.success() {
            let tail = tail.lock().expect("stderr tail mutex poisoned");
            let diagnostics = tail.iter().cloned().collect::<Vec<_>>().join("\n");
            return Err(RefraxError::Encoding(format!(
                "ffmpeg exited with {}: {}",
                status.code().unwrap_or(-1),
                diagnostics
            )));
        }

        Ok(())
    }
}

/// Linear quality-to-CRF mapping: 0 -> 51, 100 -> 18. Out-of-range values
/// fall back to the default quality.
pub fn crf_for_quality(quality: Option<u8>) -> i32 {
    let q = quality
        .filter(|q| *q <= 100)
        .unwrap_or(DEFAULT_VIDEO_QUALITY);
    (51.0 - f64::from(q) * 33.0 / 100.0).round() as i32
}

/// Ordered argument composition per the transformation request.
pub fn build_ffmpeg_args(
    source: &Path,
    output: &Path,
    params: &TransformParams,
    _probe: &VideoProbe,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];

    if params.thumbnail {
        let seek = params
            .thumbnail_time
            .unwrap_or(0.0)
            .max(params.start_offset.unwrap_or(0.0))
            .max(0.0);
        args.push("-ss".into());
        args.push(format!("{seek}"));
    } else if let Some(start) = params.start_offset {
        args.push("-ss".into());
        args.push(format!("{start}"));
    }

    args.push("-i".into());
    args.push(source.to_string_lossy().into_owned());

    if params.thumbnail {
        args.push("-frames:v".into());
        args.push("1".into());
    } else if let Some(end) = params.end_offset {
        let duration = match params.start_offset {
            Some(start) => (end - start).max(0.0),
            None => end,
        };
        args.push("-t".into());
        args.push(format!("{duration}"));
    }

    if let Some(filter) = scale_filter(params) {
        args.push("-vf".into());
        args.push(filter);
    }

    if params.thumbnail {
        // Image output; the muxer is chosen from the output extension.
        let quality = params.quality.filter(|q| *q <= 100).unwrap_or(80);
        args.push("-q:v".into());
        args.push(image_qscale(params, quality).to_string());
    } else {
        args.push("-c:v".into());
        args.push("libx264".into());
        args.push("-preset".into());
        args.push("ultrafast".into());
        args.push("-tune".into());
        args.push("fastdecode".into());
        args.push("-profile:v".into());
        args.push("baseline".into());
        args.push("-level".into());
        args.push("3.0".into());
        args.push("-crf".into());
        args.push(crf_for_quality(params.quality).to_string());
        args.push("-c:a".into());
        args.push("copy".into());
        args.push("-threads".into());
        args.push("4".into());
        args.push("-movflags".into());
        args.push("+faststart".into());
        args.push("-max_muxing_queue_size".into());
        args.push("1024".into());
    }

    args.push(output.to_string_lossy().into_owned());
    args
}

fn scale_filter(params: &TransformParams) -> Option<String> {
    let explicit = params.width.is_some() || params.height.is_some() || params.resize.is_some();

    if !explicit {
        if params.thumbnail {
            return None;
        }
        // Cap at 1280x720 preserving aspect, even dimensions for the codec.
        return Some(format!(
            "scale='min({AUTO_MAX_WIDTH},iw)':'min({AUTO_MAX_HEIGHT},ih)':\
             force_original_aspect_ratio=decrease:force_divisible_by=2"
        ));
    }

    match (params.width, params.height) {
        (Some(w), Some(h)) => match params.crop {
            Some(CropMode::Fill) | Some(CropMode::Crop) => Some(format!(
                "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}"
            )),
            // Exact size; may stretch.
            _ => Some(format!("scale={w}:{h}")),
        },
        (Some(w), None) => Some(format!("scale={w}:-2")),
        (None, Some(h)) => Some(format!("scale=-2:{h}")),
        (None, None) => None,
    }
}

/// `-q:v` scale depends on the image encoder: libwebp takes 0-100 directly,
/// mjpeg wants the inverse 2-31 range.
fn image_qscale(params: &TransformParams, quality: u8) -> u32 {
    match params.format {
        Some(OutputFormat::Image(refrax_model::ImageFormat::Webp)) => u32::from(quality),
        _ => {
            let q = f64::from(quality);
            (31.0 - q * 29.0 / 100.0).round().max(2.0) as u32
        }
    }
}

fn effective_duration(params: &TransformParams, probe: &VideoProbe) -> Option<f64> {
    if params.thumbnail {
        return None;
    }
    let total = match (params.start_offset, params.end_offset) {
        (Some(start), Some(end)) => (end - start).max(0.0),
        (None, Some(end)) => end,
        (Some(start), None) => (probe.duration_secs - start).max(0.0),
        (None, None) => probe.duration_secs,
    };
    (total > 0.0).then_some(total)
}

async fn monitor_stderr(
    stderr: tokio::process::ChildStderr,
    tail: Arc<Mutex<VecDeque<String>>>,
    total_duration: Option<f64>,
    progress: Option<TranscodeProgress>,
) {
    let reader = BufReader::new(stderr);
    let mut lines = reader.lines();
    let mut last_percent: i16 = -1;

    while let Ok(Some(line)) = lines.next_line().await {
        {
            let mut tail = tail.lock().expect("stderr tail mutex poisoned");
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line.clone());
        }

        let (Some(callback), Some(total)) = (progress.as_ref(), total_duration) else {
            continue;
        };
        if let Some(seconds) = parse_progress_time(&line) {
            let percent = ((seconds / total) * 100.0).clamp(0.0, 99.0) as i16;
            if percent > last_percent {
                last_percent = percent;
                callback(percent);
            }
        }
    }
}

/// Pull the `time=` token out of an ffmpeg progress line.
fn parse_progress_time(line: &str) -> Option<f64> {
    let start = line.find("time=")? + "time=".len();
    let rest = &line[start..];
    let token = rest.split_whitespace().next()?;
    parse_time_to_seconds(token)
}

/// `00:00:41.36` style timestamps to seconds.
fn parse_time_to_seconds(time: &str) -> Option<f64> {
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use refrax_model::ImageFormat;
    use std::path::PathBuf;

    fn probe_1080p() -> VideoProbe {
        VideoProbe {
            width: 1920,
            height: 1080,
            duration_secs: 60.0,
            codec: "h264".into(),
            bit_rate: 5_000_000,
        }
    }

    fn args_for(params: &TransformParams) -> Vec<String> {
        build_ffmpeg_args(
            &PathBuf::from("/tmp/in.mp4"),
            &PathBuf::from("/tmp/out.mp4"),
            params,
            &probe_1080p(),
        )
    }

    fn joined(params: &TransformParams) -> String {
        args_for(params).join(" ")
    }

    #[test]
    fn quality_maps_linearly_to_crf() {
        assert_eq!(crf_for_quality(Some(0)), 51);
        assert_eq!(crf_for_quality(Some(100)), 18);
        assert_eq!(crf_for_quality(Some(60)), 31);
        assert_eq!(crf_for_quality(None), 31);
        // Out of range falls back to the default.
        assert_eq!(crf_for_quality(Some(150)), 31);
    }

    #[test]
    fn thumbnail_seeks_to_max_of_offsets() {
        let params = TransformParams {
            thumbnail: true,
            thumbnail_time: Some(3.0),
            start_offset: Some(5.0),
            format: Some(OutputFormat::Image(ImageFormat::Webp)),
            ..Default::default()
        };
        let args = args_for(&params);
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "5");
        assert!(args.contains(&"-frames:v".to_string()));
        assert!(!joined(&params).contains("libx264"));
    }

    #[test]
    fn trim_window_sets_duration() {
        let params = TransformParams {
            start_offset: Some(2.0),
            end_offset: Some(10.0),
            ..Default::default()
        };
        let joined = joined(&params);
        assert!(joined.contains("-ss 2"));
        assert!(joined.contains("-t 8"));

        let only_end = TransformParams {
            end_offset: Some(10.0),
            ..Default::default()
        };
        assert!(self::joined(&only_end).contains("-t 10"));
    }

    #[test]
    fn auto_downscale_only_without_explicit_size() {
        let auto = joined(&TransformParams::default());
        assert!(auto.contains("min(1280,iw)"));
        assert!(auto.contains("force_divisible_by=2"));

        let explicit = joined(&TransformParams {
            width: Some(640),
            height: Some(480),
            ..Default::default()
        });
        assert!(!explicit.contains("min(1280,iw)"));
        assert!(explicit.contains("scale=640:480"));
    }

    #[test]
    fn fill_crop_covers_then_crops() {
        let params = TransformParams {
            width: Some(1280),
            height: Some(720),
            crop: Some(CropMode::Fill),
            ..Default::default()
        };
        let joined = joined(&params);
        assert!(joined.contains("force_original_aspect_ratio=increase,crop=1280:720"));
    }

    #[test]
    fn encoder_settings_present_for_transcodes() {
        let joined = joined(&TransformParams::default());
        for expected in [
            "libx264",
            "ultrafast",
            "fastdecode",
            "baseline",
            "-crf 31",
            "-c:a copy",
            "-threads 4",
            "+faststart",
            "-max_muxing_queue_size 1024",
        ] {
            assert!(joined.contains(expected), "missing {expected} in {joined}");
        }
    }

    #[test]
    fn progress_time_parsing() {
        let line = "frame= 1234 fps= 30.0 q=28.0 size=   12345KiB time=00:00:41.36 bitrate= 244.8kbits/s speed=1.23x";
        assert_eq!(parse_progress_time(line), Some(41.36));
        assert_eq!(parse_time_to_seconds("01:02:03.5"), Some(3723.5));
        assert_eq!(parse_time_to_seconds("N/A"), None);
    }

    #[test]
    fn effective_duration_windows() {
        let probe = probe_1080p();
        assert_eq!(
            effective_duration(&TransformParams::default(), &probe),
            Some(60.0)
        );
        let trimmed = TransformParams {
            start_offset: Some(10.0),
            end_offset: Some(25.0),
            ..Default::default()
        };
        assert_eq!(effective_duration(&trimmed, &probe), Some(15.0));
        let thumb = TransformParams {
            thumbnail: true,
            ..Default::default()
        };
        assert_eq!(effective_duration(&thumb, &probe), None);
    }
}
