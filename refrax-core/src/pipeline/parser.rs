//! The `/t/` transformation URL grammar.
//!
//! `path := "/t/" [ directives "/" ] filepath`, where `directives` is a
//! comma-separated list of `key_value` pairs. The segment right after the
//! marker is treated as directives iff it contains no `.` and contains a
//! `,` or `_`; anything else is part of the file path. Unknown directive
//! keys are ignored.

use tracing::debug;

use refrax_model::{
    AspectRatio, Background, CropMode, Gravity, OutputFormat, Rotation, TransformParams,
};

use crate::error::{RefraxError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    pub file_path: String,
    pub params: TransformParams,
    /// Whether the URL actually carried a directive segment.
    pub had_directives: bool,
}

/// Parse everything after (and including) the `/t/` marker. Also accepts
/// the bare remainder with the marker already stripped.
pub fn parse_transform_path(path: &str) -> Result<ParsedRequest> {
    let rest = match path.find("/t/") {
        Some(idx) => &path[idx + 3..],
        None => path.trim_start_matches('/'),
    };

    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let first = segments
        .next()
        .ok_or_else(|| RefraxError::InvalidRequest("empty transform path".to_string()))?;

    let (params, had_directives, file_segments): (TransformParams, bool, Vec<&str>) =
        if is_directive_segment(first) {
            (parse_directives(first), true, segments.collect())
        } else {
            let mut all = vec![first];
            all.extend(segments);
            (TransformParams::default(), false, all)
        };

    if file_segments.is_empty() {
        return Err(RefraxError::InvalidRequest(
            "transform path has no file".to_string(),
        ));
    }
    if file_segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(RefraxError::InvalidRequest(
            "path traversal rejected".to_string(),
        ));
    }

    Ok(ParsedRequest {
        file_path: file_segments.join("/"),
        params,
        had_directives,
    })
}

/// The segment after the marker is directives iff it has no `.` and
/// contains `,` or `_`.
pub fn is_directive_segment(segment: &str) -> bool {
    !segment.contains('.') && (segment.contains(',') || segment.contains('_'))
}

fn parse_directives(segment: &str) -> TransformParams {
    let mut params = TransformParams::default();

    for directive in segment.split(',').filter(|d| !d.is_empty()) {
        let Some((key, value)) = directive.split_once('_') else {
            debug!(directive, "directive without value ignored");
            continue;
        };
        match key {
            "w" => params.width = parse_extent(value),
            "h" => params.height = parse_extent(value),
            "c" => params.crop = CropMode::parse(value),
            "g" => params.gravity = Gravity::parse(value),
            "q" => {
                params.quality = value
                    .parse::<u8>()
                    .ok()
                    .filter(|q| *q <= 100);
            }
            "f" => params.format = OutputFormat::parse(value),
            "a" => params.rotate = Rotation::parse(value),
            "ar" => params.aspect = AspectRatio::parse(value),
            "b" | "bg" => params.background = Background::parse(value),
            "so" => params.start_offset = parse_offset(value),
            "eo" => params.end_offset = parse_offset(value),
            "t" => params.thumbnail = matches!(value, "1" | "true"),
            "tt" => params.thumbnail_time = parse_offset(value),
            other => {
                debug!(key = other, value, "unknown directive ignored");
            }
        }
    }

    params.sync_resize();
    params
}

fn parse_extent(value: &str) -> Option<u32> {
    value.parse::<u32>().ok().filter(|v| *v > 0)
}

fn parse_offset(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| *v >= 0.0 && v.is_finite())
}

/// Serialize a record back into the URL directive form. This is the
/// inverse of [`parse_transform_path`]'s directive handling: parsing the
/// output yields the canonicalized record.
pub fn to_directives(params: &TransformParams) -> String {
    let mut parts = Vec::new();
    if let Some(w) = params.width {
        parts.push(format!("w_{w}"));
    }
    if let Some(h) = params.height {
        parts.push(format!("h_{h}"));
    }
    if let Some(crop) = params.crop {
        parts.push(format!("c_{}", crop.as_str()));
    }
    if let Some(gravity) = params.gravity {
        parts.push(format!("g_{}", gravity.as_str()));
    }
    if let Some(aspect) = params.aspect {
        parts.push(format!("ar_{}", aspect.canonical()));
    }
    if let Some(rotate) = params.rotate {
        parts.push(format!("a_{}", rotate.canonical()));
    }
    if let Some(background) = params.background {
        parts.push(format!("b_{}", background.canonical().replace('#', "rgb:")));
    }
    if let Some(quality) = params.quality {
        parts.push(format!("q_{quality}"));
    }
    if let Some(format) = params.format {
        parts.push(format!("f_{}", format.canonical_name()));
    }
    if let Some(so) = params.start_offset {
        parts.push(format!("so_{so}"));
    }
    if let Some(eo) = params.end_offset {
        parts.push(format!("eo_{eo}"));
    }
    if params.thumbnail {
        parts.push("t_1".to_string());
    }
    if let Some(tt) = params.thumbnail_time {
        parts.push(format!("tt_{tt}"));
    }
    parts.join(",")
}
