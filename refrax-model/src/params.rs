//! The typed transformation parameter record.
//!
//! A [`TransformParams`] value is the canonical in-process representation of
//! everything a request URL may ask for. Directive aliases are dissolved by
//! the parser; by the time a record exists, every field holds one canonical
//! value. Canonicalization (sorted keys, normalized values) is a pure
//! function of the record and is the basis of fingerprinting and of the job
//! queue's uniqueness key.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::format::OutputFormat;

/// Resize fit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropMode {
    /// Cover the target box, cropping overflow.
    Fill,
    /// Fit inside the target box without enlargement.
    Fit,
    /// Stretch to the exact target extents.
    Scale,
    /// Cover then center-crop, like `Fill` but biased toward the focal point.
    Crop,
    /// Fit inside the target box and pad to the exact extents.
    Pad,
}

impl CropMode {
    /// Parse a directive value, folding legacy aliases onto the five
    /// canonical modes.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fill" | "lfill" => Some(Self::Fill),
            "fit" | "limit" | "mfit" => Some(Self::Fit),
            "scale" => Some(Self::Scale),
            "crop" | "thumb" => Some(Self::Crop),
            "pad" | "lpad" | "fill_pad" => Some(Self::Pad),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fill => "fill",
            Self::Fit => "fit",
            Self::Scale => "scale",
            Self::Crop => "crop",
            Self::Pad => "pad",
        }
    }
}

/// Focal anchor for cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gravity {
    Center,
    North,
    South,
    East,
    West,
    Face,
    Auto,
}

impl Gravity {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "center" | "c" => Some(Self::Center),
            "north" | "n" => Some(Self::North),
            "south" | "s" => Some(Self::South),
            "east" | "e" => Some(Self::East),
            "west" | "w" => Some(Self::West),
            "face" | "faces" | "face_center" => Some(Self::Face),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Center => "center",
            Self::North => "north",
            Self::South => "south",
            Self::East => "east",
            Self::West => "west",
            Self::Face => "face",
            Self::Auto => "auto",
        }
    }
}

/// Rotation request: explicit degrees or EXIF auto-orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rotation {
    Auto,
    Degrees(f64),
}

impl Rotation {
    pub fn parse(value: &str) -> Option<Self> {
        if value == "auto" {
            return Some(Self::Auto);
        }
        value.parse::<f64>().ok().map(Self::Degrees)
    }

    pub fn canonical(&self) -> String {
        match self {
            Self::Auto => "auto".to_string(),
            Self::Degrees(d) => fmt_num(*d),
        }
    }
}

impl Serialize for Rotation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for Rotation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RotationVisitor;

        impl Visitor<'_> for RotationVisitor {
            type Value = Rotation;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("\"auto\" or a number of degrees")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Rotation, E> {
                Rotation::parse(v)
                    .ok_or_else(|| E::custom(format!("invalid rotation: {v}")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Rotation, E> {
                Ok(Rotation::Degrees(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Rotation, E> {
                Ok(Rotation::Degrees(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Rotation, E> {
                Ok(Rotation::Degrees(v as f64))
            }
        }

        deserializer.deserialize_any(RotationVisitor)
    }
}

/// Pad/rotate fill color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    Transparent,
    Rgb { r: u8, g: u8, b: u8 },
}

impl Background {
    /// Accepts the keywords `transparent`, `white` and `black`, the
    /// `rgb:RRGGBB` prefix form, and `#RRGGBB`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "transparent" => return Some(Self::Transparent),
            "white" => return Some(Self::Rgb { r: 255, g: 255, b: 255 }),
            "black" => return Some(Self::Rgb { r: 0, g: 0, b: 0 }),
            _ => {}
        }
        let hex = value
            .strip_prefix("rgb:")
            .or_else(|| value.strip_prefix('#'))?;
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self::Rgb { r, g, b })
    }

    pub fn canonical(&self) -> String {
        match self {
            Self::Transparent => "transparent".to_string(),
            Self::Rgb { r, g, b } => format!("#{r:02x}{g:02x}{b:02x}"),
        }
    }
}

impl Serialize for Background {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for Background {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Background::parse(&s).ok_or_else(|| de::Error::custom(format!("invalid background: {s}")))
    }
}

/// Pre-resize crop ratio, `W:H`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub w: u32,
    pub h: u32,
}

impl AspectRatio {
    pub fn parse(value: &str) -> Option<Self> {
        let (w, h) = value.split_once(':')?;
        let w = w.parse().ok().filter(|w| *w > 0)?;
        let h = h.parse().ok().filter(|h| *h > 0)?;
        Some(Self { w, h })
    }

    pub fn ratio(&self) -> f64 {
        f64::from(self.w) / f64::from(self.h)
    }

    pub fn canonical(&self) -> String {
        format!("{}:{}", self.w, self.h)
    }
}

impl Serialize for AspectRatio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for AspectRatio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        AspectRatio::parse(&s)
            .ok_or_else(|| de::Error::custom(format!("invalid aspect ratio: {s}")))
    }
}

/// The transformation parameter record. Unset fields mean "apply no such
/// step".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransformParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Legacy `WxH` shorthand, populated whenever both extents are set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resize: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gravity: Option<Gravity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect: Option<AspectRatio>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotate: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<Background>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub thumbnail: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_time: Option<f64>,
}

impl TransformParams {
    /// True when the record requests no transformation at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when any video-only directive is present.
    pub fn has_video_directives(&self) -> bool {
        self.start_offset.is_some()
            || self.end_offset.is_some()
            || self.thumbnail
            || self.thumbnail_time.is_some()
    }

    /// Keep the legacy `resize` shorthand in sync with the extents.
    pub fn sync_resize(&mut self) {
        self.resize = match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{w}x{h}")),
            _ => None,
        };
    }

    /// Canonical `(key, value)` pairs: default/empty fields removed, values
    /// normalized, keys sorted lexicographically.
    pub fn canonical_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(w) = self.width {
            pairs.push(("width", w.to_string()));
        }
        if let Some(h) = self.height {
            pairs.push(("height", h.to_string()));
        }
        if let Some(resize) = &self.resize {
            pairs.push(("resize", resize.clone()));
        }
        if let Some(crop) = self.crop {
            pairs.push(("crop", crop.as_str().to_string()));
        }
        if let Some(gravity) = self.gravity {
            pairs.push(("gravity", gravity.as_str().to_string()));
        }
        if let Some(aspect) = self.aspect {
            pairs.push(("aspect", aspect.canonical()));
        }
        if let Some(rotate) = self.rotate {
            pairs.push(("rotate", rotate.canonical()));
        }
        if let Some(background) = self.background {
            pairs.push(("background", background.canonical()));
        }
        if let Some(quality) = self.quality {
            pairs.push(("quality", quality.to_string()));
        }
        if let Some(format) = self.format {
            pairs.push(("format", format.canonical_name().to_string()));
        }
        if let Some(so) = self.start_offset {
            pairs.push(("startOffset", fmt_num(so)));
        }
        if let Some(eo) = self.end_offset {
            pairs.push(("endOffset", fmt_num(eo)));
        }
        if self.thumbnail {
            pairs.push(("thumbnail", "true".to_string()));
        }
        if let Some(tt) = self.thumbnail_time {
            pairs.push(("thumbnailTime", fmt_num(tt)));
        }
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs
    }

    /// Canonical textual form, `key=value` joined by commas.
    pub fn canonical_string(&self) -> String {
        self.canonical_pairs()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Normalized JSON object with sorted keys and string values. This is
    /// the job queue's uniqueness key; two logically identical records must
    /// produce byte-identical output.
    pub fn to_json_normalized(&self) -> String {
        let pairs = self.canonical_pairs();
        let mut out = String::from("{");
        for (i, (k, v)) in pairs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&serde_json::Value::String((*k).to_string()).to_string());
            out.push(':');
            out.push_str(&serde_json::Value::String(v.clone()).to_string());
        }
        out.push('}');
        out
    }

    /// Rebuild a record from [`Self::to_json_normalized`] output.
    pub fn from_json_normalized(json: &str) -> Result<Self, String> {
        let map: std::collections::BTreeMap<String, String> =
            serde_json::from_str(json).map_err(|e| format!("invalid params json: {e}"))?;
        let mut params = Self::default();
        for (key, value) in &map {
            match key.as_str() {
                "width" => params.width = value.parse().ok(),
                "height" => params.height = value.parse().ok(),
                "resize" => params.resize = Some(value.clone()),
                "crop" => params.crop = CropMode::parse(value),
                "gravity" => params.gravity = Gravity::parse(value),
                "aspect" => params.aspect = AspectRatio::parse(value),
                "rotate" => params.rotate = Rotation::parse(value),
                "background" => params.background = Background::parse(value),
                "quality" => params.quality = value.parse().ok(),
                "format" => params.format = OutputFormat::parse(value),
                "startOffset" => params.start_offset = value.parse().ok(),
                "endOffset" => params.end_offset = value.parse().ok(),
                "thumbnail" => params.thumbnail = value == "true",
                "thumbnailTime" => params.thumbnail_time = value.parse().ok(),
                other => return Err(format!("unknown params key: {other}")),
            }
        }
        Ok(params)
    }
}

/// Format a float without a trailing `.0` so canonical forms stay stable.
fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}
