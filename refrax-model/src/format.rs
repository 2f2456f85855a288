//! Media format enums and content sniffing.

use serde::{Deserialize, Serialize};

/// Supported raster image output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
    Gif,
}

impl ImageFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "avif" => Some(Self::Avif),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn ext(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Avif => "avif",
            Self::Gif => "gif",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Avif => "image/avif",
            Self::Gif => "image/gif",
        }
    }
}

/// Supported video container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    Mp4,
    Mov,
    Webm,
}

impl VideoFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "mov" => Some(Self::Mov),
            "webm" => Some(Self::Webm),
            _ => None,
        }
    }

    pub fn ext(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Webm => "webm",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Mov => "video/quicktime",
            Self::Webm => "video/webm",
        }
    }
}

/// Explicit output format requested by the `f` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputFormat {
    Image(ImageFormat),
    Video(VideoFormat),
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        ImageFormat::parse(value)
            .map(Self::Image)
            .or_else(|| VideoFormat::parse(value).map(Self::Video))
    }

    /// Canonical lowercase name (`jpg` is normalized to `jpeg`).
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Self::Image(f) => f.ext(),
            Self::Video(f) => f.ext(),
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Image(f) => f.mime(),
            Self::Video(f) => f.mime(),
        }
    }
}

/// Coarse media classification by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    pub fn from_path(path: &str) -> Self {
        match extension(path) {
            Some(ext) => {
                if ImageFormat::parse(&ext).is_some() {
                    Self::Image
                } else if VideoFormat::parse(&ext).is_some() {
                    Self::Video
                } else {
                    Self::Other
                }
            }
            None => Self::Other,
        }
    }
}

/// Lowercased extension of a relative path, if any.
pub fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Guess a content type from leading magic bytes. Used when a cached
/// artifact carries no explicit type.
pub fn sniff_content_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 12 {
        return None;
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if &bytes[4..8] == b"ftyp" {
        let brand = &bytes[8..12];
        if brand.starts_with(b"avif") || brand.starts_with(b"avis") {
            return Some("image/avif");
        }
        if brand.starts_with(b"qt") {
            return Some("video/quicktime");
        }
        return Some("video/mp4");
    }
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("video/webm");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpg_normalizes_to_jpeg() {
        assert_eq!(ImageFormat::parse("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::parse("JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(
            OutputFormat::parse("jpg").unwrap().canonical_name(),
            "jpeg"
        );
    }

    #[test]
    fn media_kind_from_path() {
        assert_eq!(MediaKind::from_path("photos/cat.PNG"), MediaKind::Image);
        assert_eq!(MediaKind::from_path("clips/intro.mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_path("docs/report.pdf"), MediaKind::Other);
        assert_eq!(MediaKind::from_path("noextension"), MediaKind::Other);
        assert_eq!(MediaKind::from_path(".hidden"), MediaKind::Other);
    }

    #[test]
    fn sniffs_common_magics() {
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(&[0; 8]);
        assert_eq!(sniff_content_type(&png), Some("image/png"));

        let mut mp4 = vec![0, 0, 0, 0x18];
        mp4.extend_from_slice(b"ftypisom");
        mp4.extend_from_slice(&[0; 8]);
        assert_eq!(sniff_content_type(&mp4), Some("video/mp4"));

        let mut avif = vec![0, 0, 0, 0x1C];
        avif.extend_from_slice(b"ftypavif");
        avif.extend_from_slice(&[0; 8]);
        assert_eq!(sniff_content_type(&avif), Some("image/avif"));

        assert_eq!(sniff_content_type(b"hello world!"), None);
    }
}
