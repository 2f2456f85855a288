//! Fingerprint and cache-key derivation.
//!
//! The fingerprint is a stable 128-bit digest over the original path and the
//! canonicalized parameter record. It is the primary key of every derived
//! artifact: equal normalized records produce equal fingerprints, distinct
//! observable transformations produce distinct ones.

use md5::{Digest, Md5};

use crate::format::{self, OutputFormat};
use crate::params::TransformParams;

/// Remote object keys for derived artifacts live under this prefix.
pub const CACHE_PREFIX: &str = "cache/";

/// Remote object keys for originals live under this prefix.
pub const PUBLIC_PREFIX: &str = "public/";

/// A derived artifact's identity: digest plus output extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    digest: String,
    ext: String,
}

impl Fingerprint {
    /// Digest `original_path || canonical_params` with MD5. The digest is a
    /// cache key, not a security boundary.
    pub fn compute(original_path: &str, params: &TransformParams) -> Self {
        let mut hasher = Md5::new();
        hasher.update(original_path.as_bytes());
        hasher.update(params.canonical_string().as_bytes());
        let digest = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();

        let ext = match params.format {
            Some(OutputFormat::Image(f)) => f.ext().to_string(),
            Some(OutputFormat::Video(f)) => f.ext().to_string(),
            None => format::extension(original_path).unwrap_or_else(|| "bin".to_string()),
        };

        Self { digest, ext }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn ext(&self) -> &str {
        &self.ext
    }

    /// Object-store key of the derived artifact.
    pub fn remote_key(&self) -> String {
        format!("{CACHE_PREFIX}{}.{}", self.digest, self.ext)
    }

    /// Local cache file name. Embeds the safe-encoded original stem so local
    /// invalidation can match every variant of one original by substring.
    pub fn local_file_name(&self, original_path: &str) -> String {
        format!("{}_{}.{}", safe_stem(original_path), self.digest, self.ext)
    }

    /// Strong ETag derived from the digest.
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.digest)
    }
}

/// Encode an original path into a single filesystem-safe token. Every byte
/// outside `[A-Za-z0-9._-]` collapses to `_`.
pub fn safe_stem(original_path: &str) -> String {
    original_path
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
