//! HMAC-based URL authentication for the optional `/s--<sig>/...` prefix.
//!
//! The signature is HMAC-SHA256 over `transformations + "/" + sanitized
//! file path`, truncated to the first 16 hex characters. Comparison is
//! constant-time; a wrong-length signature is rejected before any HMAC
//! work.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{RefraxError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from the MAC.
pub const SIGNATURE_LEN: usize = 16;

/// Compute the truncated signature for a transformation + path pair. The
/// one signing helper this service exposes.
pub fn sign(secret: &str, transformations: &str, file_path: &str) -> Result<String> {
    let sanitized = sanitize_signed_path(file_path)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| RefraxError::Internal("signature secret unusable".to_string()))?;
    mac.update(transformations.as_bytes());
    mac.update(b"/");
    mac.update(sanitized.as_bytes());
    let digest = mac.finalize().into_bytes();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok(hex[..SIGNATURE_LEN].to_string())
}

/// Verify a presented signature.
pub fn verify(
    secret: &str,
    presented: &str,
    transformations: &str,
    file_path: &str,
) -> Result<()> {
    if presented.len() != SIGNATURE_LEN {
        return Err(RefraxError::Unauthorized(
            "malformed signature".to_string(),
        ));
    }
    let expected = sign(secret, transformations, file_path)?;
    if expected.as_bytes().ct_eq(presented.as_bytes()).into() {
        Ok(())
    } else {
        Err(RefraxError::Unauthorized("signature mismatch".to_string()))
    }
}

/// Normalize `.`/`..` segments and reject any path that still tries to
/// escape upward.
pub fn sanitize_signed_path(path: &str) -> Result<String> {
    let mut kept: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if kept.pop().is_none() {
                    return Err(RefraxError::InvalidRequest(
                        "path escapes root".to_string(),
                    ));
                }
            }
            other => kept.push(other),
        }
    }
    if kept.is_empty() {
        return Err(RefraxError::InvalidRequest("empty signed path".to_string()));
    }
    Ok(kept.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "correct horse battery staple";

    #[test]
    fn sign_verify_round_trip() {
        let sig = sign(SECRET, "w_400,h_300", "photos/cat.jpg").unwrap();
        assert_eq!(sig.len(), SIGNATURE_LEN);
        verify(SECRET, &sig, "w_400,h_300", "photos/cat.jpg").unwrap();
    }

    #[test]
    fn wrong_secret_or_params_fail() {
        let sig = sign(SECRET, "w_400", "cat.jpg").unwrap();
        assert!(verify("other secret", &sig, "w_400", "cat.jpg").is_err());
        assert!(verify(SECRET, &sig, "w_401", "cat.jpg").is_err());
        assert!(verify(SECRET, &sig, "w_400", "dog.jpg").is_err());
    }

    #[test]
    fn wrong_length_rejected_eagerly() {
        assert!(matches!(
            verify(SECRET, "abc", "w_400", "cat.jpg"),
            Err(RefraxError::Unauthorized(_))
        ));
        assert!(verify(SECRET, &"a".repeat(17), "w_400", "cat.jpg").is_err());
    }

    #[test]
    fn sanitization_normalizes_and_rejects_escapes() {
        assert_eq!(
            sanitize_signed_path("a/./b/../c.jpg").unwrap(),
            "a/c.jpg"
        );
        assert!(sanitize_signed_path("../etc/passwd").is_err());
        assert!(sanitize_signed_path("a/../..").is_err());
    }

    #[test]
    fn signature_is_stable_across_dot_segments() {
        let direct = sign(SECRET, "w_100", "a/c.jpg").unwrap();
        let dotted = sign(SECRET, "w_100", "a/./b/../c.jpg").unwrap();
        assert_eq!(direct, dotted);
    }
}
