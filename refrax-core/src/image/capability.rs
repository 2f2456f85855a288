//! Client capability detection for adaptive format selection.
//!
//! The Accept header is authoritative when present; otherwise the
//! User-Agent is sniffed against known browser version floors.

use once_cell::sync::Lazy;
use regex::Regex;

/// First AVIF-capable major version per engine.
const AVIF_CHROME: u32 = 85;
const AVIF_FIREFOX: u32 = 93;
const AVIF_SAFARI: u32 = 16;
const AVIF_EDGE: u32 = 122;

static CHROME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Chrome/(\d+)").expect("chrome regex"));
static FIREFOX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Firefox/(\d+)").expect("firefox regex"));
static SAFARI_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Version/(\d+)[.\d]* .*Safari/").expect("safari regex"));
static EDGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Edg/(\d+)").expect("edge regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientCapabilities {
    pub avif: bool,
    pub webp: bool,
}

impl ClientCapabilities {
    /// Everything modern; used where no client context exists (background
    /// jobs, tests).
    pub fn modern() -> Self {
        Self { avif: true, webp: true }
    }

    pub fn detect(accept: Option<&str>, user_agent: Option<&str>) -> Self {
        if let Some(accept) = accept.filter(|a| !a.trim().is_empty()) {
            return Self {
                avif: accept.contains("image/avif"),
                webp: accept.contains("image/webp"),
            };
        }
        user_agent
            .map(Self::sniff_user_agent)
            .unwrap_or_default()
    }

    fn sniff_user_agent(ua: &str) -> Self {
        // Legacy engines first; their strings embed modern tokens.
        if ua.contains("MSIE") || ua.contains("Trident/") || ua.contains("Edge/") {
            return Self { avif: false, webp: false };
        }

        let avif = if let Some(version) = capture_version(&EDGE_RE, ua) {
            version >= AVIF_EDGE
        } else if let Some(version) = capture_version(&FIREFOX_RE, ua) {
            version >= AVIF_FIREFOX
        } else if let Some(version) = capture_version(&CHROME_RE, ua) {
            version >= AVIF_CHROME
        } else if let Some(version) = capture_version(&SAFARI_VERSION_RE, ua) {
            version >= AVIF_SAFARI
        } else {
            false
        };

        Self { avif, webp: true }
    }
}

fn capture_version(re: &Regex, ua: &str) -> Option<u32> {
    re.captures(ua)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_120: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const CHROME_84: &str = "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/84.0.4147.89 Safari/537.36";
    const FIREFOX_92: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:92.0) Gecko/20100101 Firefox/92.0";
    const SAFARI_17: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15";
    const EDGE_LEGACY: &str = "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/64.0.3282.140 Safari/537.36 Edge/18.17763";
    const EDGE_125: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36 Edg/125.0.0.0";
    const IE_11: &str = "Mozilla/5.0 (Windows NT 10.0; Trident/7.0; rv:11.0) like Gecko";

    #[test]
    fn accept_header_is_authoritative() {
        let caps =
            ClientCapabilities::detect(Some("image/avif,image/webp,*/*"), Some(IE_11));
        assert!(caps.avif);
        assert!(caps.webp);

        // Present but without modern types: do not fall back to the UA.
        let caps = ClientCapabilities::detect(Some("image/jpeg,*/*"), Some(CHROME_120));
        assert!(!caps.avif);
        assert!(!caps.webp);
    }

    #[test]
    fn user_agent_version_floors() {
        assert!(ClientCapabilities::detect(None, Some(CHROME_120)).avif);
        assert!(!ClientCapabilities::detect(None, Some(CHROME_84)).avif);
        assert!(ClientCapabilities::detect(None, Some(CHROME_84)).webp);
        assert!(!ClientCapabilities::detect(None, Some(FIREFOX_92)).avif);
        assert!(ClientCapabilities::detect(None, Some(SAFARI_17)).avif);
        assert!(ClientCapabilities::detect(None, Some(EDGE_125)).avif);
    }

    #[test]
    fn legacy_engines_get_neither() {
        for ua in [IE_11, EDGE_LEGACY] {
            let caps = ClientCapabilities::detect(None, Some(ua));
            assert!(!caps.avif, "{ua}");
            assert!(!caps.webp, "{ua}");
        }
    }

    #[test]
    fn no_headers_means_legacy() {
        assert_eq!(
            ClientCapabilities::detect(None, None),
            ClientCapabilities::default()
        );
    }
}
