use reqwest::header::{HeaderName, ACCEPT, ORIGIN, REFERER};
use reqwest::StatusCode;
use url::Url;

const MANIFEST_ACCEPT: &str = "application/vnd.apple.mpegurl, application/x-mpegurl, */*";

/// One request-header configuration of the fallback cascade, tried in the
/// order declared by `FALLBACK_TIERS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderTier {
    /// Source page posing as referrer/origin, full accept header.
    Primary,
    /// No referrer at all, relaxed accept.
    NoReferrer,
    /// The manifest's own host posing as referrer/origin.
    TargetReferrer,
}

pub(crate) const FALLBACK_TIERS: [HeaderTier; 3] = [
    HeaderTier::Primary,
    HeaderTier::NoReferrer,
    HeaderTier::TargetReferrer,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptProfile {
    Manifest,
    Any,
}

impl AcceptProfile {
    fn primary_accept(self) -> &'static str {
        match self {
            AcceptProfile::Manifest => MANIFEST_ACCEPT,
            AcceptProfile::Any => "*/*",
        }
    }
}

/// Shared advance predicate: only referrer/origin-style rejections move the
/// cascade forward. Everything else is final.
pub(crate) fn advance_on(status: StatusCode) -> bool {
    matches!(status.as_u16(), 401 | 403 | 405)
}

pub(crate) fn tier_headers(
    tier: HeaderTier,
    accept: AcceptProfile,
    source: &Url,
    target: &Url,
) -> Vec<(HeaderName, String)> {
    match tier {
        HeaderTier::Primary => vec![
            (ACCEPT, accept.primary_accept().to_string()),
            (REFERER, source.to_string()),
            (ORIGIN, origin_of(source)),
        ],
        HeaderTier::NoReferrer => vec![(ACCEPT, "*/*".to_string())],
        HeaderTier::TargetReferrer => {
            let origin = origin_of(target);
            vec![
                (ACCEPT, "*/*".to_string()),
                (REFERER, format!("{origin}/")),
                (ORIGIN, origin),
            ]
        }
    }
}

fn origin_of(url: &Url) -> String {
    let scheme = url.scheme();
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_only_on_auth_style_rejections() {
        assert!(advance_on(StatusCode::UNAUTHORIZED));
        assert!(advance_on(StatusCode::FORBIDDEN));
        assert!(advance_on(StatusCode::METHOD_NOT_ALLOWED));
        assert!(!advance_on(StatusCode::NOT_FOUND));
        assert!(!advance_on(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!advance_on(StatusCode::OK));
    }

    #[test]
    fn primary_tier_poses_as_the_source_page() {
        let source = Url::parse("https://watch.example.com/movie/42").unwrap();
        let target = Url::parse("https://cdn.example.net/live/index.m3u8").unwrap();
        let headers = tier_headers(HeaderTier::Primary, AcceptProfile::Manifest, &source, &target);
        assert!(headers
            .iter()
            .any(|(name, value)| *name == REFERER && value == "https://watch.example.com/movie/42"));
        assert!(headers
            .iter()
            .any(|(name, value)| *name == ORIGIN && value == "https://watch.example.com"));
    }

    #[test]
    fn no_referrer_tier_only_sets_accept() {
        let source = Url::parse("https://watch.example.com/movie/42").unwrap();
        let target = Url::parse("https://cdn.example.net/live/index.m3u8").unwrap();
        let headers = tier_headers(HeaderTier::NoReferrer, AcceptProfile::Any, &source, &target);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].0, ACCEPT);
    }

    #[test]
    fn target_referrer_tier_points_at_the_manifest_host() {
        let source = Url::parse("https://watch.example.com/movie/42").unwrap();
        let target = Url::parse("https://cdn.example.net:8443/live/index.m3u8").unwrap();
        let headers =
            tier_headers(HeaderTier::TargetReferrer, AcceptProfile::Any, &source, &target);
        assert!(headers
            .iter()
            .any(|(name, value)| *name == ORIGIN && value == "https://cdn.example.net:8443"));
    }
}
