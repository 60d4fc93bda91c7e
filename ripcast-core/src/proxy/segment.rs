use std::sync::Arc;

use regex::Regex;
use reqwest::header::{ACCEPT_RANGES, CONTENT_RANGE, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use crate::session::SessionRegistry;

use super::error::{ProxyError, ProxyResult};
use super::fetch::{UpstreamFetcher, UpstreamOutcome};
use super::headers::AcceptProfile;
use super::manifest::HLS_CONTENT_TYPE;
use super::rewrite::{rewrite_playlist, RewriteRoutes};

pub const MEDIA_TRANSPORT_TYPE: &str = "video/mp2t";

const FALLBACK_BINARY_TYPE: &str = "application/octet-stream";

/// Everything the routing layer needs to answer one proxied segment request.
/// Upstream status and range headers are relayed as-is; only the content
/// type may be corrected, and nested playlists come back rewritten.
#[derive(Debug, Clone)]
pub struct SegmentRelay {
    pub status: u16,
    pub content_type: String,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub accept_ranges: Option<String>,
    pub body: Vec<u8>,
}

/// Serves a single proxy-addressed resource under the session's trust
/// context, with the same header cascade as the manifest path.
#[derive(Debug, Clone)]
pub struct SegmentService {
    registry: Arc<SessionRegistry>,
    fetcher: Arc<UpstreamFetcher>,
    routes: RewriteRoutes,
}

impl SegmentService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        fetcher: Arc<UpstreamFetcher>,
        routes: RewriteRoutes,
    ) -> Self {
        Self {
            registry,
            fetcher,
            routes,
        }
    }

    pub async fn relay(
        &self,
        session_id: &str,
        target: &str,
        range: Option<&str>,
    ) -> ProxyResult<SegmentRelay> {
        let session = self
            .registry
            .get(session_id)
            .await
            .ok_or_else(|| ProxyError::SessionNotFound(session_id.to_string()))?;
        let target = Url::parse(target)?;

        let outcome = self
            .fetcher
            .fetch(&session, &target, AcceptProfile::Any, range)
            .await?;
        let response = match outcome {
            UpstreamOutcome::Delivered(response) => response,
            UpstreamOutcome::TiersExhausted { status } => {
                return Err(ProxyError::UpstreamSegment { status });
            }
        };

        let status = response.status().as_u16();
        let upstream_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase());
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let accept_ranges = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let final_url = response.url().clone();

        if response.status().is_success()
            && is_playlist_response(&final_url, upstream_type.as_deref())
        {
            let body = response.text().await?;
            let rewritten = rewrite_playlist(&body, &final_url, session.id(), &self.routes);
            return Ok(SegmentRelay {
                status,
                content_type: HLS_CONTENT_TYPE.to_string(),
                content_length: Some(rewritten.len() as u64),
                content_range,
                accept_ranges,
                body: rewritten.into_bytes(),
            });
        }

        let upstream_length = response.content_length();
        let body = response.bytes().await?.to_vec();
        let content_type = relay_content_type(&final_url, upstream_type);
        Ok(SegmentRelay {
            status,
            content_type,
            content_length: upstream_length.or(Some(body.len() as u64)),
            content_range,
            accept_ranges,
            body,
        })
    }
}

fn is_playlist_response(url: &Url, content_type: Option<&str>) -> bool {
    if content_type.map(|ct| ct.contains("mpegurl")).unwrap_or(false) {
        return true;
    }
    url.path().ends_with(".m3u8") || url.path().ends_with(".m3u")
}

/// Disguised-segment correction: a path shaped like a media segment that is
/// served under a document/image/script/style/font identity gets the HLS
/// transport type forced; recognized genuine segments keep whatever the
/// upstream said.
fn relay_content_type(url: &Url, upstream: Option<String>) -> String {
    let path = url.path();
    let misleading = upstream
        .as_deref()
        .map(misleading_content_type)
        .unwrap_or(false)
        || misleading_extension(path);
    if segment_shaped_path(path) && misleading {
        debug!(url = %url, "forcing media transport type on disguised segment");
        return MEDIA_TRANSPORT_TYPE.to_string();
    }
    upstream.unwrap_or_else(|| FALLBACK_BINARY_TYPE.to_string())
}

/// Matches the segment-naming conventions seen in the wild: a numbered file,
/// optionally prefixed with seg/segment/chunk/frag/media/part, regardless of
/// the extension it hides behind.
fn segment_shaped_path(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let stem = file_name.split('.').next().unwrap_or(file_name);
    let pattern = match Regex::new(r"(?i)^(?:seg(?:ment)?|chunk|frag(?:ment)?|media|part)?[-_]?\d+$")
    {
        Ok(re) => re,
        Err(_) => return false,
    };
    pattern.is_match(stem)
}

fn misleading_content_type(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type.starts_with("image/")
        || content_type.starts_with("font/")
        || content_type.contains("javascript")
        || content_type.contains("json")
        || content_type.contains("xml")
        || content_type.contains("html")
        || content_type.contains("css")
}

fn misleading_extension(path: &str) -> bool {
    let extension = path.rsplit('.').next().unwrap_or_default();
    matches!(
        extension.to_ascii_lowercase().as_str(),
        "html"
            | "htm"
            | "txt"
            | "xml"
            | "json"
            | "js"
            | "css"
            | "png"
            | "jpg"
            | "jpeg"
            | "gif"
            | "webp"
            | "svg"
            | "ico"
            | "woff"
            | "woff2"
            | "ttf"
            | "otf"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_paths_are_segment_shaped() {
        assert!(segment_shaped_path("/media/seg-00042.png"));
        assert!(segment_shaped_path("/media/segment_7.jpg"));
        assert!(segment_shaped_path("/media/chunk12.html"));
        assert!(segment_shaped_path("/a/b/00017.ts"));
        assert!(!segment_shaped_path("/media/logo.png"));
        assert!(!segment_shaped_path("/media/player.js"));
    }

    #[test]
    fn disguised_segment_gets_transport_type() {
        let url = Url::parse("https://cdn.example.net/hls/seg-00042.png").unwrap();
        assert_eq!(
            relay_content_type(&url, Some("image/png".to_string())),
            MEDIA_TRANSPORT_TYPE
        );
    }

    #[test]
    fn genuine_segment_keeps_upstream_type() {
        let url = Url::parse("https://cdn.example.net/hls/seg-00042.ts").unwrap();
        assert_eq!(
            relay_content_type(&url, Some("video/mp2t".to_string())),
            "video/mp2t"
        );
        // Even an odd upstream label on a real segment extension is relayed.
        let url = Url::parse("https://cdn.example.net/hls/00042.m4s").unwrap();
        assert_eq!(
            relay_content_type(&url, Some("application/octet-stream".to_string())),
            "application/octet-stream"
        );
    }

    #[test]
    fn unshaped_paths_never_get_rewritten_types() {
        let url = Url::parse("https://cdn.example.net/assets/poster.png").unwrap();
        assert_eq!(
            relay_content_type(&url, Some("image/png".to_string())),
            "image/png"
        );
    }

    #[test]
    fn nested_playlists_detected_by_type_or_extension() {
        let by_ext = Url::parse("https://host/a/720p/index.m3u8").unwrap();
        assert!(is_playlist_response(&by_ext, None));
        let by_type = Url::parse("https://host/a/chunklist").unwrap();
        assert!(is_playlist_response(
            &by_type,
            Some("application/vnd.apple.mpegurl")
        ));
        let neither = Url::parse("https://host/a/seg1.ts").unwrap();
        assert!(!is_playlist_response(&neither, Some("video/mp2t")));
    }
}
