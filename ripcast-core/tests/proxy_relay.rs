use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use ripcast_core::browser::BrowserEngine;
use ripcast_core::config::load_browser_config;
use ripcast_core::proxy::{
    ManifestService, ProxyError, RewriteRoutes, SegmentService, UpstreamFetcher,
    HLS_CONTENT_TYPE, MEDIA_TRANSPORT_TYPE,
};
use ripcast_core::session::{SessionRegistry, SourceKind};

#[derive(Debug, Clone)]
struct SeenRequest {
    path: String,
    headers: HashMap<String, String>,
}

impl SeenRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
struct StubResponse {
    status: u16,
    content_type: Option<String>,
    extra_headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl StubResponse {
    fn new(status: u16, body: &[u8]) -> Self {
        Self {
            status,
            content_type: None,
            extra_headers: Vec::new(),
            body: body.to_vec(),
        }
    }

    fn content_type(mut self, value: &str) -> Self {
        self.content_type = Some(value.to_string());
        self
    }

    fn header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.push((name.to_string(), value.to_string()));
        self
    }
}

type Responder = dyn Fn(&SeenRequest) -> StubResponse + Send + Sync;

/// Minimal HTTP/1.1 upstream: one request per connection, enough to exercise
/// the header cascade and relay behavior without leaving the process.
async fn spawn_upstream(
    responder: Arc<Responder>,
) -> (SocketAddr, Arc<Mutex<Vec<SeenRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_writer = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let responder = responder.clone();
            let seen_writer = seen_writer.clone();
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let Ok(read) = socket.read(&mut chunk).await else {
                        return;
                    };
                    if read == 0 {
                        return;
                    }
                    buffer.extend_from_slice(&chunk[..read]);
                    if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let text = String::from_utf8_lossy(&buffer);
                let mut lines = text.lines();
                let request_line = lines.next().unwrap_or_default();
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();
                let mut headers = HashMap::new();
                for line in lines {
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        headers.insert(
                            name.trim().to_ascii_lowercase(),
                            value.trim().to_string(),
                        );
                    }
                }
                let request = SeenRequest { path, headers };
                seen_writer.lock().unwrap().push(request.clone());
                let response = responder(&request);
                let mut head = format!(
                    "HTTP/1.1 {} STUB\r\nContent-Length: {}\r\nConnection: close\r\n",
                    response.status,
                    response.body.len()
                );
                if let Some(content_type) = &response.content_type {
                    head.push_str(&format!("Content-Type: {content_type}\r\n"));
                }
                for (name, value) in &response.extra_headers {
                    head.push_str(&format!("{name}: {value}\r\n"));
                }
                head.push_str("\r\n");
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&response.body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (addr, seen)
}

fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(relative)
}

struct ProxyHarness {
    registry: Arc<SessionRegistry>,
    manifests: ManifestService,
    segments: SegmentService,
}

fn build_proxy() -> ProxyHarness {
    let browser_config = load_browser_config(fixture_path("configs/browser.toml")).unwrap();
    let sources = browser_config.sources.clone();
    let engine = Arc::new(BrowserEngine::new(browser_config).unwrap());
    let registry = Arc::new(SessionRegistry::new(engine, sources));
    let identity = ripcast_core::config::IdentitySection {
        user_agent: "ripcast-test/1.0".to_string(),
    };
    let fetcher = Arc::new(UpstreamFetcher::new(&identity).unwrap());
    let routes = RewriteRoutes::default();
    ProxyHarness {
        manifests: ManifestService::new(registry.clone(), fetcher.clone(), routes.clone()),
        segments: SegmentService::new(registry.clone(), fetcher, routes),
        registry,
    }
}

async fn cached_session(
    harness: &ProxyHarness,
    manifest_url: &str,
    source_url: &str,
) -> String {
    let session = harness
        .registry
        .create_from_cache(
            manifest_url,
            SourceKind::Movie,
            "tt0133093",
            None,
            None,
            Some(source_url.to_string()),
        )
        .await
        .unwrap();
    session.id().to_string()
}

const PLAYLIST_BODY: &[u8] = b"#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:4.000,\n720p/index.m3u8\n";

#[tokio::test]
async fn referrer_rejection_advances_to_the_next_tier() {
    let responder: Arc<Responder> = Arc::new(|request: &SeenRequest| {
        if request.header("referer").is_some() {
            StubResponse::new(403, b"blocked")
        } else {
            StubResponse::new(200, PLAYLIST_BODY).content_type(HLS_CONTENT_TYPE)
        }
    });
    let (addr, seen) = spawn_upstream(responder).await;

    let harness = build_proxy();
    let manifest_url = format!("http://{addr}/a/master.m3u8");
    let source_url = format!("http://{addr}/watch/movie");
    let session_id = cached_session(&harness, &manifest_url, &source_url).await;

    let playlist = harness.manifests.playlist(&session_id).await.unwrap();
    assert_eq!(playlist.content_type, HLS_CONTENT_TYPE);
    assert!(playlist.body.contains("/segment?sessionId="));

    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].header("referer").is_some());
    assert!(requests[1].header("referer").is_none());
}

#[tokio::test]
async fn successful_primary_tier_never_retries() {
    let responder: Arc<Responder> = Arc::new(|_request: &SeenRequest| {
        StubResponse::new(200, PLAYLIST_BODY).content_type(HLS_CONTENT_TYPE)
    });
    let (addr, seen) = spawn_upstream(responder).await;

    let harness = build_proxy();
    let manifest_url = format!("http://{addr}/a/master.m3u8");
    let source_url = format!("http://{addr}/watch/movie");
    let session_id = cached_session(&harness, &manifest_url, &source_url).await;

    harness.manifests.playlist(&session_id).await.unwrap();
    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].header("referer"),
        Some(source_url.as_str())
    );
}

#[tokio::test]
async fn non_auth_failures_abort_the_cascade() {
    let responder: Arc<Responder> =
        Arc::new(|_request: &SeenRequest| StubResponse::new(500, b"boom"));
    let (addr, seen) = spawn_upstream(responder).await;

    let harness = build_proxy();
    let manifest_url = format!("http://{addr}/a/master.m3u8");
    let source_url = format!("http://{addr}/watch/movie");
    let session_id = cached_session(&harness, &manifest_url, &source_url).await;

    let err = harness.manifests.playlist(&session_id).await.unwrap_err();
    assert!(matches!(err, ProxyError::UpstreamManifest { status: 500 }));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn exhausted_tiers_surface_the_last_status() {
    let responder: Arc<Responder> =
        Arc::new(|_request: &SeenRequest| StubResponse::new(403, b"blocked"));
    let (addr, seen) = spawn_upstream(responder).await;

    let harness = build_proxy();
    let manifest_url = format!("http://{addr}/a/master.m3u8");
    let source_url = format!("http://{addr}/watch/movie");
    let session_id = cached_session(&harness, &manifest_url, &source_url).await;

    let err = harness.manifests.playlist(&session_id).await.unwrap_err();
    assert!(matches!(err, ProxyError::UpstreamManifest { status: 403 }));
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn rewritten_references_recover_the_absolute_target() {
    let responder: Arc<Responder> = Arc::new(|_request: &SeenRequest| {
        StubResponse::new(200, PLAYLIST_BODY).content_type(HLS_CONTENT_TYPE)
    });
    let (addr, _seen) = spawn_upstream(responder).await;

    let harness = build_proxy();
    let manifest_url = format!("http://{addr}/a/master.m3u8");
    let source_url = format!("http://{addr}/watch/movie");
    let session_id = cached_session(&harness, &manifest_url, &source_url).await;

    let playlist = harness.manifests.playlist(&session_id).await.unwrap();
    let reference = playlist
        .body
        .lines()
        .find(|line| line.starts_with("/segment?"))
        .expect("rewritten reference expected");
    let query = reference.split_once('?').unwrap().1;
    let decoded: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    assert_eq!(decoded["sessionId"], session_id);
    assert_eq!(decoded["url"], format!("http://{addr}/a/720p/index.m3u8"));
}

#[tokio::test]
async fn disguised_segment_is_relayed_as_media_transport() {
    let responder: Arc<Responder> = Arc::new(|_request: &SeenRequest| {
        StubResponse::new(200, &[0x47, 0x40, 0x11, 0x10]).content_type("image/png")
    });
    let (addr, _seen) = spawn_upstream(responder).await;

    let harness = build_proxy();
    let manifest_url = format!("http://{addr}/a/master.m3u8");
    let source_url = format!("http://{addr}/watch/movie");
    let session_id = cached_session(&harness, &manifest_url, &source_url).await;

    let relay = harness
        .segments
        .relay(
            &session_id,
            &format!("http://{addr}/hls/seg-00042.png"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(relay.status, 200);
    assert_eq!(relay.content_type, MEDIA_TRANSPORT_TYPE);
    assert_eq!(relay.body, vec![0x47, 0x40, 0x11, 0x10]);
}

#[tokio::test]
async fn nested_playlist_is_rewritten_in_the_segment_path() {
    let responder: Arc<Responder> = Arc::new(|request: &SeenRequest| {
        if request.path.ends_with("child.m3u8") {
            StubResponse::new(200, b"#EXTM3U\n#EXTINF:4.000,\nseg-1.ts\n")
                .content_type(HLS_CONTENT_TYPE)
        } else {
            StubResponse::new(404, b"")
        }
    });
    let (addr, _seen) = spawn_upstream(responder).await;

    let harness = build_proxy();
    let manifest_url = format!("http://{addr}/a/master.m3u8");
    let source_url = format!("http://{addr}/watch/movie");
    let session_id = cached_session(&harness, &manifest_url, &source_url).await;

    let relay = harness
        .segments
        .relay(&session_id, &format!("http://{addr}/a/child.m3u8"), None)
        .await
        .unwrap();
    assert_eq!(relay.content_type, HLS_CONTENT_TYPE);
    let body = String::from_utf8(relay.body).unwrap();
    assert!(body.contains("/segment?sessionId="));
    assert!(body.contains("seg-1.ts") || body.contains("seg-1"));
}

#[tokio::test]
async fn range_headers_are_forwarded_and_relayed() {
    let responder: Arc<Responder> = Arc::new(|_request: &SeenRequest| {
        StubResponse::new(206, b"abcd")
            .content_type("video/mp2t")
            .header("Content-Range", "bytes 0-3/100")
            .header("Accept-Ranges", "bytes")
    });
    let (addr, seen) = spawn_upstream(responder).await;

    let harness = build_proxy();
    let manifest_url = format!("http://{addr}/a/master.m3u8");
    let source_url = format!("http://{addr}/watch/movie");
    let session_id = cached_session(&harness, &manifest_url, &source_url).await;

    let relay = harness
        .segments
        .relay(
            &session_id,
            &format!("http://{addr}/a/seg-1.ts"),
            Some("bytes=0-3"),
        )
        .await
        .unwrap();
    assert_eq!(relay.status, 206);
    assert_eq!(relay.content_range.as_deref(), Some("bytes 0-3/100"));
    assert_eq!(relay.accept_ranges.as_deref(), Some("bytes"));
    assert_eq!(relay.body, b"abcd".to_vec());

    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests[0].header("range"), Some("bytes=0-3"));
}

#[tokio::test]
async fn non_auth_segment_failures_are_relayed_not_raised() {
    let responder: Arc<Responder> =
        Arc::new(|_request: &SeenRequest| StubResponse::new(404, b"gone").content_type("text/plain"));
    let (addr, _seen) = spawn_upstream(responder).await;

    let harness = build_proxy();
    let manifest_url = format!("http://{addr}/a/master.m3u8");
    let source_url = format!("http://{addr}/watch/movie");
    let session_id = cached_session(&harness, &manifest_url, &source_url).await;

    let relay = harness
        .segments
        .relay(&session_id, &format!("http://{addr}/a/seg-9.ts"), None)
        .await
        .unwrap();
    assert_eq!(relay.status, 404);
    assert_eq!(relay.body, b"gone".to_vec());
}

#[tokio::test]
async fn exhausted_segment_tiers_raise_with_status() {
    let responder: Arc<Responder> =
        Arc::new(|_request: &SeenRequest| StubResponse::new(403, b"blocked"));
    let (addr, seen) = spawn_upstream(responder).await;

    let harness = build_proxy();
    let manifest_url = format!("http://{addr}/a/master.m3u8");
    let source_url = format!("http://{addr}/watch/movie");
    let session_id = cached_session(&harness, &manifest_url, &source_url).await;

    let err = harness
        .segments
        .relay(&session_id, &format!("http://{addr}/a/seg-9.ts"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::UpstreamSegment { status: 403 }));
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn unknown_session_is_rejected() {
    let harness = build_proxy();
    let err = harness.manifests.playlist("missing").await.unwrap_err();
    assert!(matches!(err, ProxyError::SessionNotFound(_)));
    let err = harness
        .segments
        .relay("missing", "https://host/a/seg-1.ts", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::SessionNotFound(_)));
}
