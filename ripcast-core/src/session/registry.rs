use std::collections::HashMap;
use std::sync::Arc;

use chromiumoxide::cdp::browser_protocol::network::GetCookiesParams;
use chromiumoxide::page::Page;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::browser::BrowserEngine;
use crate::config::SourcesSection;

use super::error::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Movie,
    Tv,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Movie => "movie",
            SourceKind::Tv => "tv",
        }
    }
}

/// One proxy-addressable capture outcome. Browser-backed sessions own their
/// page exclusively; cache-backed sessions carry no page at all.
#[derive(Debug)]
pub struct CaptureSession {
    id: String,
    source_url: String,
    manifest_url: String,
    created_at: DateTime<Utc>,
    cookies: AsyncMutex<HashMap<String, String>>,
    page: Option<Page>,
}

impl CaptureSession {
    fn new(source_url: String, manifest_url: String, page: Option<Page>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            source_url,
            manifest_url,
            created_at: Utc::now(),
            cookies: AsyncMutex::new(HashMap::new()),
            page,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn has_page(&self) -> bool {
        self.page.is_some()
    }

    /// Cookie header for the target's host. Populated at most once per
    /// normalized host for the session's lifetime: the first miss on a
    /// browser-backed session reads live cookies from the page and caches
    /// whatever came back, empty included. Cache-backed sessions never have
    /// cookies to offer.
    pub async fn cookie_header(&self, target: &Url) -> Option<String> {
        let host = normalized_host(target)?;
        let mut cookies = self.cookies.lock().await;
        if let Some(cached) = cookies.get(&host) {
            return non_empty(cached);
        }
        let page = self.page.as_ref()?;
        let header = match read_page_cookies(page, target).await {
            Ok(header) => header,
            Err(err) => {
                warn!(session = %self.id, host = %host, error = %err, "cookie read failed");
                return None;
            }
        };
        debug!(session = %self.id, host = %host, cookies = header.len(), "cached cookie context");
        cookies.insert(host, header.clone());
        non_empty(&header)
    }

    pub(crate) async fn close_page(&self) {
        if let Some(page) = &self.page {
            if let Err(err) = page.clone().close().await {
                debug!(session = %self.id, error = %err, "page close failed during reap");
            }
        }
    }
}

async fn read_page_cookies(page: &Page, target: &Url) -> Result<String, chromiumoxide::error::CdpError> {
    let params = GetCookiesParams {
        urls: Some(vec![target.to_string()]),
    };
    let response = page.execute(params).await?;
    let header = response
        .cookies
        .iter()
        .map(|cookie| format!("{}={}", cookie.name, cookie.value))
        .collect::<Vec<_>>()
        .join("; ");
    Ok(header)
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn normalized_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    match url.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host),
    }
}

/// Process-wide session table. Injected where needed instead of living in a
/// module-level global so tests and multi-tenant deployments can own their
/// registries outright.
#[derive(Debug)]
pub struct SessionRegistry {
    browser: Arc<BrowserEngine>,
    sources: SourcesSection,
    pub(super) sessions: RwLock<HashMap<String, Arc<CaptureSession>>>,
}

impl SessionRegistry {
    pub fn new(browser: Arc<BrowserEngine>, sources: SourcesSection) -> Self {
        Self {
            browser,
            sources,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Canonical page URL for an identified title.
    pub fn source_url(
        &self,
        kind: SourceKind,
        id: &str,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> SessionResult<String> {
        let template = match kind {
            SourceKind::Movie => &self.sources.movie_url_template,
            SourceKind::Tv => &self.sources.tv_url_template,
        };
        expand_template(template, id, season, episode)
    }

    /// Drives the browser against the source page and registers the capture.
    /// Every call creates an independent session; reuse is the caller's call.
    pub async fn create_from_capture(
        &self,
        kind: SourceKind,
        id: &str,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> SessionResult<Arc<CaptureSession>> {
        let source_url = self.source_url(kind, id, season, episode)?;
        let capture = self.browser.capture_page(&source_url).await?;
        let session = Arc::new(CaptureSession::new(
            source_url,
            capture.manifest_url,
            Some(capture.page),
        ));
        self.insert(session.clone()).await;
        Ok(session)
    }

    /// Registers a session straight from a known manifest URL, skipping the
    /// browser entirely.
    pub async fn create_from_cache(
        &self,
        manifest_url: &str,
        kind: SourceKind,
        id: &str,
        season: Option<u32>,
        episode: Option<u32>,
        source_url_override: Option<String>,
    ) -> SessionResult<Arc<CaptureSession>> {
        let source_url = match source_url_override {
            Some(url) => url,
            None => self.source_url(kind, id, season, episode)?,
        };
        let session = Arc::new(CaptureSession::new(
            source_url,
            manifest_url.to_string(),
            None,
        ));
        self.insert(session.clone()).await;
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<CaptureSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Cookie header for a session against a target URL; see
    /// [`CaptureSession::cookie_header`].
    pub async fn cookie_header(&self, session_id: &str, target: &Url) -> Option<String> {
        let session = self.get(session_id).await?;
        session.cookie_header(target).await
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn insert(&self, session: Arc<CaptureSession>) {
        info!(
            session = %session.id(),
            source = %session.source_url(),
            browser_backed = session.has_page(),
            "registered capture session"
        );
        self.sessions
            .write()
            .await
            .insert(session.id().to_string(), session);
    }
}

fn expand_template(
    template: &str,
    id: &str,
    season: Option<u32>,
    episode: Option<u32>,
) -> SessionResult<String> {
    let mut expanded = template.replace("{id}", id);
    if expanded.contains("{season}") {
        let season = season.ok_or_else(|| {
            SessionError::Template("template requires a season number".into())
        })?;
        expanded = expanded.replace("{season}", &season.to_string());
    }
    if expanded.contains("{episode}") {
        let episode = episode.ok_or_else(|| {
            SessionError::Template("template requires an episode number".into())
        })?;
        expanded = expanded.replace("{episode}", &episode.to_string());
    }
    Ok(expanded)
}
