use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::engine::BrowserEngine;
use super::error::{BrowserError, BrowserResult};

/// Outcome of a successful page capture. The page stays open so the session
/// that takes ownership can read live cookies from it later.
#[derive(Debug)]
pub struct PageCapture {
    pub page: Page,
    pub manifest_url: String,
}

impl BrowserEngine {
    /// Renders `source_url` long enough to observe the real manifest URL.
    ///
    /// Every outgoing request and incoming response is inspected during the
    /// settle window; if nothing manifest-shaped shows up the injected
    /// network hook and finally the rendered HTML are scanned before giving
    /// up with `CaptureTimeout`.
    pub async fn capture_page(&self, source_url: &str) -> BrowserResult<PageCapture> {
        let page = self.new_page().await?;

        let request_events = page.event_listener::<EventRequestWillBeSent>().await?;
        let response_events = page.event_listener::<EventResponseReceived>().await?;
        let (tx, mut rx) = mpsc::channel::<String>(16);

        let pattern = self.manifest_pattern().cloned();
        let request_task = {
            let tx = tx.clone();
            let pattern = pattern.clone();
            tokio::spawn(async move {
                let mut events = request_events;
                while let Some(event) = events.next().await {
                    let url = event.request.url.clone();
                    if is_manifest_url(&url, pattern.as_ref()) {
                        let _ = tx.send(url).await;
                    }
                }
            })
        };
        let response_task = {
            let pattern = pattern.clone();
            tokio::spawn(async move {
                let mut events = response_events;
                while let Some(event) = events.next().await {
                    let url = event.response.url.clone();
                    let mime = event.response.mime_type.to_ascii_lowercase();
                    if mime.contains("mpegurl") || is_manifest_url(&url, pattern.as_ref()) {
                        let _ = tx.send(url).await;
                    }
                }
            })
        };

        let navigation = self.navigate_and_observe(&page, source_url, &mut rx).await;
        request_task.abort();
        response_task.abort();

        match navigation {
            Ok(Some(manifest_url)) => {
                info!(source = %source_url, manifest = %manifest_url, "captured manifest url");
                Ok(PageCapture { page, manifest_url })
            }
            Ok(None) => {
                warn!(source = %source_url, "settle window elapsed without manifest");
                let _ = page.close().await;
                Err(BrowserError::CaptureTimeout(source_url.to_string()))
            }
            Err(err) => {
                let _ = page.close().await;
                Err(err)
            }
        }
    }

    async fn navigate_and_observe(
        &self,
        page: &Page,
        source_url: &str,
        rx: &mut mpsc::Receiver<String>,
    ) -> BrowserResult<Option<String>> {
        let params = NavigateParams::builder()
            .url(source_url)
            .build()
            .map_err(BrowserError::Configuration)?;
        page.goto(params).await?;
        if let Err(err) = page.wait_for_navigation().await {
            debug!(error = %err, "navigation wait ended early");
        }

        self.press_play(page).await;

        let settle = Duration::from_secs(self.config().capture.settle_seconds);
        if let Ok(Some(url)) = timeout(settle, rx.recv()).await {
            return Ok(Some(url));
        }

        // Nothing seen on the wire; harvest the in-page hook, then the HTML.
        if let Some(url) = self.harvest_hook(page).await {
            return Ok(Some(url));
        }
        self.scan_rendered_html(page).await
    }

    /// Fires the configured play-control selectors against the main document
    /// and, through a script, every same-origin frame. All failures are
    /// swallowed: a missing control on one host is expected on another.
    async fn press_play(&self, page: &Page) {
        for selector in &self.config().capture.play_selectors {
            if let Ok(element) = page.find_element(selector.clone()).await {
                if element.click().await.is_ok() {
                    debug!(selector = %selector, "clicked play control");
                    sleep(Duration::from_millis(150)).await;
                }
            }
        }

        let selectors = match serde_json::to_string(&self.config().capture.play_selectors) {
            Ok(json) => json,
            Err(_) => return,
        };
        let script = format!(
            r#"(() => {{
    const selectors = {selectors};
    const fire = (doc) => {{
        let hits = 0;
        selectors.forEach((sel) => {{
            doc.querySelectorAll(sel).forEach((el) => {{
                try {{ el.click(); hits += 1; }} catch (_) {{}}
            }});
        }});
        return hits;
    }};
    let clicks = fire(document);
    document.querySelectorAll('iframe').forEach((frame) => {{
        try {{
            if (frame.contentDocument) {{
                clicks += fire(frame.contentDocument);
            }}
        }} catch (_) {{}}
    }});
    return clicks;
}})()"#
        );
        match page.evaluate(script.as_str()).await {
            Ok(result) => {
                if let Ok(clicks) = result.into_value::<u32>() {
                    debug!(clicks, "dispatched play clicks across frames");
                }
            }
            Err(err) => debug!(error = %err, "frame click sweep failed"),
        }
    }

    async fn harvest_hook(&self, page: &Page) -> Option<String> {
        let payload: Vec<HookedRequest> = page
            .evaluate(HOOK_HARVEST_SCRIPT)
            .await
            .ok()?
            .into_value()
            .ok()?;
        payload
            .into_iter()
            .map(|entry| entry.url)
            .find(|url| is_manifest_url(url, self.manifest_pattern()))
    }

    async fn scan_rendered_html(&self, page: &Page) -> BrowserResult<Option<String>> {
        let html = page.content().await?;
        let pattern = Regex::new(r#"https?://[^\s"'<>\\]+\.m3u8[^\s"'<>\\]*"#)
            .map_err(|err| BrowserError::Unexpected(err.to_string()))?;
        Ok(pattern.find(&html).map(|m| m.as_str().to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct HookedRequest {
    url: String,
}

const HOOK_HARVEST_SCRIPT: &str = r#"
(() => {
    return Array.from(window.__ripcastRequests || []).map((entry) => ({ url: String(entry.url || '') }));
})()
"#;

fn is_manifest_url(url: &str, pattern: Option<&Regex>) -> bool {
    if let Some(pattern) = pattern {
        return pattern.is_match(url);
    }
    let without_fragment = url.split('#').next().unwrap_or(url);
    match without_fragment.split_once('?') {
        Some((path, _)) => path.ends_with(".m3u8"),
        None => without_fragment.ends_with(".m3u8"),
    }
}
