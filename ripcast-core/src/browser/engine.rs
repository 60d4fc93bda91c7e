use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::{seq::SliceRandom, Rng};
use regex::Regex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;

use super::error::{BrowserError, BrowserResult};
use super::fingerprint::FingerprintMasker;

#[derive(Debug, Clone)]
pub(crate) struct ViewportSpec {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

/// Owns the one shared Chromium instance. Launched lazily on the first page
/// request and reused by every capture afterwards.
#[derive(Debug)]
pub struct BrowserEngine {
    config: Arc<BrowserConfig>,
    fingerprint: Arc<FingerprintMasker>,
    manifest_pattern: Option<Regex>,
    shared: AsyncMutex<Option<SharedBrowser>>,
}

#[derive(Debug)]
struct SharedBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
    user_agent: String,
}

impl BrowserEngine {
    pub fn new(config: BrowserConfig) -> BrowserResult<Self> {
        let manifest_pattern = config
            .capture
            .manifest_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|err| BrowserError::Configuration(err.to_string()))?;
        let fingerprint = Arc::new(FingerprintMasker::new(config.fingerprint.clone()));
        Ok(Self {
            config: Arc::new(config),
            fingerprint,
            manifest_pattern,
            shared: AsyncMutex::new(None),
        })
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub(crate) fn manifest_pattern(&self) -> Option<&Regex> {
        self.manifest_pattern.as_ref()
    }

    /// Ensures the shared browser process is up.
    pub async fn launch(&self) -> BrowserResult<()> {
        let mut shared = self.shared.lock().await;
        if shared.is_none() {
            *shared = Some(self.launch_browser().await?);
        }
        Ok(())
    }

    /// Opens a fresh, fingerprint-masked page on the shared browser.
    pub(crate) async fn new_page(&self) -> BrowserResult<Page> {
        let mut shared = self.shared.lock().await;
        if shared.is_none() {
            *shared = Some(self.launch_browser().await?);
        }
        let Some(state) = shared.as_ref() else {
            return Err(BrowserError::Unexpected(
                "browser state missing after launch".into(),
            ));
        };
        let params = CreateTargetParams::new("about:blank");
        let page = state.browser.new_page(params).await?;
        let user_agent = state.user_agent.clone();
        drop(shared);
        self.configure_page(&page, &user_agent).await?;
        Ok(page)
    }

    pub async fn shutdown(&self) -> BrowserResult<()> {
        let Some(mut state) = self.shared.lock().await.take() else {
            return Ok(());
        };
        info!("shutting down shared chromium instance");
        if let Err(err) = state.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        state.handler_task.abort();
        Ok(())
    }

    async fn launch_browser(&self) -> BrowserResult<SharedBrowser> {
        let viewport = self.select_viewport();
        let user_agent = self.select_user_agent();
        let chromium_config = self.build_chromium_config(&viewport, &user_agent)?;
        info!(
            ua = %user_agent,
            width = viewport.width,
            height = viewport.height,
            headless = self.config.chromium.headless,
            "launching shared chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok(SharedBrowser {
            browser,
            handler_task,
            user_agent,
        })
    }

    fn select_viewport(&self) -> ViewportSpec {
        let section = &self.config.viewport;
        let mut rng = rand::thread_rng();
        let base = section
            .resolutions
            .choose(&mut rng)
            .cloned()
            .unwrap_or([1366, 768]);
        let jitter = section.jitter_pixels as i32;
        let width = (base[0] as i32 + rng.gen_range(-jitter..=jitter)).clamp(640, 2560) as u32;
        let height = (base[1] as i32 + rng.gen_range(-jitter..=jitter)).clamp(480, 1600) as u32;
        let scale = rng.gen_range(
            section.device_scale_factor[0]..=section.device_scale_factor[1],
        ) as f64;
        ViewportSpec {
            width,
            height,
            device_scale_factor: scale,
        }
    }

    fn select_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        if self.config.user_agents.pool.is_empty() {
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/605.1.15 (KHTML, like Gecko)"
                .to_string()
        } else {
            self.config
                .user_agents
                .pool
                .choose(&mut rng)
                .cloned()
                .unwrap_or_else(|| self.config.user_agents.pool[0].clone())
        }
    }

    fn build_chromium_config(
        &self,
        viewport: &ViewportSpec,
        user_agent: &str,
    ) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder()
            .chrome_executable(&self.config.chromium.executable_path)
            .viewport(ChromiumViewport {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor: Some(viewport.device_scale_factor),
                emulating_mobile: false,
                is_landscape: viewport.width >= viewport.height,
                has_touch: false,
            });

        if !self.config.chromium.headless {
            builder = builder.with_head();
        }
        if !self.config.chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.chromium.tab_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![
            format!("--user-agent={user_agent}"),
            format!("--window-size={},{}", viewport.width, viewport.height),
        ];

        if self.config.chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if self.config.flags.mute_audio {
            args.push("--mute-audio".into());
        }
        if !self.config.flags.autoplay_policy.is_empty() {
            args.push(format!(
                "--autoplay-policy={}",
                self.config.flags.autoplay_policy
            ));
        }
        if let Some(lang) = &self.config.flags.lang {
            args.push(format!("--lang={lang}"));
        }
        for feature in &self.config.flags.disable_blink_features {
            args.push(format!("--disable-blink-features={feature}"));
        }
        if self.config.flags.no_first_run {
            args.push("--no-first-run".into());
        }
        if self.config.flags.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".into());
        }
        if let Some(accept) = &self.config.flags.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        args.push("--disable-background-timer-throttling".into());
        args.push("--password-store=basic".into());

        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }

    async fn configure_page(&self, page: &Page, user_agent: &str) -> BrowserResult<()> {
        page.enable_stealth_mode_with_agent(user_agent).await?;

        let mut params_builder =
            SetUserAgentOverrideParams::builder().user_agent(user_agent.to_string());
        if let Some(accept) = &self.config.flags.accept_language {
            params_builder = params_builder.accept_language(accept.clone());
        }
        let params = params_builder
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;

        page.evaluate_on_new_document(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(NETWORK_HOOK.to_string())
                .build()
                .map_err(BrowserError::Configuration)?,
        )
        .await?;
        self.fingerprint.apply(page).await?;
        Ok(())
    }
}

/// Mirrors every fetch/XHR the page performs into a bucket the capture step
/// can harvest after the settle window, covering requests issued before the
/// CDP listeners were attached.
const NETWORK_HOOK: &str = r#"
(() => {
    const bucket = [];
    const push = (entry) => {
        try {
            bucket.push(entry);
        } catch (_) {
            // ignore
        }
    };
    Object.defineProperty(window, '__ripcastRequests', {
        value: bucket,
        writable: false,
        configurable: false,
    });

    const originalFetch = window.fetch;
    window.fetch = async (...args) => {
        const response = await originalFetch(...args);
        try {
            const request = args[0];
            const url = typeof request === 'string' ? request : request.url;
            push({ url: String(url || ''), type: 'fetch', status: response.status });
        } catch (_) {}
        return response;
    };

    const OriginalXHR = window.XMLHttpRequest;
    window.XMLHttpRequest = function() {
        const xhr = new OriginalXHR();
        let url = '';
        let method = 'GET';
        const open = xhr.open;
        xhr.open = function(m, u) {
            method = m || 'GET';
            url = u || '';
            return open.apply(xhr, arguments);
        };
        xhr.addEventListener('loadend', function() {
            push({ url: String(url || ''), type: 'xhr', status: xhr.status, method });
        });
        return xhr;
    };
})();
"#;
