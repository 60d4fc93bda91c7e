use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::session::SessionRegistry;

use super::error::{ProxyError, ProxyResult};
use super::fetch::{UpstreamFetcher, UpstreamOutcome};
use super::headers::AcceptProfile;
use super::rewrite::{rewrite_playlist, RewriteRoutes};

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Debug, Clone)]
pub struct RewrittenPlaylist {
    pub body: String,
    pub content_type: &'static str,
}

/// Retrieves a session's manifest and routes every reference inside it back
/// through the proxy.
#[derive(Debug, Clone)]
pub struct ManifestService {
    registry: Arc<SessionRegistry>,
    fetcher: Arc<UpstreamFetcher>,
    routes: RewriteRoutes,
}

impl ManifestService {
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

    pub async fn playlist(&self, session_id: &str) -> ProxyResult<RewrittenPlaylist> {
        let session = self
            .registry
            .get(session_id)
            .await
            .ok_or_else(|| ProxyError::SessionNotFound(session_id.to_string()))?;
        let manifest_url = Url::parse(session.manifest_url())?;

        let outcome = self
            .fetcher
            .fetch(&session, &manifest_url, AcceptProfile::Manifest, None)
            .await?;
        let response = match outcome {
            UpstreamOutcome::Delivered(response) if response.status().is_success() => response,
            UpstreamOutcome::Delivered(response) => {
                return Err(ProxyError::UpstreamManifest {
                    status: response.status().as_u16(),
                });
            }
            UpstreamOutcome::TiersExhausted { status } => {
                return Err(ProxyError::UpstreamManifest { status });
            }
        };

        // Redirects may have moved the playlist; relative references resolve
        // against wherever it actually came from.
        let base = response.url().clone();
        let body = response.text().await?;
        let rewritten = rewrite_playlist(&body, &base, session.id(), &self.routes);
        info!(
            session = %session.id(),
            bytes = rewritten.len(),
            "served rewritten manifest"
        );
        Ok(RewrittenPlaylist {
            body: rewritten,
            content_type: HLS_CONTENT_TYPE,
        })
    }
}
