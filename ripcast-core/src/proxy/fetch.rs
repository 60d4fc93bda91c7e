use reqwest::header::{COOKIE, RANGE};
use reqwest::{Client, Response};
use tracing::debug;
use url::Url;

use crate::config::IdentitySection;
use crate::session::CaptureSession;

use super::error::ProxyResult;
use super::headers::{advance_on, tier_headers, AcceptProfile, FALLBACK_TIERS};

/// Final word from the upstream after the header cascade ran its course.
#[derive(Debug)]
pub enum UpstreamOutcome {
    /// A response that is not a tier rejection: success, partial content, or
    /// a failure the cascade never advances past.
    Delivered(Response),
    /// Every tier was rejected with 401/403/405.
    TiersExhausted { status: u16 },
}

/// Fetches upstream resources under the session's trust context. Both the
/// manifest and the segment paths go through here so the tier ordering and
/// the advance predicate live in exactly one place.
#[derive(Debug, Clone)]
pub struct UpstreamFetcher {
    client: Client,
}

impl UpstreamFetcher {
    pub fn new(identity: &IdentitySection) -> ProxyResult<Self> {
        let client = Client::builder()
            .user_agent(identity.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    pub async fn fetch(
        &self,
        session: &CaptureSession,
        target: &Url,
        accept: AcceptProfile,
        range: Option<&str>,
    ) -> ProxyResult<UpstreamOutcome> {
        let source = Url::parse(session.source_url())?;
        let cookie = session.cookie_header(target).await;

        let mut last_status = 0u16;
        for tier in FALLBACK_TIERS {
            let mut request = self.client.get(target.clone());
            for (name, value) in tier_headers(tier, accept, &source, target) {
                request = request.header(name, value);
            }
            if let Some(range) = range {
                request = request.header(RANGE, range);
            }
            if let Some(cookie) = &cookie {
                request = request.header(COOKIE, cookie);
            }

            let response = request.send().await?;
            let status = response.status();
            if !advance_on(status) {
                return Ok(UpstreamOutcome::Delivered(response));
            }
            debug!(
                tier = ?tier,
                status = status.as_u16(),
                url = %target,
                "header tier rejected upstream, advancing"
            );
            last_status = status.as_u16();
        }
        Ok(UpstreamOutcome::TiersExhausted {
            status: last_status,
        })
    }
}
