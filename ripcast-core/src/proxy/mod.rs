mod error;
mod fetch;
mod headers;
mod manifest;
mod rewrite;
mod segment;

pub use error::{ProxyError, ProxyResult};
pub use fetch::{UpstreamFetcher, UpstreamOutcome};
pub use headers::{AcceptProfile, HeaderTier};
pub use manifest::{ManifestService, RewrittenPlaylist, HLS_CONTENT_TYPE};
pub use rewrite::{rewrite_playlist, RewriteRoutes};
pub use segment::{SegmentRelay, SegmentService, MEDIA_TRANSPORT_TYPE};
