use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unknown or expired session {0}")]
    SessionNotFound(String),
    #[error("upstream manifest fetch failed with status {status}")]
    UpstreamManifest { status: u16 },
    #[error("upstream segment fetch failed with status {status}")]
    UpstreamSegment { status: u16 },
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
