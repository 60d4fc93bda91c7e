use thiserror::Error;

use crate::browser::BrowserError;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("browser capture failed: {0}")]
    Capture(#[from] BrowserError),
    #[error("source template error: {0}")]
    Template(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}
