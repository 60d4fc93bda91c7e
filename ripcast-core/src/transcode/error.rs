use std::path::PathBuf;

use thiserror::Error;

pub type TranscodeResult<T> = Result<T, TranscodeError>;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("unknown stream {0}")]
    UnknownStream(String),
    #[error("encoder spawn failed for {id}: {source}")]
    Spawn {
        id: String,
        source: std::io::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("adaptive ladder requires at least one quality tier")]
    EmptyLadder,
}
