//! Error types for the parget engine

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the download engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid download url: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("unable to build http client: {0}")]
    RequestInit(#[source] reqwest::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from origin")]
    UnexpectedStatus { status: u16 },

    #[error("origin did not return Content-Length")]
    MissingContentLength,

    #[error("invalid Content-Length header: {0}")]
    InvalidContentLength(String),

    #[error("error reading response body: {0}")]
    Read(#[source] reqwest::Error),

    #[error("response body ended early: expected {expected} bytes, received {received}")]
    ShortBody { received: u64, expected: u64 },

    #[error("unable to write to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to create file {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to open file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to preallocate {path}: {source}")]
    Truncate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("segment file missing: {path}")]
    SegmentFileMissing { path: PathBuf },

    #[error("destination file missing: {path}")]
    DestinationFileMissing { path: PathBuf },

    #[error("merge failed: {0}")]
    Merge(#[source] std::io::Error),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("download was cancelled")]
    Cancelled,

    #[error("download deadline exceeded")]
    DeadlineExceeded,
}

/// Keep the first meaningful error in `slot`; a bare cancellation only
/// wins when nothing better showed up.
pub(crate) fn record_first(slot: &mut Option<EngineError>, err: EngineError) {
    match slot {
        None => *slot = Some(err),
        Some(EngineError::Cancelled) if !matches!(err, EngineError::Cancelled) => {
            *slot = Some(err)
        }
        Some(_) => {}
    }
}
