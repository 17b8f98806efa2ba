//! Typed error taxonomy for the engine, mapped onto wire error codes.
//!
//! Library code returns [`Error`]; the daemon converts it to a wire `code`
//! (§6.3 of the design doc). CLI glue keeps using `anyhow` at the boundary,
//! same split the rest of this codebase uses between core and front-end.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error at {path}: {message}")]
    Configuration { path: String, message: String },

    #[error("ingest failed: {0}")]
    Ingest(String),

    #[error("embedding failed: {0}")]
    EmbedFailed(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("index is busy (ingest in progress): {0}")]
    IndexBusy(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("malformed protocol frame: {0}")]
    Protocol(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wire error code per §6.3.
    pub fn code(&self) -> &'static str {
        match self {
            Error::IndexNotFound(_) => "INDEX_NOT_FOUND",
            Error::QueryFailed(_) => "QUERY_FAILED",
            Error::InvalidRequest(_) | Error::Protocol(_) => "INVALID_REQUEST",
            Error::IndexBusy(_) => "INDEX_BUSY",
            Error::RateLimited => "RATE_LIMITED",
            Error::EmbedFailed(_) => "EMBED_FAILED",
            Error::Timeout => "TIMEOUT",
            Error::Configuration { .. } | Error::Ingest(_) | Error::Fatal(_) | Error::Io(_) => {
                "QUERY_FAILED"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
