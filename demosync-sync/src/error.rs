//! Error types for demosync-sync.

use std::path::PathBuf;

use thiserror::Error;

/// Failure talking to one of the upstream sources (pages, chain API, replay
/// servers). Always surfaced per item; never retried within a run.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The response arrived but could not be understood.
    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("no credentials configured for account {0}")]
    MissingCredentials(String),
}

/// Failure of the game-coordinator session itself.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("session connect failed: {0}")]
    Connect(String),

    #[error("session closed")]
    Closed,

    #[error("session protocol error: {0}")]
    Protocol(String),
}

/// Checkpoint store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("token '{token}' has no ordinal in stream {stream}")]
    Unordered { stream: String, token: String },
}

/// Per-descriptor download failure. Never aborts sibling downloads.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] SourceError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that end a whole account run. Everything else is per item.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("checkpoint store error: {0}")]
    Store(#[from] StoreError),

    #[error("account '{0}' is not configured")]
    UnknownAccount(String),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`DownloadError::Io`].
pub(crate) fn download_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DownloadError {
    DownloadError::Io {
        path: path.into(),
        source,
    }
}
