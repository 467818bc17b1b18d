use std::path::PathBuf;

use thiserror::Error;

/// Error surface for starting and running the scheduler.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] demosync_core::ConfigError),

    #[error("{0}")]
    Sources(#[from] demosync_sources::SourcesError),

    #[error("sync error: {0}")]
    Sync(#[from] demosync_sync::SyncError),

    #[error("signal handler failed: {0}")]
    Signal(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
