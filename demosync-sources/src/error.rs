use std::path::PathBuf;

use thiserror::Error;

/// Errors building the concrete collaborators from config.
#[derive(Debug, Error)]
pub enum SourcesError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("steam_api_key is required for share-code accounts")]
    MissingApiKey,

    #[error("session bridge sockets are only supported on unix (configured: {0})")]
    BridgeUnsupported(PathBuf),
}
