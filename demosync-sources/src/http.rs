//! Shared reqwest client and error mapping.

use std::time::Duration;

use demosync_sync::SourceError;

use crate::error::SourcesError;

/// Browser-like agent; the history pages reject unknown clients.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Client shared by every HTTP collaborator. No overall request timeout:
/// replay bodies can take minutes.
pub fn client() -> Result<reqwest::Client, SourcesError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(SourcesError::Client)
}

/// Map a transport failure, dropping the URL (it may carry credentials).
pub(crate) fn network(err: reqwest::Error) -> SourceError {
    SourceError::Network(err.without_url().to_string())
}

/// Reject non-2xx responses. `label` names the endpoint without secrets.
pub(crate) fn check_status(
    response: reqwest::Response,
    label: &str,
) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SourceError::Status {
            status: status.as_u16(),
            url: label.to_string(),
        })
    }
}
