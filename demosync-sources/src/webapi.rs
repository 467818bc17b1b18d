//! Share-code chain via `ICSGOPlayers_730/GetNextMatchSharingCode`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use demosync_core::{AccountKey, Secret, ShareCode};
use demosync_sync::{ChainApi, ChainStep, SourceError};

use crate::http::network;

pub const DEFAULT_BASE_URL: &str = "https://api.steampowered.com";

const ENDPOINT: &str = "/ICSGOPlayers_730/GetNextMatchSharingCode/v1";

/// Value of `nextcode` once the chain has no newer match.
const NO_NEXT_CODE: &str = "n/a";

#[derive(Debug, Deserialize)]
struct Envelope {
    result: NextCode,
}

#[derive(Debug, Deserialize)]
struct NextCode {
    nextcode: String,
}

/// Map one API response to a chain step.
///
/// 202 Accepted means the requested code is the newest known one.
pub fn interpret(status: u16, body: &str) -> Result<ChainStep, SourceError> {
    match status {
        202 => return Ok(ChainStep::Terminal),
        200 => {}
        other => {
            return Err(SourceError::Status {
                status: other,
                url: ENDPOINT.to_string(),
            })
        }
    }
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| SourceError::Protocol(format!("next code response: {e}")))?;
    let next = envelope.result.nextcode.trim();
    if next.is_empty() || next.eq_ignore_ascii_case(NO_NEXT_CODE) {
        Ok(ChainStep::Terminal)
    } else {
        Ok(ChainStep::Next(next.to_string()))
    }
}

pub struct WebApiChain {
    client: reqwest::Client,
    base_url: String,
    api_key: Secret,
    auth_codes: HashMap<AccountKey, Secret>,
}

impl WebApiChain {
    pub fn new(
        client: reqwest::Client,
        api_key: Secret,
        auth_codes: HashMap<AccountKey, Secret>,
    ) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL, api_key, auth_codes)
    }

    pub fn with_base_url(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Secret,
        auth_codes: HashMap<AccountKey, Secret>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            auth_codes,
        }
    }
}

#[async_trait]
impl ChainApi for WebApiChain {
    async fn next_code(
        &self,
        account: &AccountKey,
        known: &ShareCode,
    ) -> Result<ChainStep, SourceError> {
        let auth = self
            .auth_codes
            .get(account)
            .ok_or_else(|| SourceError::MissingCredentials(account.to_string()))?;
        let response = self
            .client
            .get(format!("{}{ENDPOINT}", self.base_url))
            .query(&[
                ("key", self.api_key.expose()),
                ("steamid", account.0.as_str()),
                ("steamidkey", auth.expose()),
                ("knowncode", known.as_str()),
            ])
            .send()
            .await
            .map_err(network)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(network)?;
        let step = interpret(status, &body)?;
        tracing::debug!(account = %account, known = %known, ?step, "chain step");
        Ok(step)
    }
}
