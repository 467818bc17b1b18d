//! # demosync-sources
//!
//! Concrete upstream collaborators for `demosync-sync`: history-page
//! scraping, the share-code Web API, replay downloads over HTTP and the
//! game-coordinator bridge socket.

pub mod blob;
#[cfg(unix)]
pub mod bridge;
pub mod error;
pub mod gcpd;
pub mod http;
pub mod webapi;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use demosync_core::{AccountKey, Config, Secret};
use demosync_sync::{CheckpointStore, EngineOptions, SyncEngine};

pub use blob::HttpBlobSource;
pub use error::SourcesError;
pub use gcpd::GcpdPageSource;
pub use webapi::WebApiChain;

/// Wire a [`SyncEngine`] with every collaborator the config enables.
///
/// History scraping is enabled when any account has a GCPD cookie, the chain
/// when any account has an auth code, sessions when a bridge socket is set.
pub fn engine_from_config(
    config: &Config,
    home: &Path,
    store: Arc<CheckpointStore>,
) -> Result<SyncEngine, SourcesError> {
    let client = http::client()?;
    let options = EngineOptions::from_config(config, home);
    let mut engine = SyncEngine::new(store, Arc::new(HttpBlobSource::new(client.clone())), options);

    let cookies: HashMap<AccountKey, Secret> = config
        .accounts
        .iter()
        .filter_map(|a| a.gcpd.as_ref().map(|g| (a.key(), g.cookie.clone())))
        .collect();
    if !cookies.is_empty() {
        engine = engine.with_pages(Arc::new(GcpdPageSource::new(client.clone(), cookies)));
    }

    let auth_codes: HashMap<AccountKey, Secret> = config
        .accounts
        .iter()
        .filter_map(|a| a.share_code.as_ref().map(|s| (a.key(), s.auth_code.clone())))
        .collect();
    if !auth_codes.is_empty() {
        let api_key = config
            .steam_api_key
            .clone()
            .ok_or(SourcesError::MissingApiKey)?;
        engine = engine.with_chain(Arc::new(WebApiChain::new(client, api_key, auth_codes)));
    }

    if let Some(socket) = &config.session_bridge {
        engine = with_bridge(engine, socket)?;
    }
    Ok(engine)
}

#[cfg(unix)]
fn with_bridge(engine: SyncEngine, socket: &Path) -> Result<SyncEngine, SourcesError> {
    Ok(engine.with_sessions(Arc::new(bridge::BridgeSessionProvider::new(socket))))
}

#[cfg(not(unix))]
fn with_bridge(_engine: SyncEngine, socket: &Path) -> Result<SyncEngine, SourcesError> {
    Err(SourcesError::BridgeUnsupported(socket.to_path_buf()))
}
