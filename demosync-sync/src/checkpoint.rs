//! Checkpoint store: per-(stream, account) progress tokens.
//!
//! Persists one `CheckpointDocument` JSON at `<state_dir>/store.json`.
//! Every write is a read-modify-write under an async mutex and lands via
//! `<file>.tmp` + rename, so readers never observe a partial document.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use demosync_core::{AccountKey, MatchId, ShareCode, StreamKind};

use crate::error::{io_err, StoreError};

pub const STORE_FILE: &str = "store.json";

/// Namespace → account → token.
pub type Namespace = BTreeMap<AccountKey, String>;

/// On-disk checkpoint payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CheckpointDocument {
    #[serde(default)]
    pub pagination_watermark: Namespace,
    #[serde(default)]
    pub chain_code: Namespace,
    #[serde(default)]
    pub session_refresh_token: Namespace,
}

impl CheckpointDocument {
    pub fn namespace(&self, stream: StreamKind) -> &Namespace {
        match stream {
            StreamKind::PaginationWatermark => &self.pagination_watermark,
            StreamKind::ChainCode => &self.chain_code,
            StreamKind::SessionRefreshToken => &self.session_refresh_token,
        }
    }

    fn namespace_mut(&mut self, stream: StreamKind) -> &mut Namespace {
        match stream {
            StreamKind::PaginationWatermark => &mut self.pagination_watermark,
            StreamKind::ChainCode => &mut self.chain_code,
            StreamKind::SessionRefreshToken => &mut self.session_refresh_token,
        }
    }

    pub fn get(&self, stream: StreamKind, account: &AccountKey) -> Option<&str> {
        self.namespace(stream).get(account).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        StreamKind::all()
            .iter()
            .all(|stream| self.namespace(*stream).is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DocumentCompat {
    Current(CheckpointDocument),
    Legacy(LegacyDocument),
}

/// Layout written by earlier tooling: one flat map per key, keyed by account.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDocument {
    #[serde(default, alias = "lastCodeDemoId")]
    last_share_code: Namespace,
    #[serde(default)]
    refresh_token: Namespace,
}

impl From<LegacyDocument> for CheckpointDocument {
    fn from(legacy: LegacyDocument) -> Self {
        Self {
            pagination_watermark: Namespace::new(),
            chain_code: legacy.last_share_code,
            session_refresh_token: legacy.refresh_token,
        }
    }
}

/// Ordinal of `token` within `stream`, if the stream is ordered and the
/// token is well formed.
pub fn token_ordinal(stream: StreamKind, token: &str) -> Option<MatchId> {
    match stream {
        StreamKind::PaginationWatermark => token.parse().ok(),
        StreamKind::ChainCode => ShareCode::parse(token).ok()?.match_id().ok(),
        StreamKind::SessionRefreshToken => None,
    }
}

/// Highest id the checkpoint may move to: the largest of `current` and the
/// succeeded ids that lies strictly below the smallest failed id.
///
/// Returns `Some` only when that id is strictly greater than `current`.
pub fn next_checkpoint(
    current: Option<MatchId>,
    succeeded: &BTreeSet<MatchId>,
    failed: &BTreeSet<MatchId>,
) -> Option<MatchId> {
    let ceiling = failed.first().copied();
    let best = succeeded
        .iter()
        .copied()
        .chain(current)
        .filter(|id| ceiling.map_or(true, |c| *id < c))
        .max()?;
    match current {
        Some(c) if best <= c => None,
        _ => Some(best),
    }
}

/// Path to the checkpoint document inside `state_dir`.
pub fn store_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STORE_FILE)
}

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(state_dir: &Path) -> Self {
        Self::at(store_path(state_dir))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored token for `(stream, account)`, if any.
    pub async fn get(
        &self,
        stream: StreamKind,
        account: &AccountKey,
    ) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        let doc = self.load().await?;
        Ok(doc.get(stream, account).map(str::to_owned))
    }

    /// Raw overwrite. Callers that need monotonicity use [`Self::advance`].
    pub async fn set(
        &self,
        stream: StreamKind,
        account: &AccountKey,
        token: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        doc.namespace_mut(stream)
            .insert(account.clone(), token.to_owned());
        self.save(&doc).await
    }

    /// Write `token` only if its ordinal is strictly greater than the stored
    /// one. Returns whether the document changed.
    pub async fn advance(
        &self,
        stream: StreamKind,
        account: &AccountKey,
        token: &str,
    ) -> Result<bool, StoreError> {
        let candidate = token_ordinal(stream, token).ok_or_else(|| StoreError::Unordered {
            stream: stream.to_string(),
            token: token.to_owned(),
        })?;

        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        if let Some(stored) = doc.get(stream, account) {
            match token_ordinal(stream, stored) {
                Some(current) if candidate <= current => {
                    tracing::debug!(
                        stream = %stream,
                        account = %account,
                        stored = %current,
                        candidate = %candidate,
                        "checkpoint not advanced"
                    );
                    return Ok(false);
                }
                Some(_) => {}
                None => tracing::warn!(
                    stream = %stream,
                    account = %account,
                    stored,
                    "stored checkpoint has no ordinal; replacing it"
                ),
            }
        }

        doc.namespace_mut(stream)
            .insert(account.clone(), token.to_owned());
        self.save(&doc).await?;
        tracing::info!(stream = %stream, account = %account, checkpoint = %candidate, "checkpoint advanced");
        Ok(true)
    }

    /// The whole document, for inspection tooling.
    pub async fn snapshot(&self) -> Result<CheckpointDocument, StoreError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Missing document → empty. An unreadable one is moved aside to
    /// `<file>.corrupt` and treated as empty.
    async fn load(&self) -> Result<CheckpointDocument, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CheckpointDocument::default())
            }
            Err(e) => return Err(io_err(&self.path, e)),
        };

        match serde_json::from_str::<DocumentCompat>(&contents) {
            Ok(DocumentCompat::Current(doc)) => Ok(doc),
            Ok(DocumentCompat::Legacy(legacy)) => {
                tracing::info!(path = %self.path.display(), "reading legacy checkpoint document");
                Ok(legacy.into())
            }
            Err(error) => {
                let aside = self.path.with_extension("json.corrupt");
                tracing::warn!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    %error,
                    "checkpoint document unreadable; starting empty"
                );
                tokio::fs::rename(&self.path, &aside)
                    .await
                    .map_err(|e| io_err(&aside, e))?;
                Ok(CheckpointDocument::default())
            }
        }
    }

    async fn save(&self, doc: &CheckpointDocument) -> Result<(), StoreError> {
        let Some(dir) = self.path.parent() else {
            return Err(io_err(
                &self.path,
                std::io::Error::other("invalid checkpoint store path"),
            ));
        };
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_err(dir, e))?;

        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}
