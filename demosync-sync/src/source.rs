//! Upstream collaborators, as traits.
//!
//! The sync core only talks to these seams; concrete HTTP and socket
//! implementations live in `demosync-sources`, and tests plug in fakes.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use demosync_core::{AccountKey, Category, MatchDescriptor, MatchId, ShareCode, StreamKind};

use crate::error::{SessionError, SourceError};

// ---------------------------------------------------------------------------
// Page source
// ---------------------------------------------------------------------------

/// One unparsed entry of a match-history page.
///
/// `locator == None` is the structural end marker: a match without a replay
/// link means every older match lacks one too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub locator: Option<String>,
    pub played_at: Option<String>,
}

/// One fetched page, newest entry first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPage {
    pub items: Vec<RawItem>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(
        &self,
        account: &AccountKey,
        category: Category,
        cursor: Option<&str>,
    ) -> Result<RawPage, SourceError>;
}

// ---------------------------------------------------------------------------
// Chain API
// ---------------------------------------------------------------------------

/// Answer of the chain API for a known code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStep {
    /// The next code, as returned upstream. Not yet validated.
    Next(String),
    Terminal,
}

#[async_trait]
pub trait ChainApi: Send + Sync {
    async fn next_code(
        &self,
        account: &AccountKey,
        known: &ShareCode,
    ) -> Result<ChainStep, SourceError>;
}

// ---------------------------------------------------------------------------
// Session provider
// ---------------------------------------------------------------------------

/// Match metadata delivered by the game coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMatch {
    pub id: MatchId,
    /// Unix seconds.
    pub match_time: i64,
    #[serde(default)]
    pub replay_url: Option<String>,
    #[serde(default)]
    pub player_count: u32,
    #[serde(default)]
    pub switched_teams: bool,
}

impl ResolvedMatch {
    /// Two-versus-two lobbies are wingman; premier is the only mode that
    /// reports switched teams.
    pub fn category(&self) -> Category {
        if self.player_count > 0 && self.player_count <= 4 {
            Category::Wingman
        } else if self.switched_teams {
            Category::Premier
        } else {
            Category::Competitive
        }
    }

    /// `None` when the coordinator did not return a replay URL.
    pub fn into_descriptor(self) -> Option<MatchDescriptor> {
        let category = self.category();
        let played_at: DateTime<Utc> = Utc.timestamp_opt(self.match_time, 0).single()?;
        let locator = self.replay_url.filter(|url| !url.is_empty())?;
        Some(MatchDescriptor {
            id: self.id,
            played_at,
            locator,
            category,
            origin: StreamKind::ChainCode,
        })
    }
}

/// Push-style notifications from a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Ready,
    Result(ResolvedMatch),
    Quit,
    RefreshToken(String),
    Fault(String),
}

/// A connected session plus its event stream.
pub struct SessionHandle {
    pub session: Box<dyn Session>,
    pub events: mpsc::Receiver<SessionEvent>,
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn connect(
        &self,
        account: &AccountKey,
        refresh_token: Option<&str>,
    ) -> Result<SessionHandle, SessionError>;
}

/// Commands are fire-and-forget; outcomes arrive as [`SessionEvent`]s.
#[async_trait]
pub trait Session: Send + Sync {
    async fn activate(&self) -> Result<(), SessionError>;
    async fn submit(&self, code: &ShareCode) -> Result<(), SessionError>;
    async fn deactivate(&self) -> Result<(), SessionError>;
}

// ---------------------------------------------------------------------------
// Blob source
// ---------------------------------------------------------------------------

pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Open the raw (possibly compressed) replay stream behind `locator`.
    async fn open(&self, locator: &str) -> Result<BlobReader, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(player_count: u32, switched_teams: bool) -> ResolvedMatch {
        ResolvedMatch {
            id: MatchId(9),
            match_time: 1_696_000_000,
            replay_url: Some("http://replay1.valve.net/730/000000000000000000009_1.dem.bz2".into()),
            player_count,
            switched_teams,
        }
    }

    #[test]
    fn category_follows_lobby_shape() {
        assert_eq!(resolved(4, true).category(), Category::Wingman);
        assert_eq!(resolved(10, true).category(), Category::Premier);
        assert_eq!(resolved(10, false).category(), Category::Competitive);
        assert_eq!(resolved(0, false).category(), Category::Competitive);
    }

    #[test]
    fn descriptor_requires_replay_url() {
        let mut m = resolved(10, false);
        m.replay_url = None;
        assert!(m.into_descriptor().is_none());

        let d = resolved(10, false).into_descriptor().expect("descriptor");
        assert_eq!(d.id, MatchId(9));
        assert_eq!(d.origin, StreamKind::ChainCode);
        assert_eq!(d.played_at.timestamp(), 1_696_000_000);
    }
}
