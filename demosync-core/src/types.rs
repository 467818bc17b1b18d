//! Domain types shared by every demosync crate.
//!
//! Identifiers are newtypes; never bare `u64`/`String` across crate boundaries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Key identifying one account's streams: its SteamID64 in decimal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountKey(pub String);

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AccountKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AccountKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Game-coordinator match id. Later matches have larger ids.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MatchId(pub u64);

impl MatchId {
    /// Zero-padded form used by the replay servers (`003638895521671676017`).
    pub fn padded(&self) -> String {
        format!("{:021}", self.0)
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for MatchId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl FromStr for MatchId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

/// A configuration value that must never reach the logs.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Match-history category. Each one is scanned as an independent page stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Premier,
    Competitive,
    Wingman,
}

impl Category {
    pub fn all() -> &'static [Category] {
        &[Category::Premier, Category::Competitive, Category::Wingman]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Premier => "premier",
            Category::Competitive => "competitive",
            Category::Wingman => "wingman",
        }
    }

    /// GCPD tab query value for this category.
    pub fn tab(&self) -> &'static str {
        match self {
            Category::Premier => "matchhistorypremier",
            Category::Competitive => "matchhistorycompetitive",
            Category::Wingman => "matchhistorywingman",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "premier" => Ok(Category::Premier),
            "competitive" => Ok(Category::Competitive),
            "wingman" => Ok(Category::Wingman),
            other => Err(format!(
                "unknown category '{other}'; expected: premier, competitive, wingman"
            )),
        }
    }
}

/// Independently checkpointed stream kinds. Doubles as the checkpoint
/// document's namespace names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Highest match id confirmed from the paginated match history.
    PaginationWatermark,
    /// Last confirmed share code in the share-code chain.
    ChainCode,
    /// Session credential handed back by the game-coordinator bridge.
    SessionRefreshToken,
}

impl StreamKind {
    pub fn all() -> &'static [StreamKind] {
        &[
            StreamKind::PaginationWatermark,
            StreamKind::ChainCode,
            StreamKind::SessionRefreshToken,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::PaginationWatermark => "pagination_watermark",
            StreamKind::ChainCode => "chain_code",
            StreamKind::SessionRefreshToken => "session_refresh_token",
        }
    }

    /// Whether tokens in this namespace only ever move forward.
    pub fn is_ordered(&self) -> bool {
        !matches!(self, StreamKind::SessionRefreshToken)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "pagination_watermark" | "watermark" => Ok(StreamKind::PaginationWatermark),
            "chain_code" | "chain" => Ok(StreamKind::ChainCode),
            "session_refresh_token" | "refresh_token" => Ok(StreamKind::SessionRefreshToken),
            other => Err(format!(
                "unknown stream '{other}'; expected: pagination_watermark, chain_code, session_refresh_token"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// A discovered unit of work: one match and where to fetch its replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDescriptor {
    pub id: MatchId,
    pub played_at: DateTime<Utc>,
    /// Replay URL, usually a `.dem.bz2`.
    pub locator: String,
    pub category: Category,
    pub origin: StreamKind,
}
