//! Share-code chain walker.
//!
//! Each call to the chain API trades a known code for the next newer one.
//! Calls are serialized and spaced by one [`IntervalGate`] shared by every
//! account in the process.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::Mutex;

use demosync_core::{AccountKey, MatchId, ShareCode};

use crate::error::SourceError;
use crate::source::{ChainApi, ChainStep};

/// Single-slot gate: at most one call in flight, and consecutive calls start
/// at least `spacing` apart.
pub struct IntervalGate {
    slot: Mutex<()>,
    limiter: DefaultDirectRateLimiter,
    spacing: Duration,
}

impl IntervalGate {
    pub fn new(spacing: Duration) -> Self {
        let quota = Quota::with_period(spacing).unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
        Self {
            slot: Mutex::new(()),
            limiter: RateLimiter::direct(quota),
            spacing,
        }
    }

    /// Wait for the slot and the spacing, then run `call` while holding the slot.
    pub async fn run<F, T>(&self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        let _slot = self.slot.lock().await;
        self.limiter.until_ready().await;
        call.await
    }
}

impl std::fmt::Debug for IntervalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalGate")
            .field("spacing", &self.spacing)
            .finish_non_exhaustive()
    }
}

/// One step of the chain, through the gate.
pub async fn next_link(
    api: &dyn ChainApi,
    gate: &IntervalGate,
    account: &AccountKey,
    code: &ShareCode,
) -> Result<ChainStep, SourceError> {
    gate.run(api.next_code(account, code)).await
}

/// A decoded chain code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub code: ShareCode,
    pub id: MatchId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainWalk {
    /// Codes newer than the start, oldest first.
    pub links: Vec<ChainLink>,
    /// The walk reached the terminal marker.
    pub terminal: bool,
    /// The walk ended on a code it could not use.
    pub malformed: bool,
}

/// Follow the chain from `start` (exclusive) until the terminal marker.
///
/// An API error or an unusable code ends the walk early; the links collected
/// so far are still a valid prefix.
pub async fn walk(
    api: &dyn ChainApi,
    gate: &IntervalGate,
    account: &AccountKey,
    start: &ShareCode,
) -> ChainWalk {
    let mut walk = ChainWalk::default();
    let mut current = start.clone();
    let mut last_id = start.match_id().ok();

    loop {
        let raw = match next_link(api, gate, account, &current).await {
            Ok(ChainStep::Terminal) => {
                walk.terminal = true;
                break;
            }
            Ok(ChainStep::Next(raw)) => raw,
            Err(error) => {
                tracing::warn!(account = %account, %error, "chain API failed; keeping prefix");
                break;
            }
        };

        let link = ShareCode::parse(&raw).and_then(|code| {
            let id = code.match_id()?;
            Ok(ChainLink { code, id })
        });
        let link = match link {
            Ok(link) if last_id.map_or(true, |last| link.id > last) => link,
            Ok(link) => {
                tracing::warn!(account = %account, match_id = %link.id, "chain went backwards; ending walk");
                walk.malformed = true;
                break;
            }
            Err(error) => {
                tracing::warn!(account = %account, code = %raw, %error, "undecodable share code; ending walk");
                walk.malformed = true;
                break;
            }
        };

        tracing::debug!(account = %account, match_id = %link.id, "chain link");
        last_id = Some(link.id);
        current = link.code.clone();
        walk.links.push(link);
    }
    walk
}
