//! Paginated match-history crawler.
//!
//! Pages arrive newest first. A category scan stops at the first item at or
//! below the account's lower bound, at the structural end marker, or at the
//! first item it cannot understand.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Semaphore;

use demosync_core::{AccountKey, Category, MatchDescriptor, MatchId, StreamKind};

use crate::error::SourceError;
use crate::source::{PageSource, RawItem};

const PLAYED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static REPLAY_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://replay\d+\.valve\.net/730/(\d+)_\d+\.dem\.bz2$").expect("static regex")
});

/// One page worth of discovered descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlPage {
    pub items: Vec<MatchDescriptor>,
    pub next: Option<String>,
    pub exhausted: bool,
    /// The scan ended on an item that could not be parsed.
    pub malformed: bool,
}

/// Result of crawling every category of one account.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub descriptors: Vec<MatchDescriptor>,
    /// False when any page fetch failed; the watermark must not move then.
    pub complete: bool,
    pub malformed_stops: usize,
}

enum Parsed {
    End,
    Malformed(&'static str),
    Match(MatchDescriptor),
}

/// Match id embedded in a replay URL of the form
/// `http(s)://replay<N>.valve.net/730/<match>_<reservation>.dem.bz2`.
pub fn replay_match_id(url: &str) -> Option<MatchId> {
    let caps = REPLAY_URL.captures(url)?;
    caps[1].parse::<u64>().ok().map(MatchId)
}

/// Parse `YYYY-MM-DD HH:MM:SS GMT`.
pub fn parse_played_at(text: &str) -> Option<DateTime<Utc>> {
    let naive = text.trim().strip_suffix(" GMT")?;
    NaiveDateTime::parse_from_str(naive, PLAYED_AT_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

fn parse_item(raw: RawItem, category: Category) -> Parsed {
    let Some(locator) = raw.locator else {
        return Parsed::End;
    };
    let Some(id) = replay_match_id(&locator) else {
        return Parsed::Malformed("unrecognised replay url");
    };
    let Some(played_at) = raw.played_at.as_deref().and_then(parse_played_at) else {
        return Parsed::Malformed("unrecognised match date");
    };
    Parsed::Match(MatchDescriptor {
        id,
        played_at,
        locator,
        category,
        origin: StreamKind::PaginationWatermark,
    })
}

/// Fetch and interpret one page of `category`.
pub async fn discover_page(
    source: &dyn PageSource,
    account: &AccountKey,
    category: Category,
    continuation: Option<&str>,
    lower_bound: Option<MatchId>,
) -> Result<CrawlPage, SourceError> {
    let raw = source.fetch_page(account, category, continuation).await?;
    let mut page = CrawlPage::default();

    for item in raw.items {
        match parse_item(item, category) {
            Parsed::End => {
                page.exhausted = true;
                return Ok(page);
            }
            Parsed::Malformed(reason) => {
                tracing::warn!(account = %account, category = %category, reason, "malformed history item; ending scan");
                page.exhausted = true;
                page.malformed = true;
                return Ok(page);
            }
            Parsed::Match(d) if lower_bound.is_some_and(|bound| d.id <= bound) => {
                page.exhausted = true;
                return Ok(page);
            }
            Parsed::Match(d) => page.items.push(d),
        }
    }

    match raw.cursor {
        Some(cursor) if raw.has_more => page.next = Some(cursor),
        _ => page.exhausted = true,
    }
    Ok(page)
}

/// Scan one category to exhaustion. Returns the descriptors, whether the
/// scan completed, and whether it ended on a malformed item.
async fn crawl_category(
    source: &dyn PageSource,
    account: &AccountKey,
    category: Category,
    lower_bound: Option<MatchId>,
) -> (Vec<MatchDescriptor>, bool, bool) {
    let mut found = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = match discover_page(source, account, category, cursor.as_deref(), lower_bound).await {
            Ok(page) => page,
            Err(error) => {
                tracing::warn!(account = %account, category = %category, %error, "page fetch failed; crawl incomplete");
                return (found, false, false);
            }
        };
        found.extend(page.items);
        if page.exhausted {
            return (found, true, page.malformed);
        }
        if page.next == cursor {
            tracing::warn!(account = %account, category = %category, "continuation did not move; ending scan");
            return (found, true, false);
        }
        cursor = page.next;
    }
}

/// Crawl `categories` concurrently, bounded by the shared `permits`.
pub async fn crawl(
    source: &dyn PageSource,
    account: &AccountKey,
    categories: &[Category],
    lower_bound: Option<MatchId>,
    permits: Arc<Semaphore>,
) -> CrawlOutcome {
    let scans = categories.iter().map(|category| {
        let permits = permits.clone();
        async move {
            let _permit = permits.acquire_owned().await;
            tracing::debug!(account = %account, category = %category, "scanning category");
            crawl_category(source, account, *category, lower_bound).await
        }
    });

    let mut outcome = CrawlOutcome {
        complete: true,
        ..CrawlOutcome::default()
    };
    for (found, complete, malformed) in join_all(scans).await {
        outcome.descriptors.extend(found);
        outcome.complete &= complete;
        outcome.malformed_stops += usize::from(malformed);
    }
    tracing::info!(
        account = %account,
        found = outcome.descriptors.len(),
        complete = outcome.complete,
        "crawl finished"
    );
    outcome
}
