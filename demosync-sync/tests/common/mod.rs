//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_compression::tokio::write::BzEncoder;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use demosync_core::{AccountKey, Category, DecodedShareCode, MatchId, ShareCode};
use demosync_sync::{
    BlobReader, BlobSource, ChainApi, ChainStep, PageSource, RawItem, RawPage, ResolvedMatch,
    Session, SessionError, SessionEvent, SessionHandle, SessionProvider, SourceError,
};

pub const PLAYED_AT: &str = "2023-10-01 20:15:00 GMT";
pub const MATCH_TIME: i64 = 1_696_191_300;

pub fn replay_url(id: u64) -> String {
    format!("http://replay181.valve.net/730/{id:021}_1573209442.dem.bz2")
}

pub fn share_code(id: u64) -> ShareCode {
    ShareCode::encode(&DecodedShareCode {
        match_id: MatchId(id),
        reservation_id: 42,
        tv_port: 7,
    })
}

pub fn account() -> AccountKey {
    AccountKey::from("76561198000000001")
}

pub async fn bz2(data: &[u8]) -> Vec<u8> {
    let mut enc = BzEncoder::new(Vec::new());
    enc.write_all(data).await.expect("compress");
    enc.shutdown().await.expect("finish");
    enc.into_inner()
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Match history for one category, newest first, split into pages.
pub struct FakeHistory {
    pub category: Category,
    pub ids: Mutex<Vec<u64>>,
    pub page_size: usize,
    pub fetches: Mutex<usize>,
    /// Fetching this cursor fails.
    pub fail_at: Mutex<Option<String>>,
}

impl FakeHistory {
    pub fn new(category: Category, ids: &[u64]) -> Self {
        Self {
            category,
            ids: Mutex::new(ids.to_vec()),
            page_size: 2,
            fetches: Mutex::new(0),
            fail_at: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PageSource for FakeHistory {
    async fn fetch_page(
        &self,
        _account: &AccountKey,
        category: Category,
        cursor: Option<&str>,
    ) -> Result<RawPage, SourceError> {
        *self.fetches.lock().unwrap() += 1;
        if category != self.category {
            return Ok(RawPage::default());
        }
        if cursor.is_some() && self.fail_at.lock().unwrap().as_deref() == cursor {
            return Err(SourceError::Network("connection reset".into()));
        }
        let ids = self.ids.lock().unwrap().clone();
        let start: usize = cursor.map_or(0, |c| c.parse().unwrap());
        let end = (start + self.page_size).min(ids.len());
        let items = ids[start..end]
            .iter()
            .map(|id| RawItem {
                locator: Some(replay_url(*id)),
                played_at: Some(PLAYED_AT.to_string()),
            })
            .collect();
        let has_more = end < ids.len();
        Ok(RawPage {
            items,
            cursor: has_more.then(|| end.to_string()),
            has_more,
        })
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// A linear chain over the given ids.
pub struct FakeChain {
    pub ids: Vec<u64>,
    pub calls: Mutex<Vec<MatchId>>,
}

impl FakeChain {
    pub fn new(ids: &[u64]) -> Self {
        Self {
            ids: ids.to_vec(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChainApi for FakeChain {
    async fn next_code(
        &self,
        _account: &AccountKey,
        known: &ShareCode,
    ) -> Result<ChainStep, SourceError> {
        let id = known.match_id().expect("known code decodes");
        self.calls.lock().unwrap().push(id);
        let pos = self.ids.iter().position(|x| *x == id.0);
        Ok(match pos.and_then(|p| self.ids.get(p + 1)) {
            Some(next) => ChainStep::Next(share_code(*next).as_str().to_string()),
            None => ChainStep::Terminal,
        })
    }
}

// ---------------------------------------------------------------------------
// Blobs
// ---------------------------------------------------------------------------

/// Serves a bzip2 body for every locator except those marked failing.
#[derive(Default)]
pub struct FakeBlobs {
    pub failing: Mutex<HashSet<String>>,
    pub opened: Mutex<HashMap<String, usize>>,
}

impl FakeBlobs {
    pub fn fail(&self, locator: &str) {
        self.failing.lock().unwrap().insert(locator.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn opens(&self, locator: &str) -> usize {
        self.opened.lock().unwrap().get(locator).copied().unwrap_or(0)
    }
}

#[async_trait]
impl BlobSource for FakeBlobs {
    async fn open(&self, locator: &str) -> Result<BlobReader, SourceError> {
        *self
            .opened
            .lock()
            .unwrap()
            .entry(locator.to_string())
            .or_default() += 1;
        if self.failing.lock().unwrap().contains(locator) {
            return Err(SourceError::Status {
                status: 503,
                url: locator.to_string(),
            });
        }
        let body = bz2(format!("HL2DEMO {locator}").as_bytes()).await;
        Ok(Box::new(std::io::Cursor::new(body)))
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// How the fake coordinator answers a submitted code.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond { delay: Duration, replay: bool },
    Silent,
    Fault,
    SubmitError,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Respond {
            delay: Duration::from_millis(10),
            replay: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionLog {
    pub connects: Vec<Option<String>>,
    pub activated: usize,
    pub submitted: Vec<MatchId>,
    pub deactivated: usize,
}

#[derive(Clone)]
pub struct FakeSessions {
    pub replies: HashMap<MatchId, Reply>,
    pub ready: bool,
    pub quit: bool,
    pub connect_error: bool,
    /// Sent right after `Ready`.
    pub extra_events: Vec<SessionEvent>,
    pub log: Arc<Mutex<SessionLog>>,
}

impl Default for FakeSessions {
    fn default() -> Self {
        Self {
            replies: HashMap::new(),
            ready: true,
            quit: true,
            connect_error: false,
            extra_events: Vec::new(),
            log: Arc::new(Mutex::new(SessionLog::default())),
        }
    }
}

impl FakeSessions {
    pub fn reply(mut self, id: u64, reply: Reply) -> Self {
        self.replies.insert(MatchId(id), reply);
        self
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, SessionLog> {
        self.log.lock().unwrap()
    }
}

pub fn resolved(id: MatchId, replay: bool) -> ResolvedMatch {
    ResolvedMatch {
        id,
        match_time: MATCH_TIME,
        replay_url: replay.then(|| replay_url(id.0)),
        player_count: 10,
        switched_teams: true,
    }
}

struct FakeSession {
    config: FakeSessions,
    events: mpsc::Sender<SessionEvent>,
}

#[async_trait]
impl SessionProvider for FakeSessions {
    async fn connect(
        &self,
        _account: &AccountKey,
        refresh_token: Option<&str>,
    ) -> Result<SessionHandle, SessionError> {
        self.log().connects.push(refresh_token.map(str::to_owned));
        if self.connect_error {
            return Err(SessionError::Connect("refused".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        Ok(SessionHandle {
            session: Box::new(FakeSession {
                config: self.clone(),
                events: tx,
            }),
            events: rx,
        })
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn activate(&self) -> Result<(), SessionError> {
        self.config.log().activated += 1;
        if self.config.ready {
            let _ = self.events.send(SessionEvent::Ready).await;
            for event in &self.config.extra_events {
                let _ = self.events.send(event.clone()).await;
            }
        }
        Ok(())
    }

    async fn submit(&self, code: &ShareCode) -> Result<(), SessionError> {
        let id = code.match_id().expect("decodable");
        self.config.log().submitted.push(id);
        match self.config.replies.get(&id).cloned().unwrap_or_else(Reply::ok) {
            Reply::Respond { delay, replay } => {
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(SessionEvent::Result(resolved(id, replay))).await;
                });
                Ok(())
            }
            Reply::Silent => Ok(()),
            Reply::Fault => {
                let _ = self
                    .events
                    .send(SessionEvent::Fault("coordinator went away".into()))
                    .await;
                Ok(())
            }
            Reply::SubmitError => Err(SessionError::Closed),
        }
    }

    async fn deactivate(&self) -> Result<(), SessionError> {
        self.config.log().deactivated += 1;
        if self.config.quit {
            let _ = self.events.send(SessionEvent::Quit).await;
        }
        Ok(())
    }
}
