//! Match resolver: turns share codes into descriptors through a
//! game-coordinator session.
//!
//! Requests are fire-and-forget and results arrive on the session's event
//! stream, so every in-flight request owns an entry in a [`CorrelationTable`]
//! registered before submission and removed on resolution or timeout.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::time::timeout;

use demosync_core::{AccountKey, Config, MatchDescriptor, MatchId, ShareCode, StreamKind};

use crate::checkpoint::CheckpointStore;
use crate::source::{ResolvedMatch, Session, SessionEvent, SessionHandle, SessionProvider};

/// Why a single share code did not produce a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveFailure {
    #[error("no response within the request timeout")]
    Timeout,

    #[error("session fault: {0}")]
    SessionFault(String),

    #[error("coordinator returned no replay url")]
    MissingReplay,
}

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub ready_timeout: Duration,
    pub request_timeout: Duration,
    pub quit_timeout: Duration,
    pub concurrency: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            quit_timeout: Duration::from_secs(30),
            concurrency: 1,
        }
    }
}

impl ResolverOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ready_timeout: config.timeouts.session_ready(),
            request_timeout: config.timeouts.request(),
            quit_timeout: config.timeouts.session_quit(),
            concurrency: config.resolve_concurrency.max(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct ResolveReport {
    pub resolved: Vec<MatchDescriptor>,
    pub failed: Vec<(MatchId, ResolveFailure)>,
    /// Codes that never reached the session because they do not decode.
    pub undecodable: Vec<ShareCode>,
}

impl ResolveReport {
    pub fn failed_ids(&self) -> BTreeSet<MatchId> {
        self.failed.iter().map(|(id, _)| *id).collect()
    }

    fn fail_all(&mut self, ids: impl IntoIterator<Item = MatchId>, failure: ResolveFailure) {
        self.failed
            .extend(ids.into_iter().map(|id| (id, failure.clone())));
    }
}

// ---------------------------------------------------------------------------
// Correlation table
// ---------------------------------------------------------------------------

/// Pending requests keyed by match id.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<MatchId, oneshot::Sender<ResolvedMatch>>>,
}

impl CorrelationTable {
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<MatchId, oneshot::Sender<ResolvedMatch>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in `id`. A previous registration for the same id is
    /// dropped, which fails its waiter.
    pub fn register(&self, id: MatchId) -> oneshot::Receiver<ResolvedMatch> {
        let (tx, rx) = oneshot::channel();
        self.entries().insert(id, tx);
        rx
    }

    /// Deliver `payload` to its waiter. Returns false when nobody is waiting.
    pub fn resolve(&self, payload: ResolvedMatch) -> bool {
        let Some(tx) = self.entries().remove(&payload.id) else {
            return false;
        };
        tx.send(payload).is_ok()
    }

    pub fn cancel(&self, id: MatchId) -> bool {
        self.entries().remove(&id).is_some()
    }

    /// Drop every entry; returns how many there were.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let n = entries.len();
        entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Session signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct SessionSignals {
    ready: bool,
    quit: bool,
    closed: bool,
    fault: Option<String>,
    refresh_token: Option<String>,
}

/// Route session events until the stream ends.
async fn dispatch(
    account: AccountKey,
    mut events: mpsc::Receiver<SessionEvent>,
    table: Arc<CorrelationTable>,
    signals: watch::Sender<SessionSignals>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Ready => signals.send_modify(|s| s.ready = true),
            SessionEvent::Result(payload) => {
                let id = payload.id;
                if !table.resolve(payload) {
                    tracing::debug!(account = %account, match_id = %id, "result with no pending request ignored");
                }
            }
            SessionEvent::Quit => signals.send_modify(|s| s.quit = true),
            SessionEvent::RefreshToken(token) => {
                signals.send_modify(|s| s.refresh_token = Some(token))
            }
            SessionEvent::Fault(reason) => {
                tracing::warn!(account = %account, %reason, "session fault");
                signals.send_modify(|s| {
                    s.fault.get_or_insert(reason);
                });
            }
        }
    }

    // Nothing more can arrive; fail whoever is still waiting.
    let dropped = table.clear();
    if dropped > 0 {
        tracing::warn!(account = %account, dropped, "session closed with requests in flight");
    }
    signals.send_modify(|s| s.closed = true);
}

fn current_fault(signals: &watch::Receiver<SessionSignals>, local: &Mutex<Option<String>>) -> Option<String> {
    {
        let s = signals.borrow();
        if let Some(reason) = &s.fault {
            return Some(reason.clone());
        }
        if s.closed {
            return Some("session closed".to_string());
        }
    }
    local.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Resolve `codes` for `account` through one session.
///
/// Never fails as a whole: every decodable code ends up in either
/// `resolved` or `failed`, and the session is always torn down.
pub async fn resolve_batch(
    provider: &dyn SessionProvider,
    store: &CheckpointStore,
    account: &AccountKey,
    codes: &[ShareCode],
    options: &ResolverOptions,
) -> ResolveReport {
    let mut report = ResolveReport::default();
    let mut candidates = Vec::with_capacity(codes.len());
    let mut seen = HashSet::new();
    for code in codes {
        match code.match_id() {
            Ok(id) => {
                if seen.insert(id) {
                    candidates.push((id, code.clone()));
                }
            }
            Err(error) => {
                tracing::warn!(account = %account, code = %code, %error, "skipping undecodable share code");
                report.undecodable.push(code.clone());
            }
        }
    }
    if candidates.is_empty() {
        return report;
    }

    let refresh_token = match store.get(StreamKind::SessionRefreshToken, account).await {
        Ok(token) => token,
        Err(error) => {
            tracing::warn!(account = %account, %error, "could not read stored refresh token");
            None
        }
    };

    let SessionHandle { session, events } =
        match provider.connect(account, refresh_token.as_deref()).await {
            Ok(handle) => handle,
            Err(error) => {
                tracing::error!(account = %account, %error, "could not open session");
                report.fail_all(
                    candidates.iter().map(|(id, _)| *id),
                    ResolveFailure::SessionFault(error.to_string()),
                );
                return report;
            }
        };

    let table = Arc::new(CorrelationTable::default());
    let (signals_tx, mut signals) = watch::channel(SessionSignals::default());
    let dispatcher = tokio::spawn(dispatch(account.clone(), events, table.clone(), signals_tx));

    match activate(session.as_ref(), &mut signals, options.ready_timeout).await {
        Ok(()) => {
            tracing::info!(account = %account, requests = candidates.len(), "session ready");
            let outcomes = submit_all(session.as_ref(), &table, &signals, &candidates, options).await;
            for (id, outcome) in outcomes {
                match outcome.map(ResolvedMatch::into_descriptor) {
                    Ok(Some(descriptor)) => report.resolved.push(descriptor),
                    Ok(None) => report.failed.push((id, ResolveFailure::MissingReplay)),
                    Err(failure) => {
                        tracing::warn!(account = %account, match_id = %id, %failure, "share code not resolved");
                        report.failed.push((id, failure));
                    }
                }
            }
        }
        Err(reason) => {
            tracing::error!(account = %account, %reason, "session not ready");
            report.fail_all(
                candidates.iter().map(|(id, _)| *id),
                ResolveFailure::SessionFault(reason),
            );
        }
    }

    teardown(session.as_ref(), &mut signals, options.quit_timeout, account).await;
    let refresh_token = signals.borrow().refresh_token.clone();
    dispatcher.abort();

    let leftover = table.clear();
    if leftover > 0 {
        tracing::warn!(account = %account, leftover, "correlation entries left after batch");
    }

    if let Some(token) = refresh_token {
        if let Err(error) = store
            .set(StreamKind::SessionRefreshToken, account, &token)
            .await
        {
            tracing::warn!(account = %account, %error, "could not persist refresh token");
        }
    }

    tracing::info!(
        account = %account,
        resolved = report.resolved.len(),
        failed = report.failed.len(),
        "resolution finished"
    );
    report
}

async fn activate(
    session: &dyn Session,
    signals: &mut watch::Receiver<SessionSignals>,
    deadline: Duration,
) -> Result<(), String> {
    session.activate().await.map_err(|e| e.to_string())?;
    let waited = timeout(
        deadline,
        signals.wait_for(|s| s.ready || s.fault.is_some() || s.closed),
    )
    .await;
    match waited {
        Ok(Ok(s)) if s.ready => Ok(()),
        Ok(Ok(s)) => Err(s
            .fault
            .clone()
            .unwrap_or_else(|| "session closed".to_string())),
        Ok(Err(_)) => Err("session closed".to_string()),
        Err(_) => Err("session never became ready".to_string()),
    }
}

async fn submit_all(
    session: &dyn Session,
    table: &CorrelationTable,
    signals: &watch::Receiver<SessionSignals>,
    candidates: &[(MatchId, ShareCode)],
    options: &ResolverOptions,
) -> Vec<(MatchId, Result<ResolvedMatch, ResolveFailure>)> {
    let permits = Semaphore::new(options.concurrency.max(1));
    let submit_fault: Mutex<Option<String>> = Mutex::new(None);

    let requests = candidates.iter().map(|(id, code)| {
        let permits = &permits;
        let submit_fault = &submit_fault;
        async move {
            let id = *id;
            let Ok(_permit) = permits.acquire().await else {
                return (id, Err(ResolveFailure::SessionFault("request queue closed".into())));
            };
            if let Some(reason) = current_fault(signals, submit_fault) {
                return (id, Err(ResolveFailure::SessionFault(reason)));
            }

            let response = table.register(id);
            if let Err(error) = session.submit(code).await {
                table.cancel(id);
                let reason = error.to_string();
                submit_fault
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_or_insert_with(|| reason.clone());
                return (id, Err(ResolveFailure::SessionFault(reason)));
            }

            match timeout(options.request_timeout, response).await {
                Ok(Ok(payload)) => (id, Ok(payload)),
                Ok(Err(_)) => (
                    id,
                    Err(ResolveFailure::SessionFault(
                        "session closed before responding".into(),
                    )),
                ),
                Err(_) => {
                    table.cancel(id);
                    (id, Err(ResolveFailure::Timeout))
                }
            }
        }
    });
    join_all(requests).await
}

async fn teardown(
    session: &dyn Session,
    signals: &mut watch::Receiver<SessionSignals>,
    deadline: Duration,
    account: &AccountKey,
) {
    if let Err(error) = session.deactivate().await {
        tracing::warn!(account = %account, %error, "session deactivate failed");
        return;
    }
    match timeout(deadline, signals.wait_for(|s| s.quit || s.closed)).await {
        Ok(_) => tracing::debug!(account = %account, "session quit"),
        Err(_) => tracing::warn!(account = %account, "session did not quit in time"),
    }
}
