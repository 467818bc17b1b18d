//! Sync orchestrator shared by the CLI and the daemon.
//!
//! Per account: `DISCOVER → RESOLVE? → DOWNLOAD → ADVANCE`. A run with
//! nothing to do returns before touching the checkpoint store.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::Instrument;

use demosync_core::{
    AccountConfig, AccountKey, Category, Config, MatchDescriptor, MatchId, ShareCode, StreamKind,
};

use crate::audit::{self, AUDIT_FILE};
use crate::chain::{self, ChainLink, IntervalGate};
use crate::checkpoint::{next_checkpoint, token_ordinal, CheckpointStore};
use crate::crawler::{self, CrawlOutcome};
use crate::download::{DownloadOutcome, DownloadPool};
use crate::error::{StoreError, SyncError};
use crate::resolver::{resolve_batch, ResolverOptions};
use crate::source::{BlobSource, ChainApi, PageSource, SessionProvider};

// ---------------------------------------------------------------------------
// Plans and scope
// ---------------------------------------------------------------------------

/// Scope for a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Every configured account.
    All,
    /// A single account, by SteamID64.
    Account(AccountKey),
}

/// What to sync for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPlan {
    pub key: AccountKey,
    pub label: String,
    /// History categories to crawl; empty when the account has no cookie.
    pub categories: Vec<Category>,
    /// Chain start for a first run; `None` when the account has no chain.
    pub oldest_share_code: Option<ShareCode>,
}

impl AccountPlan {
    pub fn from_config(account: &AccountConfig) -> Self {
        Self {
            key: account.key(),
            label: account.display_name().to_string(),
            categories: account
                .gcpd
                .as_ref()
                .map(|g| g.categories.clone())
                .unwrap_or_default(),
            oldest_share_code: account
                .share_code
                .as_ref()
                .map(|s| s.oldest_share_code.clone()),
        }
    }
}

/// Plans for `scope`, in config order.
pub fn plans(config: &Config, scope: &SyncScope) -> Result<Vec<AccountPlan>, SyncError> {
    match scope {
        SyncScope::All => Ok(config.accounts.iter().map(AccountPlan::from_config).collect()),
        SyncScope::Account(key) => config
            .account(key)
            .map(|a| vec![AccountPlan::from_config(a)])
            .ok_or_else(|| SyncError::UnknownAccount(key.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub account: AccountKey,
    pub discovered: usize,
    pub downloaded: usize,
    pub already_present: usize,
    /// Ids that failed resolution or download, ascending.
    pub failed: Vec<MatchId>,
    pub malformed_stops: usize,
}

impl SyncReport {
    /// An empty report: nothing discovered, nothing fetched.
    pub fn new(account: AccountKey) -> Self {
        Self {
            account,
            discovered: 0,
            downloaded: 0,
            already_present: 0,
            failed: Vec::new(),
            malformed_stops: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub demos_dir: PathBuf,
    pub audit_path: PathBuf,
    pub download_concurrency: usize,
    pub crawl_concurrency: usize,
    pub chain_spacing: Duration,
    pub resolver: ResolverOptions,
}

impl EngineOptions {
    pub fn from_config(config: &Config, home: &Path) -> Self {
        Self {
            demos_dir: config.demos_dir_at(home),
            audit_path: config.state_dir_at(home).join(AUDIT_FILE),
            download_concurrency: config.download_concurrency,
            crawl_concurrency: config.crawl_concurrency,
            chain_spacing: config.chain_spacing(),
            resolver: ResolverOptions::from_config(config),
        }
    }
}

struct HistoryDiscovery {
    outcome: CrawlOutcome,
    current: Option<MatchId>,
}

struct ChainDiscovery {
    current: Option<MatchId>,
    candidates: Vec<ChainLink>,
    malformed: bool,
}

/// Owns the shared gates and queues; one engine serves every account.
pub struct SyncEngine {
    store: Arc<CheckpointStore>,
    pages: Option<Arc<dyn PageSource>>,
    chain: Option<Arc<dyn ChainApi>>,
    sessions: Option<Arc<dyn SessionProvider>>,
    downloads: DownloadPool,
    crawl_permits: Arc<Semaphore>,
    chain_gate: Arc<IntervalGate>,
    audit_path: PathBuf,
    resolver: ResolverOptions,
}

impl SyncEngine {
    pub fn new(store: Arc<CheckpointStore>, blobs: Arc<dyn BlobSource>, options: EngineOptions) -> Self {
        Self {
            store,
            pages: None,
            chain: None,
            sessions: None,
            downloads: DownloadPool::new(blobs, options.demos_dir, options.download_concurrency),
            crawl_permits: Arc::new(Semaphore::new(options.crawl_concurrency.max(1))),
            chain_gate: Arc::new(IntervalGate::new(options.chain_spacing)),
            audit_path: options.audit_path,
            resolver: options.resolver,
        }
    }

    pub fn with_pages(mut self, pages: Arc<dyn PageSource>) -> Self {
        self.pages = Some(pages);
        self
    }

    pub fn with_chain(mut self, chain: Arc<dyn ChainApi>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionProvider>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Run every plan concurrently. One account's failure never affects
    /// another's report.
    pub async fn run_all(
        &self,
        plans: &[AccountPlan],
    ) -> Vec<(AccountKey, Result<SyncReport, SyncError>)> {
        let runs = plans.iter().map(|plan| async move {
            let span = tracing::info_span!("sync", account = %plan.key, label = %plan.label);
            let result = self.run_sync(plan).instrument(span).await;
            if let Err(error) = &result {
                tracing::error!(account = %plan.key, %error, "sync failed");
            }
            (plan.key.clone(), result)
        });
        join_all(runs).await
    }

    /// One full pass for one account.
    pub async fn run_sync(&self, plan: &AccountPlan) -> Result<SyncReport, SyncError> {
        let account = &plan.key;
        let mut report = SyncReport::new(account.clone());

        // DISCOVER
        let (history, chain) = tokio::join!(self.discover_history(plan), self.discover_chain(plan));
        let history = history?;
        let chain = chain?;

        report.malformed_stops = history.as_ref().map_or(0, |h| h.outcome.malformed_stops)
            + chain.as_ref().map_or(0, |c| usize::from(c.malformed));

        let crawled = history.as_ref().map_or(0, |h| h.outcome.descriptors.len());
        let chained = chain.as_ref().map_or(0, |c| c.candidates.len());
        if crawled + chained == 0 {
            tracing::info!(account = %account, "nothing new");
            return Ok(report);
        }

        // RESOLVE
        let mut resolved = Vec::new();
        let mut resolve_failed = BTreeSet::new();
        let chain = match chain {
            Some(chain) if !chain.candidates.is_empty() => match &self.sessions {
                Some(sessions) => {
                    let codes: Vec<ShareCode> = chain.candidates.iter().map(|l| l.code.clone()).collect();
                    let batch =
                        resolve_batch(sessions.as_ref(), &self.store, account, &codes, &self.resolver).await;
                    resolve_failed = batch.failed_ids();
                    resolved = batch.resolved;
                    Some(chain)
                }
                None => {
                    tracing::warn!(
                        account = %account,
                        candidates = chain.candidates.len(),
                        "no session bridge configured; share codes left for a later run"
                    );
                    None
                }
            },
            _ => None,
        };

        // Merge: first occurrence wins, history first.
        let mut seen = HashSet::new();
        let work: Vec<MatchDescriptor> = history
            .iter()
            .flat_map(|h| h.outcome.descriptors.iter())
            .chain(resolved.iter())
            .filter(|d| seen.insert(d.id))
            .cloned()
            .collect();
        report.discovered = work.len();

        if work.is_empty() {
            report.failed = resolve_failed.into_iter().collect();
            tracing::info!(account = %account, failed = report.failed.len(), "nothing to download");
            return Ok(report);
        }

        audit::append(&self.audit_path, &work).await;

        // DOWNLOAD
        let outcomes = self.downloads.download_all(&work).await;
        let mut failed = resolve_failed.clone();
        for (id, outcome) in &outcomes {
            match outcome {
                Ok(DownloadOutcome::Fetched { .. }) => report.downloaded += 1,
                Ok(DownloadOutcome::AlreadyPresent { .. }) => report.already_present += 1,
                Err(_) => {
                    failed.insert(*id);
                }
            }
        }
        report.failed = failed.into_iter().collect();

        // ADVANCE
        let settled = |id: &MatchId| matches!(outcomes.get(id), Some(Ok(_)));

        if let Some(history) = &history {
            if history.outcome.complete {
                let (succeeded, failed) = split(history.outcome.descriptors.iter().map(|d| d.id), &settled);
                if let Some(next) = next_checkpoint(history.current, &succeeded, &failed) {
                    self.store
                        .advance(StreamKind::PaginationWatermark, account, &next.to_string())
                        .await?;
                }
            } else {
                tracing::info!(account = %account, "history crawl incomplete; watermark unchanged");
            }
        }

        if let Some(chain) = &chain {
            let (succeeded, mut failed) = split(chain.candidates.iter().map(|l| l.id), &settled);
            failed.extend(resolve_failed.iter().copied());
            if let Some(next) = next_checkpoint(chain.current, &succeeded, &failed) {
                if let Some(link) = chain.candidates.iter().find(|l| l.id == next) {
                    self.store
                        .advance(StreamKind::ChainCode, account, link.code.as_str())
                        .await?;
                }
            }
        }

        tracing::info!(
            account = %account,
            downloaded = report.downloaded,
            already_present = report.already_present,
            failed = report.failed.len(),
            "sync finished"
        );
        Ok(report)
    }

    async fn discover_history(&self, plan: &AccountPlan) -> Result<Option<HistoryDiscovery>, StoreError> {
        if plan.categories.is_empty() {
            return Ok(None);
        }
        let Some(pages) = &self.pages else {
            tracing::warn!(account = %plan.key, "no history source configured; skipping crawl");
            return Ok(None);
        };

        let current = self.stored_ordinal(StreamKind::PaginationWatermark, &plan.key).await?;
        let outcome = crawler::crawl(
            pages.as_ref(),
            &plan.key,
            &plan.categories,
            current,
            self.crawl_permits.clone(),
        )
        .await;
        Ok(Some(HistoryDiscovery { outcome, current }))
    }

    async fn discover_chain(&self, plan: &AccountPlan) -> Result<Option<ChainDiscovery>, StoreError> {
        let Some(oldest) = &plan.oldest_share_code else {
            return Ok(None);
        };
        let Some(api) = &self.chain else {
            tracing::warn!(account = %plan.key, "no chain API configured; skipping share codes");
            return Ok(None);
        };

        let stored = self.store.get(StreamKind::ChainCode, &plan.key).await?;
        let resume = stored.and_then(|token| match ShareCode::parse(&token) {
            Ok(code) => code.match_id().ok().map(|id| (code, id)),
            Err(error) => {
                tracing::warn!(account = %plan.key, %error, "stored share code unusable; restarting chain");
                None
            }
        });

        // First run: the oldest code itself has never been processed.
        let mut candidates = Vec::new();
        let (start, current) = match resume {
            Some((code, id)) => (code, Some(id)),
            None => {
                if let Ok(id) = oldest.match_id() {
                    candidates.push(ChainLink {
                        code: oldest.clone(),
                        id,
                    });
                }
                (oldest.clone(), None)
            }
        };

        let walk = chain::walk(api.as_ref(), &self.chain_gate, &plan.key, &start).await;
        candidates.extend(walk.links);
        Ok(Some(ChainDiscovery {
            current,
            candidates,
            malformed: walk.malformed,
        }))
    }

    async fn stored_ordinal(&self, stream: StreamKind, account: &AccountKey) -> Result<Option<MatchId>, StoreError> {
        let Some(token) = self.store.get(stream, account).await? else {
            return Ok(None);
        };
        let ordinal = token_ordinal(stream, &token);
        if ordinal.is_none() {
            tracing::warn!(stream = %stream, account = %account, token = %token, "stored checkpoint unusable; ignoring");
        }
        Ok(ordinal)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.store.path())
            .field("pages", &self.pages.is_some())
            .field("chain", &self.chain.is_some())
            .field("sessions", &self.sessions.is_some())
            .field("downloads", &self.downloads)
            .finish_non_exhaustive()
    }
}

/// Partition `ids` into (succeeded, failed) by `ok`.
fn split(
    ids: impl Iterator<Item = MatchId>,
    ok: &impl Fn(&MatchId) -> bool,
) -> (BTreeSet<MatchId>, BTreeSet<MatchId>) {
    ids.partition(|id| ok(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_follow_config_accounts() {
        let config: Config = serde_yaml::from_str(
            r#"
accounts:
  - steam_id64: "1"
    gcpd: { cookie: "c", categories: [wingman] }
  - steam_id64: "2"
    gcpd: { cookie: "c" }
"#,
        )
        .unwrap();

        let all = plans(&config, &SyncScope::All).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].categories, vec![Category::Wingman]);
        assert_eq!(all[1].categories.len(), 3);
        assert!(all[0].oldest_share_code.is_none());

        let one = plans(&config, &SyncScope::Account(AccountKey::from("2"))).unwrap();
        assert_eq!(one[0].key, AccountKey::from("2"));

        let err = plans(&config, &SyncScope::Account(AccountKey::from("3"))).unwrap_err();
        assert!(matches!(err, SyncError::UnknownAccount(_)));
    }

    #[test]
    fn new_report_counts_nothing() {
        let report = SyncReport::new(AccountKey::from("7656"));
        assert_eq!(report.account, AccountKey::from("7656"));
        assert_eq!(report.discovered + report.downloaded + report.already_present, 0);
        assert!(report.failed.is_empty());
        assert_eq!(report.malformed_stops, 0);
    }

    #[test]
    fn split_partitions_by_outcome() {
        let ok = |id: &MatchId| id.0 % 2 == 0;
        let (s, f) = split([1, 2, 3, 4].into_iter().map(MatchId), &ok);
        assert_eq!(s.into_iter().map(|i| i.0).collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(f.into_iter().map(|i| i.0).collect::<Vec<_>>(), vec![1, 3]);
    }
}
