use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use demosync_core::Config;
use demosync_sync::{plans, AccountPlan, CheckpointStore, SyncEngine, SyncScope};

use crate::error::{io_err, DaemonError};
use crate::scheduler::run_schedule;

/// Env var selecting JSON log lines instead of human-readable ones.
pub const LOG_FORMAT_ENV: &str = "DEMOSYNC_LOG_FORMAT";

/// Totals of one `run_all` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub accounts: usize,
    pub downloaded: usize,
    pub already_present: usize,
    pub failed: usize,
    pub errored_accounts: usize,
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt().json().with_env_filter(filter).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

/// Start the scheduler and block the current thread until it exits.
pub fn start_blocking(home: &Path, config: Config) -> Result<(), DaemonError> {
    init_tracing(&config.log_level);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run scheduled sync passes until ctrl-c (or once, per the schedule).
pub async fn run(home: PathBuf, config: Config) -> Result<(), DaemonError> {
    let state_dir = config.state_dir_at(&home);
    std::fs::create_dir_all(&state_dir).map_err(|e| io_err(&state_dir, e))?;

    let store = Arc::new(CheckpointStore::new(&state_dir));
    let engine = demosync_sources::engine_from_config(&config, &home, store)?;
    let plans = plans(&config, &SyncScope::All)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(4);
    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("received ctrl-c, stopping after the current pass");
                    let _ = shutdown.send(());
                    Ok(())
                }
                Err(err) => Err(DaemonError::Signal(err.to_string())),
            }
        })
    };

    let (engine, plans) = (&engine, plans.as_slice());
    let passes = run_schedule(&config.schedule, shutdown_rx, move |pass| async move {
        let summary = sync_pass(engine, plans).await;
        tracing::info!(
            pass,
            accounts = summary.accounts,
            downloaded = summary.downloaded,
            already_present = summary.already_present,
            failed = summary.failed,
            errored_accounts = summary.errored_accounts,
            "sync pass finished"
        );
    })
    .await;

    if signal_handle.is_finished() {
        match signal_handle.await {
            Ok(result) => result?,
            Err(err) => return Err(DaemonError::Signal(err.to_string())),
        }
    } else {
        signal_handle.abort();
    }
    tracing::info!(passes, "daemon exiting");
    Ok(())
}

/// One `run_all` over `plans`, with each account's outcome logged.
pub async fn sync_pass(engine: &SyncEngine, plans: &[AccountPlan]) -> PassSummary {
    let started = Instant::now();
    let mut summary = PassSummary {
        accounts: plans.len(),
        ..PassSummary::default()
    };
    for (account, result) in engine.run_all(plans).await {
        match result {
            Ok(report) => {
                tracing::info!(
                    account = %account,
                    discovered = report.discovered,
                    downloaded = report.downloaded,
                    already_present = report.already_present,
                    failed = report.failed.len(),
                    malformed_stops = report.malformed_stops,
                    "account synced"
                );
                summary.downloaded += report.downloaded;
                summary.already_present += report.already_present;
                summary.failed += report.failed.len();
            }
            Err(error) => {
                tracing::error!(account = %account, %error, "account sync failed");
                summary.errored_accounts += 1;
            }
        }
    }
    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "pass complete");
    summary
}
