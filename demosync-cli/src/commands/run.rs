//! `demosync run [--account <steamid64>]`

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use demosync_core::AccountKey;
use demosync_sync::{plans, SyncError, SyncReport, SyncScope};

use super::{block_on, Env};

/// Run one sync pass.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Only sync this account (SteamID64 as configured).
    #[arg(long, value_name = "STEAMID64")]
    pub account: Option<String>,
}

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "account")]
    account: String,
    #[tabled(rename = "discovered")]
    discovered: usize,
    #[tabled(rename = "downloaded")]
    downloaded: usize,
    #[tabled(rename = "present")]
    already_present: usize,
    #[tabled(rename = "failed")]
    failed: String,
    #[tabled(rename = "malformed stops")]
    malformed_stops: usize,
}

impl RunArgs {
    pub fn run(self, env: &Env) -> Result<()> {
        let config = env.load_config()?;
        demosync_daemon::init_tracing(&config.log_level);

        let scope = match self.account {
            Some(key) => SyncScope::Account(AccountKey::from(key)),
            None => SyncScope::All,
        };
        let plans = plans(&config, &scope)?;
        if plans.is_empty() {
            println!("No accounts configured in {}.", env.config_path().display());
            return Ok(());
        }

        let store = Arc::new(env.store(&config));
        let engine = demosync_sources::engine_from_config(&config, env.home(), store)
            .context("failed to set up upstream clients")?;
        let started = chrono::Local::now();
        let results = block_on(engine.run_all(&plans))?;

        let labels: Vec<&str> = plans.iter().map(|p| p.label.as_str()).collect();
        let errored = print_results(&labels, &results);
        println!(
            "Sync started {} into {}",
            started.format("%Y-%m-%d %H:%M:%S"),
            config.demos_dir_at(env.home()).display()
        );
        if errored > 0 {
            bail!("{errored} account(s) could not be synced");
        }
        Ok(())
    }
}

/// Print a table of per-account results; returns how many accounts errored.
fn print_results(labels: &[&str], results: &[(AccountKey, Result<SyncReport, SyncError>)]) -> usize {
    let mut rows = Vec::new();
    let mut errored = 0;
    for (label, (account, result)) in labels.iter().zip(results) {
        match result {
            Ok(report) => rows.push(ReportRow {
                account: label.to_string(),
                discovered: report.discovered,
                downloaded: report.downloaded,
                already_present: report.already_present,
                failed: if report.failed.is_empty() {
                    "0".green().to_string()
                } else {
                    report.failed.len().to_string().yellow().to_string()
                },
                malformed_stops: report.malformed_stops,
            }),
            Err(err) => {
                errored += 1;
                eprintln!("{} {account}: {err}", "✗".red());
            }
        }
    }
    if !rows.is_empty() {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
    errored
}
