//! `demosync checkpoint list|get|set`

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use demosync_core::{AccountKey, StreamKind};

use super::{block_on, Env};

#[derive(Subcommand, Debug)]
pub enum CheckpointCommand {
    /// Show every stored token.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,

        /// Print session refresh tokens instead of masking them.
        #[arg(long)]
        show_secrets: bool,
    },

    /// Print one token (empty output and exit code 1 when unset).
    Get {
        /// pagination_watermark | chain_code | session_refresh_token
        stream: StreamKind,
        account: String,
    },

    /// Overwrite one token as-is. Intended for migrations and repair.
    Set {
        stream: StreamKind,
        account: String,
        token: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct CheckpointRow {
    #[tabled(rename = "stream")]
    stream: String,
    #[tabled(rename = "account")]
    account: String,
    #[tabled(rename = "token")]
    token: String,
}

pub fn run(env: &Env, command: CheckpointCommand) -> Result<()> {
    let config = env.load_config()?;
    let store = env.store(&config);

    match command {
        CheckpointCommand::List { json, show_secrets } => {
            let doc = block_on(store.snapshot())?
                .with_context(|| format!("failed to read {}", store.path().display()))?;
            let mut rows = Vec::new();
            for stream in StreamKind::all() {
                for (account, token) in doc.namespace(*stream) {
                    let token = if stream.is_ordered() || show_secrets {
                        token.clone()
                    } else {
                        "***".to_string()
                    };
                    rows.push(CheckpointRow {
                        stream: stream.to_string(),
                        account: account.to_string(),
                        token,
                    });
                }
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No checkpoints stored at {}.", store.path().display());
            } else {
                let mut table = Table::new(rows);
                table.with(Style::rounded());
                println!("{table}");
            }
        }
        CheckpointCommand::Get { stream, account } => {
            let token = block_on(store.get(stream, &AccountKey::from(account.clone())))?
                .with_context(|| format!("failed to read {}", store.path().display()))?;
            match token {
                Some(token) => println!("{token}"),
                None => {
                    eprintln!("{} no {stream} checkpoint for {account}", "✗".red());
                    std::process::exit(1);
                }
            }
        }
        CheckpointCommand::Set {
            stream,
            account,
            token,
        } => {
            block_on(store.set(stream, &AccountKey::from(account.clone()), &token))?
                .with_context(|| format!("failed to write {}", store.path().display()))?;
            println!("{} {stream} for {account} set to {token}", "✓".green());
        }
    }
    Ok(())
}
