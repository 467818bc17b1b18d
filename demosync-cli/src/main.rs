//! demosync: keep a local folder of CS2 match replays in sync.
//!
//! # Usage
//!
//! ```text
//! demosync init
//! demosync run [--account <steamid64>]
//! demosync checkpoint list [--json] [--show-secrets]
//! demosync checkpoint get <stream> <account>
//! demosync checkpoint set <stream> <account> <token>
//! demosync daemon [--once]
//! demosync sharecode <code> [--json]
//! ```
//!
//! Every command reads `~/.demosync/config.yaml` unless `--config` (or
//! `DEMOSYNC_CONFIG`) names another file.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    checkpoint::CheckpointCommand, daemon::DaemonArgs, init::InitArgs, run::RunArgs,
    sharecode::SharecodeArgs, Env,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "demosync",
    version,
    about = "Discover and download CS2 match replays for your Steam accounts",
    long_about = None,
)]
struct Cli {
    /// Config file to use instead of ~/.demosync/config.yaml.
    #[arg(long, global = true, env = "DEMOSYNC_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a commented sample config if none exists.
    Init(InitArgs),

    /// Run one sync pass over every (or one) configured account.
    Run(RunArgs),

    /// Inspect or overwrite stored progress tokens.
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },

    /// Run scheduled sync passes in the foreground until ctrl-c.
    Daemon(DaemonArgs),

    /// Decode a match share code.
    Sharecode(SharecodeArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let env = Env::new(cli.config)?;
    match cli.command {
        Commands::Init(args) => args.run(&env),
        Commands::Run(args) => args.run(&env),
        Commands::Checkpoint { command } => commands::checkpoint::run(&env, command),
        Commands::Daemon(args) => args.run(&env),
        Commands::Sharecode(args) => args.run(),
    }
}
