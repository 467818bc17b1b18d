//! `demosync daemon [--once]`

use anyhow::{Context, Result};
use clap::Args;

use super::Env;

/// Run the scheduler in the foreground.
#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Run a single pass and exit, whatever the config's schedule says.
    #[arg(long)]
    pub once: bool,
}

impl DaemonArgs {
    pub fn run(self, env: &Env) -> Result<()> {
        let mut config = env.load_config()?;
        if self.once {
            config.schedule.run_once = true;
        }
        demosync_daemon::start_blocking(env.home(), config).context("daemon failed")
    }
}
