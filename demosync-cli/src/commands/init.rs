//! `demosync init`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use demosync_core::config;

use super::Env;

/// Write a commented sample config if none exists.
#[derive(Args, Debug)]
pub struct InitArgs {}

impl InitArgs {
    pub fn run(self, env: &Env) -> Result<()> {
        let target = env.config_path();
        let (path, written) = config::init_to(target.clone())
            .with_context(|| format!("failed to write {}", target.display()))?;
        if written {
            println!("{} Wrote sample config to {}", "✓".green(), path.display());
            println!("  Add your accounts, then run `demosync run`.");
        } else {
            println!("Config already exists at {}; left untouched.", path.display());
        }
        Ok(())
    }
}
