pub mod checkpoint;
pub mod daemon;
pub mod init;
pub mod run;
pub mod sharecode;

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use demosync_core::{config, Config};
use demosync_sync::CheckpointStore;

/// Where this invocation reads its config and state from.
#[derive(Debug)]
pub struct Env {
    pub home: PathBuf,
    pub config_override: Option<PathBuf>,
}

impl Env {
    pub fn new(config_override: Option<PathBuf>) -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(Self {
            home,
            config_override,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_override
            .clone()
            .unwrap_or_else(|| config::config_path_at(&self.home))
    }

    pub fn load_config(&self) -> Result<Config> {
        let path = self.config_path();
        config::load_from(&path).with_context(|| {
            format!(
                "failed to load {} (run `demosync init` to create one)",
                path.display()
            )
        })
    }

    pub fn store(&self, config: &Config) -> CheckpointStore {
        CheckpointStore::new(&config.state_dir_at(&self.home))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}

/// Run `future` to completion on a fresh runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
