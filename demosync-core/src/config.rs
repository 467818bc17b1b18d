//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.demosync/
//!   config.yaml     (accounts, credentials, tuning; mode 0600 when written by `init`)
//!   store.json      (checkpoint document, see demosync-sync)
//!   demo-log.tsv    (append-only audit log)
//!   demos/          (default replay directory)
//! ```
//!
//! # API pattern
//!
//! Like the rest of the workspace, every function touching the home directory
//! has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::sharecode::ShareCode;
use crate::types::{AccountKey, Category, Secret};

pub const CONFIG_FILE: &str = "config.yaml";

/// Minimum spacing between share-code API calls; the API's per-key budget.
pub const MIN_CHAIN_SPACING: Duration = Duration::from_millis(300);

// ---------------------------------------------------------------------------
// 1. Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub steam_api_key: Option<Secret>,
    #[serde(default)]
    pub demos_dir: Option<PathBuf>,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
    #[serde(default = "default_one")]
    pub crawl_concurrency: usize,
    #[serde(default = "default_one")]
    pub resolve_concurrency: usize,
    #[serde(default = "default_chain_spacing_ms")]
    pub chain_spacing_ms: u64,
    /// Unix socket of the game-coordinator bridge. Without it share-code
    /// candidates cannot be resolved and that stream is skipped.
    #[serde(default)]
    pub session_bridge: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountConfig {
    pub steam_id64: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub gcpd: Option<GcpdConfig>,
    #[serde(default)]
    pub share_code: Option<ShareCodeConfig>,
}

impl AccountConfig {
    pub fn key(&self) -> AccountKey {
        AccountKey::from(self.steam_id64.as_str())
    }

    /// Label if configured, otherwise the SteamID64.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.steam_id64)
    }
}

/// Credentials for the personal match-history pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcpdConfig {
    /// Raw `Cookie` header value of an authenticated community session.
    pub cookie: Secret,
    #[serde(default = "default_categories")]
    pub categories: Vec<Category>,
}

/// Credentials for walking the share-code chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShareCodeConfig {
    pub auth_code: Secret,
    /// Where the chain walk starts before any checkpoint exists.
    pub oldest_share_code: ShareCode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timeouts {
    #[serde(default = "default_timeout_secs")]
    pub session_ready_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub request_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub session_quit_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            session_ready_secs: default_timeout_secs(),
            request_secs: default_timeout_secs(),
            session_quit_secs: default_timeout_secs(),
        }
    }
}

impl Timeouts {
    pub fn session_ready(&self) -> Duration {
        Duration::from_secs(self.session_ready_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn session_quit(&self) -> Duration {
        Duration::from_secs(self.session_quit_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Schedule {
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
    #[serde(default)]
    pub run_once: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            run_on_startup: true,
            run_once: false,
            interval_minutes: default_interval_minutes(),
        }
    }
}

impl Schedule {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_download_concurrency() -> usize {
    5
}

fn default_one() -> usize {
    1
}

fn default_chain_spacing_ms() -> u64 {
    1500
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_interval_minutes() -> u64 {
    60
}

fn default_categories() -> Vec<Category> {
    Category::all().to_vec()
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.demosync/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".demosync")
}

/// `<home>/.demosync/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join(CONFIG_FILE)
}

/// `config_path_at` convenience wrapper.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_path_at(&home()?))
}

impl Config {
    /// Replay directory. `DEMOS_DIR` wins over the config, which wins over
    /// `<home>/.demosync/demos`.
    pub fn demos_dir_at(&self, home: &Path) -> PathBuf {
        if let Some(dir) = std::env::var_os("DEMOS_DIR").filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }
        self.demos_dir
            .clone()
            .unwrap_or_else(|| root_at(home).join("demos"))
    }

    /// Directory holding `store.json` and `demo-log.tsv`.
    pub fn state_dir_at(&self, home: &Path) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| root_at(home))
    }

    /// Spacing between share-code API calls, never below [`MIN_CHAIN_SPACING`].
    pub fn chain_spacing(&self) -> Duration {
        Duration::from_millis(self.chain_spacing_ms).max(MIN_CHAIN_SPACING)
    }

    pub fn account(&self, key: &AccountKey) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.steam_id64 == key.0)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("download_concurrency", self.download_concurrency),
            ("crawl_concurrency", self.crawl_concurrency),
            ("resolve_concurrency", self.resolve_concurrency),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.steam_id64.is_empty()
                || !account.steam_id64.chars().all(|c| c.is_ascii_digit())
            {
                return Err(ConfigError::Invalid(format!(
                    "steam_id64 '{}' must be a decimal SteamID64",
                    account.steam_id64
                )));
            }
            if !seen.insert(account.steam_id64.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "account {} is listed more than once",
                    account.steam_id64
                )));
            }
            if account.gcpd.is_none() && account.share_code.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "account {} has neither `gcpd` nor `share_code` configured",
                    account.display_name()
                )));
            }
            if let Some(gcpd) = &account.gcpd {
                if gcpd.categories.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "account {} lists no gcpd categories",
                        account.display_name()
                    )));
                }
            }
            if let Some(share_code) = &account.share_code {
                share_code.oldest_share_code.decode().map_err(|e| {
                    ConfigError::Invalid(format!(
                        "account {}: oldest_share_code: {e}",
                        account.display_name()
                    ))
                })?;
            }
        }

        let needs_api_key = self.accounts.iter().any(|a| a.share_code.is_some());
        if needs_api_key && self.steam_api_key.is_none() {
            return Err(ConfigError::Invalid(
                "steam_api_key is required when any account uses share codes".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load and validate the config at an explicit path.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Load `<home>/.demosync/config.yaml`.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    load_from(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Commented starting point written by `demosync init`.
pub const SAMPLE_CONFIG: &str = r#"# demosync configuration
#
# steam_api_key is needed for the share-code chain:
#   https://steamcommunity.com/dev/apikey
# steam_api_key: "XXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXX"

# demos_dir: /data/demos
# state_dir: /data/demosync
log_level: info
download_concurrency: 5
crawl_concurrency: 1
resolve_concurrency: 1
chain_spacing_ms: 1500
# session_bridge: /run/gc-bridge.sock

timeouts:
  session_ready_secs: 30
  request_secs: 30
  session_quit_secs: 30

schedule:
  run_on_startup: true
  run_once: false
  interval_minutes: 60

accounts: []
#  - steam_id64: "76561198000000000"
#    label: main
#    gcpd:
#      cookie: "steamLoginSecure=..."
#      categories: [premier, competitive, wingman]
#    share_code:
#      auth_code: "AAAA-AAAAA-AAAA"
#      oldest_share_code: "CSGO-xxxxx-xxxxx-xxxxx-xxxxx-xxxxx"
"#;

/// Write [`SAMPLE_CONFIG`] unless a config already exists.
///
/// Returns the path and whether a file was written.
pub fn init_at(home: &Path) -> Result<(PathBuf, bool), ConfigError> {
    init_to(config_path_at(home))
}

/// [`init_at`] for an explicit config path.
pub fn init_to(path: PathBuf) -> Result<(PathBuf, bool), ConfigError> {
    if path.exists() {
        return Ok((path, false));
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, SAMPLE_CONFIG).map_err(|source| ConfigError::Io {
        path: tmp.clone(),
        source,
    })?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok((path, true))
}

/// `init_at` convenience wrapper.
pub fn init() -> Result<(PathBuf, bool), ConfigError> {
    init_at(&home()?)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|source| {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
