//! Error types for demosync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}; run `demosync init` first")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.demosync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The document parsed but violates a semantic rule.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors from share-code validation and decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareCodeError {
    #[error("malformed share code '{0}'")]
    Malformed(String),

    #[error("share code '{0}' does not fit in 144 bits")]
    Overflow(String),
}
