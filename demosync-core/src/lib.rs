//! demosync core library: domain types, configuration, share codes and errors.
//!
//! Public API surface:
//! - [`types`]: newtypes and the match descriptor
//! - [`sharecode`]: share-code validation, decoding and encoding
//! - [`config`]: YAML configuration load / validate / path helpers
//! - [`error`]: [`ConfigError`], [`ShareCodeError`]

pub mod config;
pub mod error;
pub mod sharecode;
pub mod types;

pub use config::{AccountConfig, Config, GcpdConfig, Schedule, ShareCodeConfig, Timeouts};
pub use error::{ConfigError, ShareCodeError};
pub use sharecode::{DecodedShareCode, ShareCode};
pub use types::{AccountKey, Category, MatchDescriptor, MatchId, Secret, StreamKind};
