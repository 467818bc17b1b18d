//! # demosync-sync
//!
//! Discovery, resolution, download and checkpointing of match replays.
//!
//! Build a [`SyncEngine`] with the upstream collaborators from [`source`],
//! then call [`SyncEngine::run_sync`] for one account or
//! [`SyncEngine::run_all`] for every configured account.

pub mod audit;
pub mod chain;
pub mod checkpoint;
pub mod crawler;
pub mod download;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod source;

pub use checkpoint::{next_checkpoint, CheckpointDocument, CheckpointStore};
pub use download::{DownloadOutcome, DownloadPool};
pub use error::{DownloadError, SessionError, SourceError, StoreError, SyncError};
pub use pipeline::{plans, AccountPlan, EngineOptions, SyncEngine, SyncReport, SyncScope};
pub use resolver::{ResolveFailure, ResolveReport, ResolverOptions};
pub use source::{
    BlobReader, BlobSource, ChainApi, ChainStep, PageSource, RawItem, RawPage, ResolvedMatch,
    Session, SessionEvent, SessionHandle, SessionProvider,
};
