//! Scheduled sync runtime: periodic `run_all` passes until ctrl-c.

mod error;
pub mod runtime;
pub mod scheduler;

pub use error::DaemonError;
pub use runtime::{init_tracing, run, start_blocking, sync_pass, PassSummary};
pub use scheduler::run_schedule;
