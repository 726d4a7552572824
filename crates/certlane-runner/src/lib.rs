//! certlane job runner
//!
//! Executes a job definition and turns whatever happens into a terminal
//! [`JobResult`](certlane_model::JobResult).

mod config;
mod delegate;
mod error;
mod executor;

pub use config::{RunnerConfig, STANDARD_ENVIRON};
pub use delegate::{LineSink, OperatorDelegate, OperatorVerdict};
pub use error::{RunnerError, RunnerResult};
pub use executor::{io_log_name, read_io_log, slug, JobRunner};
