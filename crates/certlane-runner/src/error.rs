//! Runner errors. These never leave `JobRunner::run_job`; they become a
//! terminal `crash` result instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("cannot start '{shell}': {source}")]
    SpawnFailed {
        shell: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot open I/O log {path}: {source}")]
    IoLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
