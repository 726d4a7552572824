//! Runner configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Variables every job may see, in addition to its own `environ` list.
pub const STANDARD_ENVIRON: &[&str] = &[
    "PATH", "HOME", "LANG", "LC_ALL", "LC_CTYPE", "TERM", "USER", "LOGNAME", "TMPDIR",
];

/// How jobs are executed.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory receiving `<checksum prefix>-<job>.record.jsonl` I/O logs.
    pub io_log_dir: PathBuf,
    /// Shell used as `shell -c command`.
    pub shell: PathBuf,
    /// Time between SIGTERM and SIGKILL when a job is cancelled.
    pub termination_grace: Duration,
    /// Variable names copied from the runner's environment into every job.
    pub standard_environ: Vec<String>,
    /// Variables set for every job, overriding inherited values.
    pub extra_env: BTreeMap<String, String>,
    /// Directories prepended to `PATH` (provider `scripts/` directories).
    pub path_prepend: Vec<PathBuf>,
    /// Exported as `CERTLANE_SHARE` when set.
    pub share_dir: Option<PathBuf>,
    /// Working directory for jobs; inherited when unset.
    pub working_dir: Option<PathBuf>,
}

impl RunnerConfig {
    pub fn new(io_log_dir: impl Into<PathBuf>) -> Self {
        Self {
            io_log_dir: io_log_dir.into(),
            shell: PathBuf::from("/bin/sh"),
            termination_grace: Duration::from_secs(5),
            standard_environ: STANDARD_ENVIRON.iter().map(|s| s.to_string()).collect(),
            extra_env: BTreeMap::new(),
            path_prepend: Vec::new(),
            share_dir: None,
            working_dir: None,
        }
    }
}
