//! Built-in defaults (layer 1) and the typed engine configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use certlane_runner::{RunnerConfig, STANDARD_ENVIRON};
use serde::{Deserialize, Serialize};

use crate::session::OrphanPolicy;

/// Typed view of the merged configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Shell used to run job commands (default: /bin/sh)
    pub shell: PathBuf,

    /// Seconds between SIGTERM and SIGKILL on cancellation (default: 5)
    pub termination_grace_seconds: u64,

    /// Directory holding one subdirectory per session
    /// (default: ./.certlane/sessions)
    pub session_root: PathBuf,

    /// Provider directories loaded in addition to `--provider`
    pub provider_dirs: Vec<PathBuf>,

    /// Fate of jobs generated by a local job that left the run list
    /// (default: retain)
    pub orphan_policy: OrphanPolicy,

    /// Variables passed from the environment to every job
    pub environ: Vec<String>,

    /// Variables set for every job
    pub env: BTreeMap<String, String>,

    /// Log filter used when RUST_LOG is unset (default: certlane=info)
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            termination_grace_seconds: 5,
            session_root: PathBuf::from("./.certlane/sessions"),
            provider_dirs: Vec::new(),
            orphan_policy: OrphanPolicy::Retain,
            environ: STANDARD_ENVIRON.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::new(),
            log_level: "certlane=info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "shell": self.shell,
            "termination_grace_seconds": self.termination_grace_seconds,
            "session_root": self.session_root,
            "provider_dirs": self.provider_dirs,
            "orphan_policy": self.orphan_policy,
            "environ": self.environ,
            "env": self.env,
            "log_level": self.log_level,
        })
    }

    /// Runner settings for jobs whose I/O logs go to `io_log_dir`.
    pub fn runner_config(&self, io_log_dir: impl Into<PathBuf>) -> RunnerConfig {
        let mut config = RunnerConfig::new(io_log_dir);
        config.shell = self.shell.clone();
        config.termination_grace = Duration::from_secs(self.termination_grace_seconds);
        config.standard_environ = self.environ.clone();
        config.extra_env = self.env.clone();
        config
    }
}
