//! Job results and I/O log records.

use std::fmt;
use std::path::PathBuf;

use certlane_expr::ResourceRecord;
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Outcome of a job. `None` means the job has not run yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    #[default]
    None,
    Pass,
    Fail,
    Skip,
    NotSupported,
    NotImplemented,
    Crash,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::None => "none",
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Skip => "skip",
            Outcome::NotSupported => "not-supported",
            Outcome::NotImplemented => "not-implemented",
            Outcome::Crash => "crash",
        }
    }

    /// Any outcome other than `none` ends the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        *self != Outcome::None
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one job execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub outcome: Outcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,

    /// Wall-clock seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_duration: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_log: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,

    /// Records emitted by a resource job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceRecord>,

    /// Catalog records emitted by a local job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated: Vec<Record>,
}

impl JobResult {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            ..Default::default()
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_return_code(mut self, code: i32) -> Self {
        self.return_code = Some(code);
        self
    }

    pub fn with_resources(mut self, resources: Vec<ResourceRecord>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_generated(mut self, generated: Vec<Record>) -> Self {
        self.generated = generated;
        self
    }
}

/// Output stream tag in the I/O log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoStream {
    Stdout,
    Stderr,
}

/// One line of job output, as written to the JSON-lines I/O log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoLogRecord {
    /// Seconds since the job started.
    pub delay: f64,
    pub stream: IoStream,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_wire_names() {
        assert_eq!(
            serde_json::to_string(&Outcome::NotSupported).unwrap(),
            "\"not-supported\""
        );
        assert_eq!(
            serde_json::from_str::<Outcome>("\"none\"").unwrap(),
            Outcome::None
        );
        assert_eq!(Outcome::NotImplemented.to_string(), "not-implemented");
        assert!(!Outcome::None.is_terminal());
        assert!(Outcome::Skip.is_terminal());
    }

    #[test]
    fn test_result_skips_empty_fields() {
        let result = JobResult::new(Outcome::Pass).with_return_code(0);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "pass", "return_code": 0}));
        let back: JobResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_default_result_is_pending() {
        assert_eq!(JobResult::default().outcome, Outcome::None);
    }
}
