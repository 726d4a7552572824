//! Per-job readiness state
//!
//! Inhibitors are always rebuilt from scratch against the current run list,
//! results and resource records. A job can start iff it has none.

use std::fmt;

use certlane_model::{JobResult, Outcome};
use serde::{Deserialize, Serialize};

/// Why a job cannot start. Ordered by precedence in descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InhibitionCause {
    /// Not in the run list
    Undesired,
    /// A dependency has not produced a result
    PendingDep,
    /// A dependency finished without passing
    FailedDep,
    /// A resource job has not run
    PendingResource,
    /// A requirement does not hold for the available records
    FailedResource,
}

impl InhibitionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            InhibitionCause::Undesired => "UNDESIRED",
            InhibitionCause::PendingDep => "PENDING_DEP",
            InhibitionCause::FailedDep => "FAILED_DEP",
            InhibitionCause::PendingResource => "PENDING_RESOURCE",
            InhibitionCause::FailedResource => "FAILED_RESOURCE",
        }
    }

    /// Waiting on something that may still happen.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            InhibitionCause::PendingDep | InhibitionCause::PendingResource
        )
    }

    /// Can never clear for the current results.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            InhibitionCause::FailedDep | InhibitionCause::FailedResource
        )
    }
}

impl fmt::Display for InhibitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reason a job cannot start. `related_job` is a name, never a handle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Inhibitor {
    pub cause: InhibitionCause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_job: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_expression: Option<String>,
}

impl Inhibitor {
    pub fn undesired() -> Self {
        Self {
            cause: InhibitionCause::Undesired,
            related_job: None,
            related_expression: None,
        }
    }

    pub fn dependency(cause: InhibitionCause, job: impl Into<String>) -> Self {
        Self {
            cause,
            related_job: Some(job.into()),
            related_expression: None,
        }
    }

    pub fn resource(
        cause: InhibitionCause,
        job: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            cause,
            related_job: Some(job.into()),
            related_expression: Some(expression.into()),
        }
    }
}

impl fmt::Display for Inhibitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let job = self.related_job.as_deref().unwrap_or("?");
        let expr = self.related_expression.as_deref().unwrap_or("?");
        match self.cause {
            InhibitionCause::Undesired => write!(f, "job is not selected"),
            InhibitionCause::PendingDep => {
                write!(f, "required dependency '{}' has not run yet", job)
            }
            InhibitionCause::FailedDep => {
                write!(f, "required dependency '{}' did not pass", job)
            }
            InhibitionCause::PendingResource => write!(
                f,
                "resource job '{}' has not run yet, needed by '{}'",
                job, expr
            ),
            InhibitionCause::FailedResource => {
                write!(f, "resource expression '{}' evaluates to false", expr)
            }
        }
    }
}

/// Result and readiness of one job, keyed by name in the session.
#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub(crate) name: String,
    pub(crate) checksum: String,
    pub(crate) result: JobResult,
    pub(crate) inhibitors: Vec<Inhibitor>,
}

impl JobState {
    pub(crate) fn new(name: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checksum: checksum.into(),
            result: JobResult::default(),
            inhibitors: vec![Inhibitor::undesired()],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checksum of the definition this state belongs to.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn result(&self) -> &JobResult {
        &self.result
    }

    pub fn outcome(&self) -> Outcome {
        self.result.outcome
    }

    /// Sorted, without duplicates.
    pub fn inhibitors(&self) -> &[Inhibitor] {
        &self.inhibitors
    }

    pub fn has_cause(&self, cause: InhibitionCause) -> bool {
        self.inhibitors.iter().any(|i| i.cause == cause)
    }

    pub fn can_start(&self) -> bool {
        self.inhibitors.is_empty()
    }

    pub fn readiness_description(&self) -> String {
        if self.can_start() {
            return "job can be started".to_string();
        }
        let reasons: Vec<String> = self.inhibitors.iter().map(ToString::to_string).collect();
        format!("job cannot be started: {}", reasons.join(", "))
    }

    pub(crate) fn set_inhibitors(&mut self, mut inhibitors: Vec<Inhibitor>) {
        inhibitors.sort();
        inhibitors.dedup();
        self.inhibitors = inhibitors;
    }
}
