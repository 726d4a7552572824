//! Hooks for operator interaction and live output.

use certlane_model::{IoStream, JobDefinition, JobResult, Outcome};

/// An operator's answer for an interactive job.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorVerdict {
    pub outcome: Outcome,
    pub comments: Option<String>,
}

impl OperatorVerdict {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            comments: None,
        }
    }
}

/// Talks to the human in front of the machine under test.
///
/// Without a delegate, interactive jobs finish with outcome `skip`.
pub trait OperatorDelegate: Send + Sync {
    /// `manual` jobs: the operator performs the test and reports the outcome.
    fn perform(&self, job: &JobDefinition) -> OperatorVerdict;

    /// `user-interact` jobs: called before the command runs. Returning
    /// false skips the job.
    fn interact(&self, job: &JobDefinition) -> bool;

    /// `user-verify` jobs: called after the command ran, with its result.
    fn verify(&self, job: &JobDefinition, command_result: &JobResult) -> OperatorVerdict;
}

/// Receives job output lines as they are produced.
pub trait LineSink: Send + Sync {
    fn line(&self, job: &str, stream: IoStream, line: &str);
}
