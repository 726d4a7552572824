//! Non-fatal problems reported by resolution, result ingestion and resume.
//!
//! A problem concerns one job (or one cycle of jobs). It never aborts the
//! processing of the rest of the catalog.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Problem {
    /// A `depends` or `requires` reference names a job that does not exist.
    UnknownJob {
        job: String,
        missing: String,
        kind: EdgeKind,
    },

    /// Jobs that (transitively) depend on themselves. Listed in
    /// traversal order, the first job repeated at the end.
    DependencyCycle { cycle: Vec<String> },

    /// `job` was dropped because `dependency` was dropped.
    DependencyExcluded { job: String, dependency: String },

    /// A desired name matches no known job.
    UnknownDesiredJob { name: String },

    /// A generated job reuses a known name with a different definition.
    DuplicateJob {
        name: String,
        via: String,
        existing_checksum: String,
        rejected_checksum: String,
    },

    /// A local job emitted a record that is not a valid job definition.
    InvalidGeneratedJob { via: String, message: String },

    /// A result was reported for a job the session does not know.
    UnknownResult { name: String },

    /// A persisted job has no counterpart in the freshly loaded catalog.
    MissingFromCatalog { name: String, checksum: String },
}

/// Which field produced a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Depends,
    Requires,
}

impl Problem {
    /// Job the problem is about, if it concerns a single job.
    pub fn job(&self) -> Option<&str> {
        match self {
            Problem::UnknownJob { job, .. } | Problem::DependencyExcluded { job, .. } => Some(job),
            Problem::UnknownDesiredJob { name }
            | Problem::DuplicateJob { name, .. }
            | Problem::UnknownResult { name }
            | Problem::MissingFromCatalog { name, .. } => Some(name),
            Problem::DependencyCycle { .. } | Problem::InvalidGeneratedJob { .. } => None,
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::UnknownJob { job, missing, kind } => match kind {
                EdgeKind::Depends => {
                    write!(f, "job '{}' depends on unknown job '{}'", job, missing)
                }
                EdgeKind::Requires => {
                    write!(f, "job '{}' requires resources from unknown job '{}'", job, missing)
                }
            },
            Problem::DependencyCycle { cycle } => {
                write!(f, "dependency cycle: {}", cycle.join(" -> "))
            }
            Problem::DependencyExcluded { job, dependency } => write!(
                f,
                "job '{}' excluded because its dependency '{}' cannot run",
                job, dependency
            ),
            Problem::UnknownDesiredJob { name } => {
                write!(f, "selected job '{}' does not exist", name)
            }
            Problem::DuplicateJob { name, via, .. } => write!(
                f,
                "job '{}' generated by '{}' conflicts with an existing definition",
                name, via
            ),
            Problem::InvalidGeneratedJob { via, message } => {
                write!(f, "job generated by '{}' is invalid: {}", via, message)
            }
            Problem::UnknownResult { name } => {
                write!(f, "result reported for unknown job '{}'", name)
            }
            Problem::MissingFromCatalog { name, checksum } => write!(
                f,
                "job '{}' ({}) is no longer in the catalog",
                name,
                &checksum[..checksum.len().min(12)]
            ),
        }
    }
}
