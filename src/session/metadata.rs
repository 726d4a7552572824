//! Session metadata and policies.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Set while a session still has jobs to run.
pub const FLAG_INCOMPLETE: &str = "incomplete";

/// Data describing a session rather than its jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub flags: BTreeSet<String>,

    /// Job being executed when the session was last saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_job_name: Option<String>,
}

/// What happens to jobs generated by a local job that left the run list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Keep them (and their results) as undesired jobs.
    #[default]
    Retain,
    /// Remove them with their states and resource records.
    Prune,
}

impl fmt::Display for OrphanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrphanPolicy::Retain => f.write_str("retain"),
            OrphanPolicy::Prune => f.write_str("prune"),
        }
    }
}
