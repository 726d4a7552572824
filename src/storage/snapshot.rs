//! Persisted form of a session and the save/resume operations.
//!
//! Only results are stored. Definitions always come from a freshly loaded
//! catalog; a stored result is rebound to the definition with the same name
//! and checksum or dropped with a problem.

use std::collections::BTreeMap;

use certlane_model::{JobResult, Outcome, Plugin};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::PersistenceError;
use crate::problem::Problem;
use crate::qualifier::Qualifier;
use crate::session::{SessionMetadata, SessionState};

/// Schema version for session.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "certlane/session@1";

/// Stored result of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedJob {
    pub checksum: String,
    pub result: JobResult,
}

/// session.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    pub session_id: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub metadata: SessionMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Qualifier>,

    /// Checksums of the desired jobs, in order.
    pub desired_job_list: Vec<String>,

    /// Terminal results by job name.
    pub job_state_map: BTreeMap<String, PersistedJob>,
}

impl SessionSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse and check the schema.
    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        let snapshot: Self = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> Result<(), PersistenceError> {
        if self.schema_version != SCHEMA_VERSION || self.schema_id != SCHEMA_ID {
            return Err(PersistenceError::UnsupportedSchema {
                version: self.schema_version,
                id: self.schema_id.clone(),
            });
        }
        for (name, job) in &self.job_state_map {
            if !job.result.outcome.is_terminal() {
                return Err(PersistenceError::Inconsistent(format!(
                    "job '{}' is stored without a terminal outcome",
                    name
                )));
            }
        }
        Ok(())
    }

    fn name_for_checksum(&self, checksum: &str) -> Option<&str> {
        self.job_state_map
            .iter()
            .find(|(_, job)| job.checksum == checksum)
            .map(|(name, _)| name.as_str())
    }
}

impl SessionState {
    /// Capture everything needed to resume this session later.
    pub fn persistent_save(&self) -> SessionSnapshot {
        let desired_job_list = self
            .desired
            .iter()
            .filter_map(|name| self.index.get(name))
            .map(|job| job.checksum().to_string())
            .collect();
        let job_state_map = self
            .job_state_map
            .iter()
            .filter(|(_, state)| state.outcome().is_terminal())
            .map(|(name, state)| {
                (
                    name.clone(),
                    PersistedJob {
                        checksum: state.checksum().to_string(),
                        result: state.result().clone(),
                    },
                )
            })
            .collect();

        SessionSnapshot {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
            metadata: self.metadata.clone(),
            selection: self.selection.clone(),
            desired_job_list,
            job_state_map,
        }
    }

    /// Restore `snapshot` into this session, which must be freshly created
    /// from the current catalog and have no results yet.
    ///
    /// Jobs generated by local jobs are recreated by replaying the stored
    /// output of those local jobs. Stored results without a matching
    /// definition are dropped and reported.
    pub fn resume(&mut self, snapshot: &SessionSnapshot) -> Result<Vec<Problem>, PersistenceError> {
        snapshot.validate()?;
        if self
            .job_state_map
            .values()
            .any(|state| state.outcome().is_terminal())
        {
            return Err(PersistenceError::Inconsistent(
                "cannot resume into a session that already has results".to_string(),
            ));
        }

        let mut problems = Vec::new();
        self.replay_generated(snapshot, &mut problems);

        for (name, persisted) in &snapshot.job_state_map {
            let bound = self
                .index
                .get(name)
                .map(|job| job.checksum() == persisted.checksum)
                .unwrap_or(false);
            if !bound {
                warn!(job = %name, "stored result has no matching definition");
                problems.push(Problem::MissingFromCatalog {
                    name: name.clone(),
                    checksum: persisted.checksum.clone(),
                });
                continue;
            }
            if let Some(state) = self.job_state_map.get_mut(name) {
                state.result = persisted.result.clone();
            }
            self.resource_map
                .insert(name.clone(), persisted.result.resources.clone());
        }

        let mut desired = Vec::with_capacity(snapshot.desired_job_list.len());
        for checksum in &snapshot.desired_job_list {
            match self.index.get_by_checksum(checksum) {
                Some(job) => desired.push(job.name().to_string()),
                None => {
                    let problem = Problem::MissingFromCatalog {
                        name: snapshot
                            .name_for_checksum(checksum)
                            .unwrap_or(checksum.as_str())
                            .to_string(),
                        checksum: checksum.clone(),
                    };
                    if !problems.contains(&problem) {
                        problems.push(problem);
                    }
                }
            }
        }

        self.session_id = snapshot.session_id.clone();
        self.created_at = snapshot.created_at;
        self.metadata = snapshot.metadata.clone();
        self.selection = snapshot.selection.clone();
        problems.extend(self.apply_desired(&desired));

        info!(
            session = %self.session_id,
            results = snapshot.job_state_map.len(),
            problems = problems.len(),
            "session resumed"
        );
        Ok(problems)
    }

    /// Re-ingest output of passed local jobs until no new jobs appear.
    fn replay_generated(&mut self, snapshot: &SessionSnapshot, problems: &mut Vec<Problem>) {
        loop {
            let mut added = 0;
            for (name, persisted) in &snapshot.job_state_map {
                if persisted.result.outcome != Outcome::Pass || persisted.result.generated.is_empty()
                {
                    continue;
                }
                let matches = self
                    .index
                    .get(name)
                    .map(|job| {
                        job.plugin() == Plugin::Local && job.checksum() == persisted.checksum
                    })
                    .unwrap_or(false);
                if matches {
                    let mut found = Vec::new();
                    added += self.ingest_generated(name, &persisted.result.generated, &mut found);
                    for problem in found {
                        if !problems.contains(&problem) {
                            problems.push(problem);
                        }
                    }
                }
            }
            if added == 0 {
                break;
            }
        }
    }
}
