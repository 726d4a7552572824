//! Session state and readiness engine
//!
//! A session owns every known job definition (the catalog plus jobs
//! generated by local jobs), the desired job list, the resolved run list,
//! one [`JobState`] per job and the resource records produced so far.
//!
//! The session is single-writer: one control loop calls
//! [`SessionState::update_desired_job_list`] and
//! [`SessionState::update_job_result`]. Neither ever fails for problems
//! concerning individual jobs; those are returned as [`Problem`] values.

mod index;
mod metadata;
mod state;

pub use metadata::{OrphanPolicy, SessionMetadata, FLAG_INCOMPLETE};
pub use state::{InhibitionCause, Inhibitor, JobState};

pub(crate) use index::{Insertion, JobIndex};

use std::collections::{BTreeMap, BTreeSet, HashSet};

use certlane_expr::Evaluation;
use certlane_model::{JobDefinition, JobResult, Outcome, Plugin, Record, ResourceMap};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::problem::Problem;
use crate::qualifier::{get_matching_job_list, JobQualifier, Qualifier};
use crate::resolver::resolve;

/// Errors creating a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("job '{name}' is defined twice with different content ({first} vs {second})")]
    DuplicateJob {
        name: String,
        first: String,
        second: String,
    },
}

/// The mutable aggregate driving a test session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub(crate) session_id: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) metadata: SessionMetadata,
    pub(crate) index: JobIndex,
    pub(crate) desired: Vec<String>,
    pub(crate) run_list: Vec<String>,
    pub(crate) job_state_map: BTreeMap<String, JobState>,
    pub(crate) resource_map: ResourceMap,
    pub(crate) selection: Option<Qualifier>,
    pub(crate) orphan_policy: OrphanPolicy,
    pub(crate) problems: Vec<Problem>,
}

impl SessionState {
    /// Start a session over `jobs`. Identical definitions listed twice are
    /// kept once; two different definitions sharing a name are an error.
    pub fn new(jobs: Vec<JobDefinition>) -> Result<Self, SessionError> {
        let mut index = JobIndex::default();
        let mut job_state_map = BTreeMap::new();
        for job in jobs {
            let name = job.name().to_string();
            let checksum = job.checksum().to_string();
            match index.insert(job) {
                Insertion::Added => {
                    job_state_map.insert(name.clone(), JobState::new(name, checksum));
                }
                Insertion::Duplicate => debug!(job = %name, "skipping identical duplicate"),
                Insertion::Conflict { existing_checksum } => {
                    return Err(SessionError::DuplicateJob {
                        name,
                        first: existing_checksum,
                        second: checksum,
                    });
                }
            }
        }

        Ok(Self {
            session_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            metadata: SessionMetadata::default(),
            index,
            desired: Vec::new(),
            run_list: Vec::new(),
            job_state_map,
            resource_map: ResourceMap::new(),
            selection: None,
            orphan_policy: OrphanPolicy::default(),
            problems: Vec::new(),
        })
    }

    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut SessionMetadata {
        &mut self.metadata
    }

    pub fn orphan_policy(&self) -> OrphanPolicy {
        self.orphan_policy
    }

    /// Every known job, catalog jobs first, generated jobs in discovery order.
    pub fn job_list(&self) -> &[JobDefinition] {
        self.index.jobs()
    }

    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.index.get(name)
    }

    pub fn desired_job_list(&self) -> &[String] {
        &self.desired
    }

    /// Jobs to execute, dependencies first.
    pub fn run_list(&self) -> Vec<&JobDefinition> {
        self.run_list
            .iter()
            .filter_map(|name| self.index.get(name))
            .collect()
    }

    pub fn run_list_names(&self) -> &[String] {
        &self.run_list
    }

    pub fn job_state_map(&self) -> &BTreeMap<String, JobState> {
        &self.job_state_map
    }

    pub fn job_state(&self, name: &str) -> Option<&JobState> {
        self.job_state_map.get(name)
    }

    pub fn resource_map(&self) -> &ResourceMap {
        &self.resource_map
    }

    pub fn selection(&self) -> Option<&Qualifier> {
        self.selection.as_ref()
    }

    /// Problems from the latest resolution.
    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// Store `qualifier` and desire every job it designates. The qualifier
    /// is re-applied whenever local jobs add definitions.
    pub fn select(&mut self, qualifier: Qualifier) -> Vec<Problem> {
        let desired = self.matching_names(&qualifier);
        self.selection = Some(qualifier);
        self.apply_desired(&desired)
    }

    /// Replace the desired job list, re-resolve and recompute every job's
    /// readiness. Returns the resolution problems. An explicit list drops
    /// any stored selection, so generated jobs no longer extend it.
    pub fn update_desired_job_list(&mut self, desired: &[String]) -> Vec<Problem> {
        if self.selection.take().is_some() {
            debug!("selection replaced by an explicit desired list");
        }
        self.apply_desired(desired)
    }

    pub(crate) fn apply_desired(&mut self, desired: &[String]) -> Vec<Problem> {
        let mut unique = Vec::with_capacity(desired.len());
        for name in desired {
            if !unique.contains(name) {
                unique.push(name.clone());
            }
        }

        let mut resolution = resolve(self.index.jobs(), &unique);
        if self.orphan_policy == OrphanPolicy::Prune {
            while self.prune_orphans(&resolution.run_list) {
                resolution = resolve(self.index.jobs(), &unique);
            }
        }

        self.desired = unique
            .into_iter()
            .filter(|name| self.index.contains(name))
            .collect();
        self.run_list = resolution.run_list;
        self.problems = resolution.problems.clone();
        self.recompute_all();

        for problem in &resolution.problems {
            warn!(%problem, "resolution problem");
        }
        info!(
            desired = self.desired.len(),
            run_list = self.run_list.len(),
            "run list updated"
        );
        resolution.problems
    }

    /// Record the result of a job and update readiness of everything that
    /// depends on it. Results of local jobs may add jobs to the session, in
    /// which case the selection is re-applied and the run list re-resolved.
    pub fn update_job_result(&mut self, name: &str, result: JobResult) -> Vec<Problem> {
        let Some(state) = self.job_state_map.get_mut(name) else {
            warn!(job = %name, "result for unknown job");
            return vec![Problem::UnknownResult {
                name: name.to_string(),
            }];
        };
        if state.result == result {
            debug!(job = %name, "result unchanged");
            return Vec::new();
        }

        let outcome = result.outcome;
        let generated = (outcome == Outcome::Pass).then(|| result.generated.clone());
        if outcome.is_terminal() {
            self.resource_map
                .insert(name.to_string(), result.resources.clone());
        } else {
            self.resource_map.remove(name);
        }
        state.result = result;
        debug!(job = %name, %outcome, "result stored");

        let mut problems = Vec::new();
        let is_local = self.index.get(name).map(JobDefinition::plugin) == Some(Plugin::Local);
        let mut added = 0;
        if let (true, Some(records)) = (is_local, generated) {
            added = self.ingest_generated(name, &records, &mut problems);
        }

        if added > 0 {
            info!(job = %name, added, "local job added definitions");
            let desired = match &self.selection {
                Some(qualifier) => self.matching_names(qualifier),
                None => self.desired.clone(),
            };
            problems.extend(self.apply_desired(&desired));
        } else {
            self.recompute_dependents(name);
        }
        problems
    }

    /// Total estimated seconds of `(automated, interactive)` run-list jobs.
    /// A class is `None` when any of its jobs has no estimate.
    pub fn estimated_duration(&self) -> (Option<f64>, Option<f64>) {
        let mut automated = Some(0.0);
        let mut manual = Some(0.0);
        for job in self.run_list() {
            let slot = if job.plugin().is_interactive() {
                &mut manual
            } else {
                &mut automated
            };
            *slot = match (*slot, job.estimated_duration()) {
                (Some(total), Some(secs)) => Some(total + secs),
                _ => None,
            };
        }
        (automated, manual)
    }

    /// First run-list job that has not run and can start.
    pub fn next_runnable_job(&self) -> Option<&JobDefinition> {
        self.run_list
            .iter()
            .filter(|name| {
                self.job_state_map
                    .get(*name)
                    .map(|s| s.outcome() == Outcome::None && s.can_start())
                    .unwrap_or(false)
            })
            .find_map(|name| self.index.get(name))
    }

    /// Run-list jobs without a terminal result.
    pub fn pending_jobs(&self) -> Vec<&JobState> {
        self.run_list
            .iter()
            .filter_map(|name| self.job_state_map.get(name))
            .filter(|s| s.outcome() == Outcome::None)
            .collect()
    }

    fn matching_names(&self, qualifier: &Qualifier) -> Vec<String> {
        get_matching_job_list(self.index.jobs(), qualifier)
            .into_iter()
            .map(|job| job.name().to_string())
            .collect()
    }

    /// Add definitions emitted by local job `via`. Returns how many were new.
    pub(crate) fn ingest_generated(
        &mut self,
        via: &str,
        records: &[Record],
        problems: &mut Vec<Problem>,
    ) -> usize {
        let mut added = 0;
        for record in records {
            let job = match JobDefinition::from_record(record) {
                Ok(job) => job.with_via(via),
                Err(e) => {
                    warn!(job = %via, error = %e, "invalid generated job");
                    problems.push(Problem::InvalidGeneratedJob {
                        via: via.to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            let name = job.name().to_string();
            let checksum = job.checksum().to_string();
            match self.index.insert(job) {
                Insertion::Added => {
                    debug!(job = %name, via = %via, "generated job added");
                    self.job_state_map
                        .insert(name.clone(), JobState::new(name, checksum));
                    added += 1;
                }
                Insertion::Duplicate => {}
                Insertion::Conflict { existing_checksum } => {
                    warn!(job = %name, via = %via, "generated job conflicts with existing definition");
                    problems.push(Problem::DuplicateJob {
                        name,
                        via: via.to_string(),
                        existing_checksum,
                        rejected_checksum: checksum,
                    });
                }
            }
        }
        added
    }

    /// Remove jobs generated (directly or not) by local jobs outside
    /// `run_list`, and reset those local jobs so they run again once
    /// selected. Returns whether anything was removed.
    fn prune_orphans(&mut self, run_list: &[String]) -> bool {
        let scheduled: HashSet<&str> = run_list.iter().map(String::as_str).collect();
        let mut parents: Vec<String> = self
            .index
            .jobs()
            .iter()
            .filter(|job| job.plugin() == Plugin::Local && !scheduled.contains(job.name()))
            .map(|job| job.name().to_string())
            .collect();

        let mut doomed: BTreeSet<String> = BTreeSet::new();
        while let Some(parent) = parents.pop() {
            for job in self.index.jobs() {
                if job.via() == Some(parent.as_str()) && doomed.insert(job.name().to_string()) {
                    parents.push(job.name().to_string());
                }
            }
        }
        if doomed.is_empty() {
            return false;
        }

        let vias: BTreeSet<String> = doomed
            .iter()
            .filter_map(|name| self.index.get(name).and_then(JobDefinition::via))
            .filter(|via| !doomed.contains(*via))
            .map(str::to_string)
            .collect();
        for via in vias {
            if let Some(state) = self.job_state_map.get_mut(&via) {
                state.result = JobResult::default();
            }
            self.resource_map.remove(&via);
        }

        let doomed: Vec<String> = doomed.into_iter().collect();
        for name in &doomed {
            info!(job = %name, "pruning orphaned generated job");
            self.job_state_map.remove(name);
            self.resource_map.remove(name);
        }
        self.index.remove(&doomed);
        true
    }

    fn recompute_all(&mut self) {
        let names: Vec<String> = self.job_state_map.keys().cloned().collect();
        self.recompute(&names);
    }

    /// Recompute `name` and every job that transitively depends on it.
    fn recompute_dependents(&mut self, name: &str) {
        let mut affected: BTreeSet<String> = BTreeSet::new();
        let mut queue = vec![name.to_string()];
        while let Some(current) = queue.pop() {
            for job in self.index.jobs() {
                let needs = job.depends().iter().any(|d| *d == current)
                    || job.resource_names().iter().any(|r| *r == current);
                if needs && affected.insert(job.name().to_string()) {
                    queue.push(job.name().to_string());
                }
            }
        }
        affected.insert(name.to_string());
        let names: Vec<String> = affected.into_iter().collect();
        self.recompute(&names);
    }

    fn recompute(&mut self, names: &[String]) {
        let scheduled: HashSet<&str> = self.run_list.iter().map(String::as_str).collect();
        let mut updates = Vec::with_capacity(names.len());
        for name in names {
            let Some(job) = self.index.get(name) else {
                continue;
            };
            let inhibitors = if scheduled.contains(name.as_str()) {
                self.inhibitors_for(job)
            } else {
                vec![Inhibitor::undesired()]
            };
            updates.push((name, inhibitors));
        }
        for (name, inhibitors) in updates {
            if let Some(state) = self.job_state_map.get_mut(name) {
                state.set_inhibitors(inhibitors);
            }
        }
    }

    fn inhibitors_for(&self, job: &JobDefinition) -> Vec<Inhibitor> {
        let mut inhibitors = Vec::new();
        for dep in job.depends() {
            let outcome = self
                .job_state_map
                .get(dep)
                .map(JobState::outcome)
                .unwrap_or_default();
            match outcome {
                Outcome::None => inhibitors.push(Inhibitor::dependency(
                    InhibitionCause::PendingDep,
                    dep.as_str(),
                )),
                Outcome::Pass => {}
                _ => inhibitors.push(Inhibitor::dependency(
                    InhibitionCause::FailedDep,
                    dep.as_str(),
                )),
            }
        }

        if let Some(program) = job.requires() {
            for (expression, evaluation) in program.evaluate_each(&self.resource_map) {
                let text = expression.text();
                match evaluation {
                    Evaluation::True => {}
                    Evaluation::Pending { job } => inhibitors.push(Inhibitor::resource(
                        InhibitionCause::PendingResource,
                        job,
                        text,
                    )),
                    Evaluation::NoRecords { job } => inhibitors.push(Inhibitor::resource(
                        InhibitionCause::FailedResource,
                        job,
                        text,
                    )),
                    Evaluation::False => {
                        let related = expression
                            .resource_names()
                            .first()
                            .cloned()
                            .unwrap_or_default();
                        inhibitors.push(Inhibitor::resource(
                            InhibitionCause::FailedResource,
                            related,
                            text,
                        ));
                    }
                }
            }
        }
        inhibitors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certlane_model::{load_catalog, ResourceRecord};

    fn record(pairs: &[(&str, &str)]) -> ResourceRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn session(text: &str) -> SessionState {
        SessionState::new(load_catalog(text, "test").unwrap()).unwrap()
    }

    const CATALOG: &str = "\
name: device
plugin: resource
command: echo category: USB

name: usb/detect
command: true
requires: device.category == 'USB'

name: usb/copy
command: true
depends: usb/detect
";

    #[test]
    fn test_new_session_everything_undesired() {
        let s = session(CATALOG);
        assert!(s.run_list().is_empty());
        assert_eq!(s.job_state_map().len(), 3);
        for state in s.job_state_map().values() {
            assert_eq!(state.inhibitors(), &[Inhibitor::undesired()]);
        }
    }

    #[test]
    fn test_conflicting_duplicate_rejected() {
        let a = JobDefinition::builder("a").command("true").build().unwrap();
        let b = JobDefinition::builder("a").command("false").build().unwrap();
        let err = SessionState::new(vec![a.clone(), b]).unwrap_err();
        assert!(matches!(err, SessionError::DuplicateJob { .. }));

        let s = SessionState::new(vec![a.clone(), a]).unwrap();
        assert_eq!(s.job_list().len(), 1);
    }

    #[test]
    fn test_pending_dependency_then_failed() {
        let mut s = session(CATALOG);
        s.update_desired_job_list(&names(&["usb/copy"]));
        let run: Vec<&str> = s.run_list().iter().map(|j| j.name()).collect();
        assert_eq!(run, vec!["device", "usb/detect", "usb/copy"]);

        let copy = s.job_state("usb/copy").unwrap();
        assert!(copy.has_cause(InhibitionCause::PendingDep));

        s.update_job_result("device", JobResult::new(Outcome::Pass).with_resources(vec![
            record(&[("category", "USB")]),
        ]));
        s.update_job_result("usb/detect", JobResult::new(Outcome::Fail));
        let copy = s.job_state("usb/copy").unwrap();
        assert!(copy.has_cause(InhibitionCause::FailedDep));
        assert!(!copy.has_cause(InhibitionCause::PendingDep));
    }

    #[test]
    fn test_next_runnable_job_follows_results() {
        let mut s = session(CATALOG);
        s.update_desired_job_list(&names(&["usb/copy"]));
        assert_eq!(s.next_runnable_job().map(|j| j.name()), Some("device"));

        s.update_job_result("device", JobResult::new(Outcome::Pass).with_resources(vec![
            record(&[("category", "USB")]),
        ]));
        assert_eq!(s.next_runnable_job().map(|j| j.name()), Some("usb/detect"));

        s.update_job_result("usb/detect", JobResult::new(Outcome::Pass));
        assert_eq!(s.next_runnable_job().map(|j| j.name()), Some("usb/copy"));

        s.update_job_result("usb/copy", JobResult::new(Outcome::Pass));
        assert!(s.next_runnable_job().is_none());
        assert!(s.pending_jobs().is_empty());
    }

    #[test]
    fn test_unknown_result() {
        let mut s = session(CATALOG);
        let problems = s.update_job_result("ghost", JobResult::new(Outcome::Pass));
        assert_eq!(problems, vec![Problem::UnknownResult { name: "ghost".into() }]);
    }

    #[test]
    fn test_select_stores_qualifier() {
        let mut s = session(CATALOG);
        let problems = s.select(Qualifier::regex("usb/.*").unwrap());
        assert!(problems.is_empty());
        assert_eq!(s.desired_job_list(), &names(&["usb/detect", "usb/copy"])[..]);
        assert_eq!(s.run_list_names().len(), 3);
        assert!(s.selection().is_some());
    }

    #[test]
    fn test_estimated_duration() {
        let jobs = vec![
            JobDefinition::builder("a")
                .command("true")
                .estimated_duration(1.5)
                .build()
                .unwrap(),
            JobDefinition::builder("b")
                .plugin(Plugin::Manual)
                .estimated_duration(30.0)
                .build()
                .unwrap(),
            JobDefinition::builder("c").command("true").build().unwrap(),
        ];
        let mut s = SessionState::new(jobs).unwrap();
        s.update_desired_job_list(&names(&["a", "b"]));
        assert_eq!(s.estimated_duration(), (Some(1.5), Some(30.0)));
        s.update_desired_job_list(&names(&["a", "b", "c"]));
        assert_eq!(s.estimated_duration(), (None, Some(30.0)));
    }

    #[test]
    fn test_local_job_adds_definitions() {
        let mut s = session(
            "name: gen\nplugin: local\ncommand: cat jobs.txt\n\nname: other\ncommand: true\n",
        );
        s.select(Qualifier::regex("gen|child/.*").unwrap());
        assert_eq!(s.run_list_names(), &names(&["gen"])[..]);

        let generated =
            certlane_model::parse_records("name: child/one\ncommand: true\n", "gen").unwrap();
        let problems = s.update_job_result(
            "gen",
            JobResult::new(Outcome::Pass).with_generated(generated.clone()),
        );
        assert!(problems.is_empty());
        assert_eq!(s.run_list_names(), &names(&["gen", "child/one"])[..]);
        assert_eq!(s.job("child/one").and_then(|j| j.via()), Some("gen"));
        assert!(s.job_state("child/one").unwrap().can_start());
    }

    #[test]
    fn test_generated_conflict_reported() {
        let mut s = session("name: gen\nplugin: local\ncommand: x\n\nname: other\ncommand: true\n");
        s.update_desired_job_list(&names(&["gen"]));
        let generated =
            certlane_model::parse_records("name: other\ncommand: false\n\ncommand: x\n", "gen")
                .unwrap();
        let problems =
            s.update_job_result("gen", JobResult::new(Outcome::Pass).with_generated(generated));
        assert_eq!(problems.len(), 2);
        assert!(matches!(problems[0], Problem::DuplicateJob { .. }));
        assert!(matches!(problems[1], Problem::InvalidGeneratedJob { .. }));
        assert_eq!(s.job("other").and_then(|j| j.command()), Some("true"));
    }
}
