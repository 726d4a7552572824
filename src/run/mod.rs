//! Session control loop
//!
//! The driver is the single writer of a [`SessionState`]:
//! - picks the next runnable job from the run list
//! - runs it on a worker thread and waits on a channel for the result
//! - feeds the result back with `update_job_result`
//! - saves the session after every job
//!
//! Jobs that can never start (a dependency did not pass, a requirement does
//! not hold) are finished as `not-supported` with the readiness description
//! as comment, so every run-list job ends with a terminal outcome.

pub mod report;

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use certlane_model::{JobDefinition, JobResult, Outcome, Plugin};
use certlane_runner::JobRunner;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::problem::Problem;
use crate::session::{SessionState, FLAG_INCOMPLETE};
use crate::signal::SignalState;
use crate::storage::{PersistenceError, SessionStorage};

/// How often the control loop checks for a second interrupt while a job runs
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from the control loop
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// What a `run_all` pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Jobs given a result during this pass, in order.
    pub results: Vec<(String, Outcome)>,
    /// Problems reported while ingesting results.
    pub problems: Vec<Problem>,
    /// Stopped by a signal before the run list was exhausted.
    pub interrupted: bool,
}

impl RunSummary {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|(_, o)| *o == outcome).count()
    }

    /// Nothing failed or crashed.
    pub fn is_success(&self) -> bool {
        !self.interrupted
            && self
                .results
                .iter()
                .all(|(_, o)| !matches!(o, Outcome::Fail | Outcome::Crash))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Session Summary ===")?;
        writeln!(f)?;
        for outcome in [
            Outcome::Pass,
            Outcome::Fail,
            Outcome::Skip,
            Outcome::NotSupported,
            Outcome::NotImplemented,
            Outcome::Crash,
        ] {
            let count = self.count(outcome);
            if count > 0 {
                writeln!(f, "{:>16}: {}", outcome.as_str(), count)?;
            }
        }
        if !self.problems.is_empty() {
            writeln!(f)?;
            writeln!(f, "Problems ({}):", self.problems.len())?;
            for problem in &self.problems {
                writeln!(f, "  * {}", problem)?;
            }
        }
        if self.interrupted {
            writeln!(f)?;
            writeln!(f, "Interrupted: the session can be resumed")?;
        }
        Ok(())
    }
}

/// Drives a session to completion.
pub struct SessionDriver {
    session: SessionState,
    runner: Arc<JobRunner>,
    storage: Option<SessionStorage>,
    signals: Option<Arc<SignalState>>,
}

impl SessionDriver {
    pub fn new(session: SessionState, runner: JobRunner) -> Self {
        Self {
            session,
            runner: Arc::new(runner),
            storage: None,
            signals: None,
        }
    }

    /// Save to `storage` after every job.
    pub fn with_storage(mut self, storage: SessionStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_signals(mut self, signals: Arc<SignalState>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn into_session(self) -> SessionState {
        self.session
    }

    pub fn save(&self) -> Result<(), RunError> {
        if let Some(storage) = &self.storage {
            storage.save(&self.session.persistent_save())?;
            debug!(path = %storage.session_file().display(), "session saved");
        }
        Ok(())
    }

    /// Run every runnable job of the run list until none is left or a
    /// signal arrives.
    pub fn run_all(&mut self) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();
        self.recover_interrupted_job(&mut summary);
        self.session
            .metadata_mut()
            .flags
            .insert(FLAG_INCOMPLETE.to_string());
        self.save()?;

        loop {
            self.finish_blocked_jobs(&mut summary);
            if self.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            let Some(job) = self.session.next_runnable_job().cloned() else {
                break;
            };
            if !self.execute(&job, &mut summary)? {
                summary.interrupted = true;
                break;
            }
        }

        if !summary.interrupted && self.session.pending_jobs().is_empty() {
            self.session.metadata_mut().flags.remove(FLAG_INCOMPLETE);
        }
        self.save()?;
        info!(
            executed = summary.results.len(),
            interrupted = summary.interrupted,
            "session pass finished"
        );
        Ok(summary)
    }

    /// Run ready local jobs until none is left, so that every job they
    /// generate is known. Other jobs are not run.
    pub fn run_local_jobs(&mut self) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();
        loop {
            if self.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            let next = self
                .session
                .run_list()
                .into_iter()
                .find(|job| {
                    job.plugin() == Plugin::Local
                        && self
                            .session
                            .job_state(job.name())
                            .map(|s| s.outcome() == Outcome::None && s.can_start())
                            .unwrap_or(false)
                })
                .cloned();
            let Some(job) = next else {
                break;
            };
            if !self.execute(&job, &mut summary)? {
                summary.interrupted = true;
                break;
            }
        }
        self.save()?;
        Ok(summary)
    }

    /// Run one job. Returns false when the loop must stop without a result.
    fn execute(&mut self, job: &JobDefinition, summary: &mut RunSummary) -> Result<bool, RunError> {
        let name = job.name().to_string();
        self.session.metadata_mut().running_job_name = Some(name.clone());
        if let Some(signals) = &self.signals {
            signals.set_running_job(Some(&name));
        }
        self.save()?;

        let Some(result) = self.run_in_worker(job) else {
            warn!(job = %name, "abandoning running job");
            return Ok(false);
        };

        self.session.metadata_mut().running_job_name = None;
        if let Some(signals) = &self.signals {
            signals.set_running_job(None);
        }
        summary.results.push((name.clone(), result.outcome));
        summary
            .problems
            .extend(self.session.update_job_result(&name, result));
        self.save()?;
        Ok(true)
    }

    /// Hand the job to a worker thread and wait for its result. `None` means
    /// an immediate exit was requested while the job was still running.
    fn run_in_worker(&self, job: &JobDefinition) -> Option<JobResult> {
        let (tx, rx) = mpsc::channel();
        let runner = Arc::clone(&self.runner);
        let job = job.clone();
        let name = job.name().to_string();
        let handle = thread::spawn(move || {
            let result = runner.run_job(&job);
            // The receiver is gone only after an immediate exit.
            let _ = tx.send(result);
        });

        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(result) => {
                    let _ = handle.join();
                    return Some(result);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.signals.as_ref().map_or(false, |s| s.is_abandon_requested()) {
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(job = %name, "worker ended without a result");
                    let _ = handle.join();
                    return Some(
                        JobResult::new(Outcome::Crash)
                            .with_comments("worker ended without a result"),
                    );
                }
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.runner.is_cancelled()
            || self
                .signals
                .as_ref()
                .map_or(false, |s| s.is_cancel_requested())
    }

    /// A job recorded as running when the session was last saved never
    /// reported a result; it crashed with the previous process.
    fn recover_interrupted_job(&mut self, summary: &mut RunSummary) {
        let Some(name) = self.session.metadata_mut().running_job_name.take() else {
            return;
        };
        let unfinished = self
            .session
            .job_state(&name)
            .map(|s| s.outcome() == Outcome::None)
            .unwrap_or(false);
        if unfinished {
            warn!(job = %name, "job was running when the session stopped");
            let result = JobResult::new(Outcome::Crash)
                .with_comments("session was interrupted while the job was running");
            summary.results.push((name.clone(), Outcome::Crash));
            summary
                .problems
                .extend(self.session.update_job_result(&name, result));
        }
    }

    /// Give every run-list job that can no longer start a terminal result.
    fn finish_blocked_jobs(&mut self, summary: &mut RunSummary) {
        loop {
            let blocked: Vec<(String, String)> = self
                .session
                .pending_jobs()
                .into_iter()
                .filter(|s| s.inhibitors().iter().any(|i| i.cause.is_failed()))
                .map(|s| (s.name().to_string(), s.readiness_description()))
                .collect();

            let stalled = if blocked.is_empty() && self.session.next_runnable_job().is_none() {
                // Nothing runnable but jobs still waiting: nothing will
                // ever satisfy them.
                self.session
                    .pending_jobs()
                    .into_iter()
                    .filter(|s| !s.can_start())
                    .map(|s| (s.name().to_string(), s.readiness_description()))
                    .collect()
            } else {
                Vec::new()
            };

            if blocked.is_empty() && stalled.is_empty() {
                return;
            }
            for (name, description) in blocked.into_iter().chain(stalled) {
                info!(job = %name, reason = %description, "job cannot run");
                let result = JobResult::new(Outcome::NotSupported).with_comments(description);
                summary.results.push((name.clone(), Outcome::NotSupported));
                summary
                    .problems
                    .extend(self.session.update_job_result(&name, result));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certlane_model::load_catalog;
    use certlane_runner::RunnerConfig;
    use tempfile::TempDir;

    fn driver(catalog: &str, desired: &[&str], tmp: &TempDir) -> SessionDriver {
        let mut session = SessionState::new(load_catalog(catalog, "test").unwrap()).unwrap();
        let desired: Vec<String> = desired.iter().map(|s| s.to_string()).collect();
        session.update_desired_job_list(&desired);
        let runner = JobRunner::new(RunnerConfig::new(tmp.path().join("logs")));
        SessionDriver::new(session, runner)
    }

    #[test]
    fn test_run_all_in_order() {
        let tmp = TempDir::new().unwrap();
        let catalog = "name: a\ncommand: true\n\nname: b\ncommand: true\ndepends: a\n";
        let mut driver = driver(catalog, &["b"], &tmp);
        let summary = driver.run_all().unwrap();
        assert_eq!(
            summary.results,
            vec![("a".to_string(), Outcome::Pass), ("b".to_string(), Outcome::Pass)]
        );
        assert!(summary.is_success());
        assert!(!driver
            .session()
            .metadata()
            .flags
            .contains(FLAG_INCOMPLETE));
    }

    #[test]
    fn test_failed_dependency_marks_not_supported() {
        let tmp = TempDir::new().unwrap();
        let catalog = "name: a\ncommand: false\n\nname: b\ncommand: true\ndepends: a\n";
        let mut driver = driver(catalog, &["b"], &tmp);
        let summary = driver.run_all().unwrap();
        assert_eq!(summary.count(Outcome::Fail), 1);
        assert_eq!(summary.count(Outcome::NotSupported), 1);

        let b = driver.session().job_state("b").unwrap();
        assert_eq!(b.outcome(), Outcome::NotSupported);
        let comment = b.result().comments.as_deref().unwrap_or("");
        assert!(comment.contains("did not pass"));
    }

    #[test]
    fn test_resource_requirement_not_met() {
        let tmp = TempDir::new().unwrap();
        let catalog = "\
name: device
plugin: resource
command: printf 'category: NETWORK\\n'

name: usb/detect
command: true
requires: device.category == 'USB'
";
        let mut driver = driver(catalog, &["usb/detect"], &tmp);
        driver.run_all().unwrap();
        let state = driver.session().job_state("usb/detect").unwrap();
        assert_eq!(state.outcome(), Outcome::NotSupported);
        assert!(state
            .result()
            .comments
            .as_deref()
            .unwrap_or("")
            .contains("evaluates to false"));
    }

    #[test]
    fn test_saves_after_each_job() {
        let tmp = TempDir::new().unwrap();
        let mut driver = driver("name: a\ncommand: true\n", &["a"], &tmp);
        let storage = SessionStorage::create(tmp.path(), driver.session().session_id()).unwrap();
        let file = storage.session_file();
        driver = driver.with_storage(storage);
        driver.run_all().unwrap();

        let snapshot = SessionStorage::open(file.parent().unwrap())
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(snapshot.job_state_map["a"].result.outcome, Outcome::Pass);
        assert!(snapshot.metadata.running_job_name.is_none());
    }

    #[test]
    fn test_interrupted_job_recovered_as_crash() {
        let tmp = TempDir::new().unwrap();
        let mut driver = driver("name: a\ncommand: true\n\nname: b\ncommand: true\n", &["a", "b"], &tmp);
        driver.session_mut().metadata_mut().running_job_name = Some("a".to_string());
        let summary = driver.run_all().unwrap();
        assert_eq!(summary.results[0], ("a".to_string(), Outcome::Crash));
        assert_eq!(
            driver.session().job_state("b").unwrap().outcome(),
            Outcome::Pass
        );
    }

    #[test]
    fn test_cancelled_before_start() {
        let tmp = TempDir::new().unwrap();
        let mut driver = driver("name: a\ncommand: true\n", &["a"], &tmp);
        let signals = Arc::new(SignalState::new());
        signals.handle_signal();
        driver = driver.with_signals(signals);
        let summary = driver.run_all().unwrap();
        assert!(summary.interrupted);
        assert!(summary.results.is_empty());
        assert!(driver
            .session()
            .metadata()
            .flags
            .contains(FLAG_INCOMPLETE));
    }

    #[test]
    fn test_run_local_jobs_only_runs_local() {
        let tmp = TempDir::new().unwrap();
        let catalog = "\
name: gen
plugin: local
command: printf 'name: gen/child\\ncommand: true\\n'

name: plain
command: true
";
        let mut driver = driver(catalog, &[], &tmp);
        driver
            .session_mut()
            .select(crate::qualifier::Qualifier::regex("gen.*|plain").unwrap());
        let summary = driver.run_local_jobs().unwrap();
        assert_eq!(summary.results, vec![("gen".to_string(), Outcome::Pass)]);
        assert!(driver.session().job("gen/child").is_some());
        assert!(driver
            .session()
            .run_list_names()
            .iter()
            .any(|n| n == "gen/child"));
        assert_eq!(
            driver.session().job_state("plain").unwrap().outcome(),
            Outcome::None
        );
    }
}
