//! SIGINT/SIGTERM handling
//!
//! First signal: the running job is cancelled (its process group is
//! terminated), it still gets a terminal result, the session is saved and no
//! further jobs start.
//! Second signal: the control loop stops waiting and exits right after
//! saving.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

/// Exit code for an interrupted session
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Shared between the signal handler and the control loop.
#[derive(Debug)]
pub struct SignalState {
    /// Also the runner's cancellation flag.
    cancel: Arc<AtomicBool>,
    abandon: AtomicBool,
    signal_count: AtomicU8,
    running_job: Mutex<Option<String>>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::with_cancel_flag(Arc::new(AtomicBool::new(false)))
    }

    /// Drive an existing cancellation flag (typically the runner's).
    pub fn with_cancel_flag(cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel,
            abandon: AtomicBool::new(false),
            signal_count: AtomicU8::new(0),
            running_job: Mutex::new(None),
        }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_abandon_requested(&self) -> bool {
        self.abandon.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record a signal and decide what it means.
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);
        match count {
            0 => {
                self.cancel.store(true, Ordering::SeqCst);
                SignalAction::CancelJob
            }
            1 => {
                self.abandon.store(true, Ordering::SeqCst);
                SignalAction::AbandonJob
            }
            _ => SignalAction::Ignore,
        }
    }

    pub fn set_running_job(&self, name: Option<&str>) {
        if let Ok(mut job) = self.running_job.lock() {
            *job = name.map(str::to_string);
        }
    }

    pub fn running_job(&self) -> Option<String> {
        self.running_job.lock().ok().and_then(|job| job.clone())
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    CancelJob,
    AbandonJob,
    Ignore,
}

/// Installs the process signal handler.
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn with_state(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install handlers for SIGINT and SIGTERM. Call once per process.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::CancelJob => {
                let job = state.running_job().unwrap_or_else(|| "-".to_string());
                warn!(%job, "interrupt received, cancelling running job");
            }
            SignalAction::AbandonJob => {
                warn!("second interrupt received, exiting after saving the session");
            }
            SignalAction::Ignore => {}
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = SignalState::new();
        assert!(!state.is_cancel_requested());
        assert!(!state.is_abandon_requested());
        assert_eq!(state.signal_count(), 0);
    }

    #[test]
    fn test_first_signal_sets_shared_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let state = SignalState::with_cancel_flag(Arc::clone(&flag));

        assert_eq!(state.handle_signal(), SignalAction::CancelJob);
        assert!(flag.load(Ordering::SeqCst));
        assert!(state.is_cancel_requested());
        assert!(!state.is_abandon_requested());
    }

    #[test]
    fn test_second_and_third_signal() {
        let state = SignalState::new();
        state.handle_signal();
        assert_eq!(state.handle_signal(), SignalAction::AbandonJob);
        assert!(state.is_abandon_requested());
        assert_eq!(state.handle_signal(), SignalAction::Ignore);
        assert_eq!(state.signal_count(), 3);
    }

    #[test]
    fn test_running_job() {
        let state = SignalState::new();
        state.set_running_job(Some("disk/read"));
        assert_eq!(state.running_job().as_deref(), Some("disk/read"));
        state.set_running_job(None);
        assert!(state.running_job().is_none());
    }
}
