//! Session persistence
//!
//! Layout:
//! ```text
//! <session_root>/<session-id>/
//!   session.json     snapshot, replaced atomically on every save
//!   io-logs/         per-job I/O logs written by the runner
//! ```

mod snapshot;

pub use snapshot::{PersistedJob, SessionSnapshot, SCHEMA_ID, SCHEMA_VERSION};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::session::SessionError;

/// Snapshot file name inside a session directory
pub const SESSION_FILE: &str = "session.json";

/// I/O log directory inside a session directory
pub const IO_LOG_DIR: &str = "io-logs";

/// Errors saving or resuming a session
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt session data: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("unsupported session schema {id} (version {version})")]
    UnsupportedSchema { version: u32, id: String },

    #[error("inconsistent session data: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One session directory on disk.
#[derive(Debug, Clone)]
pub struct SessionStorage {
    dir: PathBuf,
}

impl SessionStorage {
    /// Create `<root>/<session_id>` and its I/O log directory.
    pub fn create(root: &Path, session_id: &str) -> Result<Self, PersistenceError> {
        let dir = root.join(session_id);
        let logs = dir.join(IO_LOG_DIR);
        fs::create_dir_all(&logs).map_err(io_error(&logs))?;
        debug!(dir = %dir.display(), "session directory created");
        Ok(Self { dir })
    }

    /// Open an existing session directory.
    pub fn open(dir: &Path) -> Result<Self, PersistenceError> {
        let file = dir.join(SESSION_FILE);
        if !file.is_file() {
            return Err(PersistenceError::Io {
                path: file,
                source: io::Error::new(io::ErrorKind::NotFound, "no session snapshot"),
            });
        }
        let logs = dir.join(IO_LOG_DIR);
        fs::create_dir_all(&logs).map_err(io_error(&logs))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_file(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    pub fn io_log_dir(&self) -> PathBuf {
        self.dir.join(IO_LOG_DIR)
    }

    /// Write atomically (write-then-rename)
    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<(), PersistenceError> {
        let path = self.session_file();
        let json = snapshot.to_json()?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(io_error(&temp_path))?;
        fs::rename(&temp_path, &path).map_err(io_error(&path))?;
        Ok(())
    }

    pub fn load(&self) -> Result<SessionSnapshot, PersistenceError> {
        let path = self.session_file();
        let json = fs::read_to_string(&path).map_err(io_error(&path))?;
        SessionSnapshot::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use certlane_model::{load_catalog, JobResult, Outcome};
    use tempfile::TempDir;

    const CATALOG: &str = "name: a\ncommand: true\n\nname: b\ncommand: true\ndepends: a\n";

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let mut session = SessionState::new(load_catalog(CATALOG, "t").unwrap()).unwrap();
        session.update_desired_job_list(&["b".to_string()]);
        session.update_job_result("a", JobResult::new(Outcome::Pass).with_comments("ok"));

        let storage = SessionStorage::create(tmp.path(), session.session_id()).unwrap();
        assert!(storage.io_log_dir().is_dir());
        let snapshot = session.persistent_save();
        storage.save(&snapshot).unwrap();
        assert!(!storage.session_file().with_extension("tmp").exists());

        let reopened = SessionStorage::open(storage.dir()).unwrap();
        let loaded = reopened.load().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.job_state_map.len(), 1);
        assert_eq!(loaded.desired_job_list.len(), 1);
    }

    #[test]
    fn test_open_missing_session() {
        let tmp = TempDir::new().unwrap();
        let err = SessionStorage::open(tmp.path()).unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }

    #[test]
    fn test_corrupt_snapshot() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(SESSION_FILE), "{not json").unwrap();
        let storage = SessionStorage::open(tmp.path()).unwrap();
        assert!(matches!(storage.load(), Err(PersistenceError::Corrupt(_))));
    }

    #[test]
    fn test_unsupported_schema() {
        let session = SessionState::new(load_catalog(CATALOG, "t").unwrap()).unwrap();
        let mut snapshot = session.persistent_save();
        snapshot.schema_version = 99;
        let json = snapshot.to_json().unwrap();
        assert!(matches!(
            SessionSnapshot::from_json(&json),
            Err(PersistenceError::UnsupportedSchema { version: 99, .. })
        ));
    }

    #[test]
    fn test_non_terminal_result_is_inconsistent() {
        let mut session = SessionState::new(load_catalog(CATALOG, "t").unwrap()).unwrap();
        session.update_job_result("a", JobResult::new(Outcome::Pass));
        let mut snapshot = session.persistent_save();
        if let Some(job) = snapshot.job_state_map.get_mut("a") {
            job.result.outcome = Outcome::None;
        }
        let mut fresh = SessionState::new(load_catalog(CATALOG, "t").unwrap()).unwrap();
        assert!(matches!(
            fresh.resume(&snapshot),
            Err(PersistenceError::Inconsistent(_))
        ));
    }
}
