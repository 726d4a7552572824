//! certlane - hardware certification test lane
//!
//! Loads job catalogs from providers, resolves the jobs an operator selects
//! into an ordered run list, tracks why each job can or cannot start, and
//! drives the session to completion with resumable on-disk state.

pub mod config;
pub mod error;
pub mod problem;
pub mod provider;
pub mod qualifier;
pub mod resolver;
pub mod run;
pub mod session;
pub mod signal;
pub mod storage;

pub use error::{Error, Result};
pub use problem::{EdgeKind, Problem};
pub use provider::{FsProvider, MemoryProvider, Provider, ProviderRegistry};
pub use qualifier::{JobQualifier, Qualifier, WhiteList};
pub use resolver::{resolve, Resolution};
pub use run::{RunSummary, SessionDriver};
pub use session::{InhibitionCause, Inhibitor, JobState, SessionState};
pub use storage::{SessionSnapshot, SessionStorage};

pub use certlane_expr as expr;
pub use certlane_model as model;
pub use certlane_runner as runner;
