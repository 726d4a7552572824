//! Top-level error for the engine and the CLI.

use std::io;

use certlane_model::CatalogError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::ProviderError;
use crate::qualifier::QualifierError;
use crate::run::RunError;
use crate::session::SessionError;
use crate::storage::PersistenceError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Qualifier(#[from] QualifierError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Usage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
