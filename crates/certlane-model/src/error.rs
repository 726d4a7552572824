//! Catalog loading errors.

use std::io;
use std::path::PathBuf;

use certlane_expr::ResourceEvaluationError;
use thiserror::Error;

/// A catalog source could not be loaded.
///
/// Any of these is fatal for the source being loaded and only for that source.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{origin}: {message}")]
    Malformed { origin: String, message: String },

    #[error("{origin}: duplicate key '{key}'")]
    DuplicateKey { origin: String, key: String },

    #[error("{origin}: record has no 'name' field")]
    MissingName { origin: String },

    #[error("{origin}: invalid value for '{field}': {message}")]
    InvalidField {
        origin: String,
        field: String,
        message: String,
    },

    /// A malformed `requires` program, reported when the catalog is loaded.
    #[error("{origin}: job '{name}' has a malformed requirement: {source}")]
    Requires {
        origin: String,
        name: String,
        #[source]
        source: ResourceEvaluationError,
    },

    #[error("{origin}: job '{name}' is defined more than once")]
    DuplicateName { origin: String, name: String },

    #[error("cannot canonicalize job '{name}': {message}")]
    Canonical { name: String, message: String },
}
