//! certlane data model
//!
//! Catalog records, immutable job definitions and the results produced by
//! running them.

pub mod error;
pub mod job;
pub mod record;
pub mod result;

pub use error::CatalogError;
pub use job::{load_catalog, load_catalog_file, JobDefinition, JobDefinitionBuilder, Plugin};
pub use record::{parse_records, Origin, Record};
pub use result::{IoLogRecord, IoStream, JobResult, Outcome};

pub use certlane_expr::{ResourceMap, ResourceRecord};
