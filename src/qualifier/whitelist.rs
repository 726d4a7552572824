//! Whitelists: named, file-backed pattern lists.
//!
//! ```text
//! # storage jobs
//! disk/detect
//! disk/read_.*   # every read test
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{CompositeQualifier, JobQualifier, Qualifier, QualifierError, RegexQualifier};

/// A composite qualifier built from a pattern file, with only an inclusive
/// list. Each pattern matches whole job names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhiteList {
    name: Option<String>,
    qualifier: CompositeQualifier,
}

impl WhiteList {
    /// Parse whitelist text. `#` starts a comment anywhere on a line.
    /// Lines that are not valid regular expressions are taken literally.
    pub fn from_text(text: &str, name: Option<String>) -> Self {
        let mut inclusive = Vec::new();
        for line in text.lines() {
            let pattern = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            }
            .trim();
            if pattern.is_empty() {
                continue;
            }
            let qualifier = RegexQualifier::new(pattern).or_else(|_| {
                RegexQualifier::new(regex_lite::escape(pattern))
            });
            match qualifier {
                Ok(q) => inclusive.push(Qualifier::from(q)),
                Err(e) => tracing::warn!(pattern, error = %e, "ignoring whitelist pattern"),
            }
        }
        Self {
            name,
            qualifier: CompositeQualifier::new(inclusive, Vec::new()),
        }
    }

    /// Load a whitelist file; the name is the file stem.
    pub fn from_file(path: &Path) -> Result<Self, QualifierError> {
        let text = fs::read_to_string(path).map_err(|source| QualifierError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
        Ok(Self::from_text(&text, name))
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Anchored-regex patterns in file order.
    pub fn patterns(&self) -> Vec<&str> {
        self.qualifier
            .inclusive
            .iter()
            .filter_map(|q| match q {
                Qualifier::Regex { pattern } => Some(pattern.pattern()),
                _ => None,
            })
            .collect()
    }
}

impl JobQualifier for WhiteList {
    fn designates(&self, name: &str) -> bool {
        self.qualifier.designates(name)
    }
}

impl fmt::Display for WhiteList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<WhiteList name:'{}'>", name),
            None => write!(f, "<WhiteList name:None>"),
        }
    }
}
