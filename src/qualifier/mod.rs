//! Job qualifiers
//!
//! A qualifier decides whether a job name is selected. Qualifiers compose:
//! a composite qualifier designates a name when any inclusive qualifier does
//! and no exclusive qualifier does. An empty inclusive list selects nothing.
//!
//! Qualifiers are a closed set so a selection can be persisted with the
//! session and compared after a resume.

mod whitelist;

pub use whitelist::WhiteList;

use std::fmt;

use certlane_model::JobDefinition;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Selects job names.
pub trait JobQualifier {
    fn designates(&self, name: &str) -> bool;
}

/// Qualifier errors
#[derive(Debug, Error)]
pub enum QualifierError {
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("cannot read whitelist {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Exact name match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameQualifier {
    pub name: String,
}

impl NameQualifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl JobQualifier for NameQualifier {
    fn designates(&self, name: &str) -> bool {
        self.name == name
    }
}

impl fmt::Display for NameQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<NameQualifier name:'{}'>", self.name)
    }
}

/// Regular expression matched against the whole job name.
///
/// Serialized as its pattern text; the anchors are implicit and never part
/// of the stored pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegexQualifier {
    pattern: String,
    regex: Regex,
}

impl RegexQualifier {
    pub fn new(pattern: impl Into<String>) -> Result<Self, QualifierError> {
        let pattern = pattern.into();
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            QualifierError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            }
        })?;
        Ok(Self { pattern, regex })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl JobQualifier for RegexQualifier {
    fn designates(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

impl PartialEq for RegexQualifier {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for RegexQualifier {}

impl fmt::Display for RegexQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<RegexQualifier pattern:'{}'>", self.pattern)
    }
}

impl TryFrom<String> for RegexQualifier {
    type Error = QualifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RegexQualifier> for String {
    fn from(value: RegexQualifier) -> Self {
        value.pattern
    }
}

/// Inclusive list minus exclusive list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeQualifier {
    pub inclusive: Vec<Qualifier>,
    #[serde(default)]
    pub exclusive: Vec<Qualifier>,
}

impl CompositeQualifier {
    pub fn new(inclusive: Vec<Qualifier>, exclusive: Vec<Qualifier>) -> Self {
        Self {
            inclusive,
            exclusive,
        }
    }
}

impl JobQualifier for CompositeQualifier {
    fn designates(&self, name: &str) -> bool {
        self.inclusive.iter().any(|q| q.designates(name))
            && !self.exclusive.iter().any(|q| q.designates(name))
    }
}

impl fmt::Display for CompositeQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |list: &[Qualifier]| {
            list.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "<CompositeQualifier inclusive:[{}] exclusive:[{}]>",
            join(&self.inclusive),
            join(&self.exclusive)
        )
    }
}

/// Every qualifier kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Qualifier {
    Name(NameQualifier),
    Regex { pattern: RegexQualifier },
    Composite(CompositeQualifier),
    WhiteList(WhiteList),
}

impl Qualifier {
    pub fn name(name: impl Into<String>) -> Self {
        Qualifier::Name(NameQualifier::new(name))
    }

    pub fn regex(pattern: impl Into<String>) -> Result<Self, QualifierError> {
        Ok(Qualifier::Regex {
            pattern: RegexQualifier::new(pattern)?,
        })
    }
}

impl JobQualifier for Qualifier {
    fn designates(&self, name: &str) -> bool {
        match self {
            Qualifier::Name(q) => q.designates(name),
            Qualifier::Regex { pattern } => pattern.designates(name),
            Qualifier::Composite(q) => q.designates(name),
            Qualifier::WhiteList(q) => q.designates(name),
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Name(q) => write!(f, "{}", q),
            Qualifier::Regex { pattern } => write!(f, "{}", pattern),
            Qualifier::Composite(q) => write!(f, "{}", q),
            Qualifier::WhiteList(q) => write!(f, "{}", q),
        }
    }
}

impl From<NameQualifier> for Qualifier {
    fn from(q: NameQualifier) -> Self {
        Qualifier::Name(q)
    }
}

impl From<RegexQualifier> for Qualifier {
    fn from(q: RegexQualifier) -> Self {
        Qualifier::Regex { pattern: q }
    }
}

impl From<CompositeQualifier> for Qualifier {
    fn from(q: CompositeQualifier) -> Self {
        Qualifier::Composite(q)
    }
}

impl From<WhiteList> for Qualifier {
    fn from(q: WhiteList) -> Self {
        Qualifier::WhiteList(q)
    }
}

/// Jobs designated by `qualifier`, in catalog order.
pub fn get_matching_job_list<'a, Q: JobQualifier + ?Sized>(
    jobs: &'a [JobDefinition],
    qualifier: &Q,
) -> Vec<&'a JobDefinition> {
    jobs.iter()
        .filter(|job| qualifier.designates(job.name()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str) -> JobDefinition {
        JobDefinition::builder(name).build().unwrap()
    }

    #[test]
    fn test_name_qualifier() {
        let q = NameQualifier::new("foo");
        assert!(q.designates("foo"));
        assert!(!q.designates("foobar"));
        assert_eq!(q.to_string(), "<NameQualifier name:'foo'>");
    }

    #[test]
    fn test_regex_is_anchored() {
        let q = RegexQualifier::new("foo").unwrap();
        assert!(q.designates("foo"));
        assert!(!q.designates("foobar"));
        assert!(!q.designates("xfoo"));
        assert_eq!(q.to_string(), "<RegexQualifier pattern:'foo'>");

        let alternation = RegexQualifier::new("a|b").unwrap();
        assert!(alternation.designates("a"));
        assert!(!alternation.designates("ab"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = RegexQualifier::new("(unclosed").unwrap_err();
        assert!(matches!(err, QualifierError::InvalidPattern { .. }));
    }

    #[test]
    fn test_composite_empty_inclusive_is_false() {
        let q = CompositeQualifier::new(vec![], vec![Qualifier::name("foo")]);
        assert!(!q.designates("foo"));
        assert!(!q.designates("bar"));
        assert!(!CompositeQualifier::default().designates("foo"));
    }

    #[test]
    fn test_composite_exclusion_wins() {
        let q = CompositeQualifier::new(
            vec![Qualifier::regex("disk/.*").unwrap()],
            vec![Qualifier::name("disk/slow")],
        );
        assert!(q.designates("disk/fast"));
        assert!(!q.designates("disk/slow"));
        assert!(!q.designates("cpu/info"));
    }

    #[test]
    fn test_get_matching_job_list_keeps_catalog_order() {
        let jobs = vec![job("c"), job("a"), job("b")];
        let q = CompositeQualifier::new(
            vec![Qualifier::name("b"), Qualifier::name("c")],
            vec![],
        );
        let names: Vec<&str> = get_matching_job_list(&jobs, &q)
            .into_iter()
            .map(|j| j.name())
            .collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[test]
    fn test_serde_round_trip() {
        let q: Qualifier = CompositeQualifier::new(
            vec![Qualifier::regex("usb/.*").unwrap()],
            vec![Qualifier::name("usb/hotplug")],
        )
        .into();
        let json = serde_json::to_string(&q).unwrap();
        assert!(json.contains("\"usb/.*\""));
        let back: Qualifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q);
        assert!(back.designates("usb/storage"));
        assert!(!back.designates("usb/hotplug"));
    }

    #[test]
    fn test_bad_pattern_rejected_on_deserialize() {
        let result: Result<Qualifier, _> =
            serde_json::from_str(r#"{"kind":"regex","pattern":"(oops"}"#);
        assert!(result.is_err());
    }
}
