//! Job definitions and catalog loading.
//!
//! A definition is immutable once built. Its identity is the checksum: the
//! SHA-256 hex digest of the RFC 8785 canonical JSON of every field that
//! differs from its default. `via` and `origin` describe where a definition
//! came from, not what it is, so they stay out of the checksum.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use certlane_expr::ResourceProgram;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CatalogError;
use crate::record::{parse_records, Origin, Record};

/// How a job is executed and what its output means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Plugin {
    #[default]
    Shell,
    /// Output is more catalog records.
    Local,
    /// Output is resource records.
    Resource,
    Manual,
    UserVerify,
    UserInteract,
    Attachment,
}

impl Plugin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plugin::Shell => "shell",
            Plugin::Local => "local",
            Plugin::Resource => "resource",
            Plugin::Manual => "manual",
            Plugin::UserVerify => "user-verify",
            Plugin::UserInteract => "user-interact",
            Plugin::Attachment => "attachment",
        }
    }

    /// Needs an operator at some point.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            Plugin::Manual | Plugin::UserVerify | Plugin::UserInteract
        )
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Plugin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "shell" => Ok(Plugin::Shell),
            "local" => Ok(Plugin::Local),
            "resource" => Ok(Plugin::Resource),
            "manual" => Ok(Plugin::Manual),
            "user-verify" => Ok(Plugin::UserVerify),
            "user-interact" => Ok(Plugin::UserInteract),
            "attachment" => Ok(Plugin::Attachment),
            other => Err(format!("unknown plugin '{}'", other)),
        }
    }
}

const KNOWN_FIELDS: &[&str] = &[
    "name",
    "plugin",
    "command",
    "description",
    "depends",
    "requires",
    "environ",
    "user",
    "estimated_duration",
];

/// An immutable test job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDefinition {
    name: String,
    plugin: Plugin,
    command: Option<String>,
    description: Option<String>,
    depends: Vec<String>,
    requires: Option<ResourceProgram>,
    environ: Vec<String>,
    user: Option<String>,
    estimated_duration: Option<f64>,
    extra: BTreeMap<String, String>,
    via: Option<String>,
    origin: Option<Origin>,
    checksum: String,
}

impl JobDefinition {
    pub fn builder(name: impl Into<String>) -> JobDefinitionBuilder {
        JobDefinitionBuilder::new(name)
    }

    /// Build a definition from a parsed record.
    pub fn from_record(record: &Record) -> Result<Self, CatalogError> {
        let origin = record.origin.to_string();
        let name = record
            .get("name")
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| CatalogError::MissingName {
                origin: origin.clone(),
            })?;

        let mut builder = JobDefinitionBuilder::new(name).origin(record.origin.clone());

        if let Some(plugin) = record.get("plugin") {
            let plugin = plugin.parse().map_err(|message| CatalogError::InvalidField {
                origin: origin.clone(),
                field: "plugin".to_string(),
                message,
            })?;
            builder = builder.plugin(plugin);
        }
        if let Some(command) = record.get("command") {
            builder = builder.command(command);
        }
        if let Some(description) = record.get("description") {
            builder = builder.description(description);
        }
        if let Some(depends) = record.get("depends") {
            builder = builder.depends(split_names(depends));
        }
        if let Some(requires) = record.get("requires") {
            builder = builder.requires(requires);
        }
        if let Some(environ) = record.get("environ") {
            builder = builder.environ(split_names(environ));
        }
        if let Some(user) = record.get("user") {
            builder = builder.user(user);
        }
        if let Some(duration) = record.get("estimated_duration") {
            let seconds = duration
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| CatalogError::InvalidField {
                    origin: origin.clone(),
                    field: "estimated_duration".to_string(),
                    message: format!("'{}' is not a number of seconds", duration.trim()),
                })?;
            builder = builder.estimated_duration(seconds);
        }
        for (key, value) in &record.data {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                builder = builder.extra(key, value);
            }
        }

        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> Plugin {
        self.plugin
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn depends(&self) -> &[String] {
        &self.depends
    }

    pub fn requires(&self) -> Option<&ResourceProgram> {
        self.requires.as_ref()
    }

    /// Resource jobs named in `requires`.
    pub fn resource_names(&self) -> Vec<String> {
        self.requires
            .as_ref()
            .map(ResourceProgram::resource_names)
            .unwrap_or_default()
    }

    pub fn environ(&self) -> &[String] {
        &self.environ
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn estimated_duration(&self) -> Option<f64> {
        self.estimated_duration
    }

    /// Fields not understood by the engine, kept verbatim.
    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }

    /// Name of the local job that generated this definition.
    pub fn via(&self) -> Option<&str> {
        self.via.as_deref()
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Same definition, tagged as generated by `parent`.
    pub fn with_via(mut self, parent: impl Into<String>) -> Self {
        self.via = Some(parent.into());
        self
    }

    /// Human readable location for diagnostics.
    pub fn location(&self) -> String {
        self.origin
            .as_ref()
            .map(Origin::to_string)
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    fn canonical_fields(&self) -> BTreeMap<&str, Value> {
        let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
        fields.insert("name", Value::from(self.name.as_str()));
        if self.plugin != Plugin::Shell {
            fields.insert("plugin", Value::from(self.plugin.as_str()));
        }
        if let Some(command) = &self.command {
            fields.insert("command", Value::from(command.as_str()));
        }
        if let Some(description) = &self.description {
            fields.insert("description", Value::from(description.as_str()));
        }
        if !self.depends.is_empty() {
            fields.insert("depends", Value::from(self.depends.clone()));
        }
        if let Some(requires) = &self.requires {
            let lines: Vec<&str> = requires.expressions().iter().map(|e| e.text()).collect();
            fields.insert("requires", Value::from(lines));
        }
        if !self.environ.is_empty() {
            fields.insert("environ", Value::from(self.environ.clone()));
        }
        if let Some(user) = &self.user {
            fields.insert("user", Value::from(user.as_str()));
        }
        if let Some(duration) = self.estimated_duration {
            fields.insert("estimated_duration", Value::from(duration));
        }
        for (key, value) in &self.extra {
            fields.insert(key.as_str(), Value::from(value.as_str()));
        }
        fields
    }

    fn compute_checksum(&self) -> Result<String, CatalogError> {
        let jcs_bytes = serde_json_canonicalizer::to_vec(&self.canonical_fields()).map_err(|e| {
            CatalogError::Canonical {
                name: self.name.clone(),
                message: e.to_string(),
            }
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&jcs_bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.plugin)
    }
}

/// Split a `depends`/`environ` value on commas and whitespace, keeping order
/// and dropping repeats.
fn split_names(value: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim_end();
    if trimmed.trim().is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// JobDefinition builder; `build` validates and computes the checksum.
pub struct JobDefinitionBuilder {
    name: String,
    plugin: Plugin,
    command: Option<String>,
    description: Option<String>,
    depends: Vec<String>,
    requires: Option<String>,
    environ: Vec<String>,
    user: Option<String>,
    estimated_duration: Option<f64>,
    extra: BTreeMap<String, String>,
    via: Option<String>,
    origin: Option<Origin>,
}

impl JobDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: Plugin::Shell,
            command: None,
            description: None,
            depends: Vec::new(),
            requires: None,
            environ: Vec::new(),
            user: None,
            estimated_duration: None,
            extra: BTreeMap::new(),
            via: None,
            origin: None,
        }
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugin = plugin;
        self
    }

    pub fn command(mut self, command: impl AsRef<str>) -> Self {
        self.command = non_empty(command.as_ref());
        self
    }

    pub fn description(mut self, description: impl AsRef<str>) -> Self {
        self.description = non_empty(description.as_ref());
        self
    }

    pub fn depends<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = names.into_iter().map(Into::into).collect();
        self
    }

    /// Requirement program text, parsed by `build`.
    pub fn requires(mut self, program: impl AsRef<str>) -> Self {
        self.requires = non_empty(program.as_ref());
        self
    }

    pub fn environ<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environ = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn user(mut self, user: impl AsRef<str>) -> Self {
        self.user = non_empty(user.as_ref());
        self
    }

    pub fn estimated_duration(mut self, seconds: f64) -> Self {
        self.estimated_duration = Some(seconds);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn via(mut self, parent: impl Into<String>) -> Self {
        self.via = Some(parent.into());
        self
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn build(self) -> Result<JobDefinition, CatalogError> {
        let origin_text = self
            .origin
            .as_ref()
            .map(Origin::to_string)
            .unwrap_or_else(|| "<builder>".to_string());

        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(CatalogError::MissingName {
                origin: origin_text,
            });
        }
        if name.contains(|c: char| c.is_whitespace() || c == ',') {
            return Err(CatalogError::InvalidField {
                origin: origin_text,
                field: "name".to_string(),
                message: format!("'{}' contains whitespace or ','", name),
            });
        }

        let requires = match self.requires {
            Some(text) => Some(ResourceProgram::parse(&text).map_err(|source| {
                CatalogError::Requires {
                    origin: origin_text.clone(),
                    name: name.clone(),
                    source,
                }
            })?),
            None => None,
        };

        let mut job = JobDefinition {
            name,
            plugin: self.plugin,
            command: self.command,
            description: self.description,
            depends: self.depends,
            requires,
            environ: self.environ,
            user: self.user,
            estimated_duration: self.estimated_duration,
            extra: self.extra,
            via: self.via,
            origin: self.origin,
            checksum: String::new(),
        };
        job.checksum = job.compute_checksum()?;
        Ok(job)
    }
}

/// Parse catalog text into definitions, in file order.
///
/// Names must be unique within one source.
pub fn load_catalog(text: &str, source: &str) -> Result<Vec<JobDefinition>, CatalogError> {
    let records = parse_records(text, source)?;
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut jobs = Vec::with_capacity(records.len());

    for record in &records {
        let job = JobDefinition::from_record(record)?;
        if !seen.insert(job.name().to_string()) {
            return Err(CatalogError::DuplicateName {
                origin: record.origin.to_string(),
                name: job.name().to_string(),
            });
        }
        jobs.push(job);
    }
    Ok(jobs)
}

/// Load a catalog file; the path is used as the source name.
pub fn load_catalog_file(path: &Path) -> Result<Vec<JobDefinition>, CatalogError> {
    let text = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_catalog(&text, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_catalog_fields() {
        let text = "\
name: disk/detect
plugin: resource
command: udevadm info --export-db
estimated_duration: 1.5

name: disk/read
depends: disk/detect, cpu/info
requires:
 disk.type == 'ssd'
 disk.size > 100
environ: DISK_PATH TMPDIR
command:
 dd if=$DISK_PATH of=/dev/null
";
        let jobs = load_catalog(text, "disk.txt").unwrap();
        assert_eq!(jobs.len(), 2);

        let detect = &jobs[0];
        assert_eq!(detect.plugin(), Plugin::Resource);
        assert_eq!(detect.estimated_duration(), Some(1.5));

        let read = &jobs[1];
        assert_eq!(read.plugin(), Plugin::Shell);
        assert_eq!(read.depends(), &["disk/detect".to_string(), "cpu/info".to_string()]);
        assert_eq!(read.environ(), &["DISK_PATH".to_string(), "TMPDIR".to_string()]);
        assert_eq!(read.requires().unwrap().expressions().len(), 2);
        assert_eq!(read.resource_names(), vec!["disk".to_string()]);
        assert_eq!(read.command(), Some("dd if=$DISK_PATH of=/dev/null"));
        assert_eq!(read.location(), "disk.txt:6-13");
    }

    #[test]
    fn test_checksum_ignores_syntax() {
        let a = load_catalog("name: x\ndepends: a, b\nplugin: shell\n", "a").unwrap();
        let b = load_catalog("depends:\n  a\n  b\nname: x\n", "b").unwrap();
        assert_eq!(a[0].checksum(), b[0].checksum());
        assert_eq!(a[0].checksum().len(), 64);
    }

    #[test]
    fn test_checksum_tracks_content() {
        let a = JobDefinition::builder("x").command("true").build().unwrap();
        let b = JobDefinition::builder("x").command("false").build().unwrap();
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_via_and_origin_do_not_change_checksum() {
        let plain = JobDefinition::builder("x").command("true").build().unwrap();
        let tagged = JobDefinition::builder("x")
            .command("true")
            .via("generator")
            .origin(Origin::new("gen", 1, 2))
            .build()
            .unwrap();
        assert_eq!(plain.checksum(), tagged.checksum());
        assert_eq!(tagged.via(), Some("generator"));
    }

    #[test]
    fn test_unknown_fields_are_kept() {
        let jobs = load_catalog("name: x\ncategory_id: disk\n", "t").unwrap();
        assert_eq!(jobs[0].extra().get("category_id"), Some(&"disk".to_string()));
        let bare = load_catalog("name: x\n", "t").unwrap();
        assert_ne!(jobs[0].checksum(), bare[0].checksum());
    }

    #[test]
    fn test_missing_name() {
        let err = load_catalog("plugin: shell\n", "t").unwrap_err();
        assert!(matches!(err, CatalogError::MissingName { .. }));
    }

    #[test]
    fn test_unknown_plugin() {
        let err = load_catalog("name: x\nplugin: teleport\n", "t").unwrap_err();
        assert!(matches!(err, CatalogError::InvalidField { ref field, .. } if field == "plugin"));
    }

    #[test]
    fn test_malformed_requires_fails_at_load() {
        let err = load_catalog("name: x\nrequires: package.name ==\n", "t").unwrap_err();
        match err {
            CatalogError::Requires { name, .. } => assert_eq!(name, "x"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_duration() {
        let err = load_catalog("name: x\nestimated_duration: soon\n", "t").unwrap_err();
        assert!(matches!(err, CatalogError::InvalidField { .. }));
    }

    #[test]
    fn test_duplicate_name_in_one_source() {
        let err = load_catalog("name: x\n\nname: x\n", "t").unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateName { .. }));
    }

    #[test]
    fn test_load_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.txt");
        fs::write(&path, "name: a\n\nname: b\ndepends: a\n").unwrap();
        let jobs = load_catalog_file(&path).unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs[1].location().ends_with("jobs.txt:3-4"));

        let missing = load_catalog_file(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(missing, CatalogError::Io { .. }));
    }

    #[test]
    fn test_interactive_plugins() {
        assert!(Plugin::Manual.is_interactive());
        assert!(Plugin::UserVerify.is_interactive());
        assert!(!Plugin::Local.is_interactive());
        assert_eq!("user-interact".parse::<Plugin>(), Ok(Plugin::UserInteract));
    }
}
