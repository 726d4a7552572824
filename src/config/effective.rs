//! Effective configuration with provenance
//!
//! Records the merged configuration together with every layer that
//! contributed to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::defaults::EngineConfig;
use super::merge::merge_layers;

/// Schema version for effective_config.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "certlane/effective_config@1";

/// Project configuration file, relative to the working directory
pub const PROJECT_CONFIG_FILE: &str = "certlane.toml";

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    User,
    Project,
    Cli,
}

/// A contributing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged configuration and its sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

/// `$XDG_CONFIG_HOME/certlane/config.toml`, falling back to
/// `~/.config/certlane/config.toml`.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(std::env::var_os("HOME")?).join(".config"),
    };
    Some(base.join("certlane").join("config.toml"))
}

impl EffectiveConfig {
    /// Merge builtin defaults, the user file, the project file and CLI
    /// overrides. Missing files are skipped.
    pub fn build(
        user_config_path: Option<&Path>,
        project_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![EngineConfig::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        let files = [
            (ConfigOrigin::User, user_config_path),
            (ConfigOrigin::Project, project_config_path),
        ];
        for (origin, path) in files {
            let Some(path) = path.filter(|p| p.exists()) else {
                continue;
            };
            let (value, digest) = Self::load_toml_file(path)?;
            debug!(?origin, path = %path.display(), "config layer loaded");
            layers.push(value);
            sources.push(ConfigSource {
                origin,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        Self::validate_config(&merged)?;

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
        })
    }

    /// Typed view of the merged configuration.
    pub fn engine(&self) -> Result<EngineConfig, ConfigError> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("{}: invalid UTF-8: {}", path.display(), e)))?;
        let toml_value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

        Ok((toml_to_json(toml_value), digest))
    }

    fn validate_config(config: &Value) -> Result<(), ConfigError> {
        if let Some(grace) = config.get("termination_grace_seconds") {
            match grace.as_u64() {
                Some(secs) if secs > 0 && secs <= 300 => {}
                _ => {
                    return Err(ConfigError::ValidationError(
                        "termination_grace_seconds must be in (0, 300]".to_string(),
                    ))
                }
            }
        }
        if let Some(shell) = config.get("shell") {
            if shell.as_str().map_or(true, str::is_empty) {
                return Err(ConfigError::ValidationError(
                    "shell must be a non-empty path".to_string(),
                ));
            }
        }
        if let Some(policy) = config.get("orphan_policy") {
            if !matches!(policy.as_str(), Some("retain") | Some("prune")) {
                return Err(ConfigError::ValidationError(
                    "orphan_policy must be \"retain\" or \"prune\"".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write atomically (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let json = self
            .to_json()
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(|e| ConfigError::IoError(e.to_string()))?;
        fs::rename(&temp_path, path).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Get a config value by path (dot-separated)
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OrphanPolicy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_only() {
        let config = EffectiveConfig::build(None, None, None).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].origin, ConfigOrigin::Builtin);
        assert_eq!(config.engine().unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_project_and_cli_layers() {
        let mut user = NamedTempFile::new().unwrap();
        writeln!(user, "termination_grace_seconds = 10").unwrap();
        writeln!(user, "[env]").unwrap();
        writeln!(user, "SITE = \"lab-1\"").unwrap();

        let mut project = NamedTempFile::new().unwrap();
        writeln!(project, "orphan_policy = \"prune\"").unwrap();
        writeln!(project, "[env]").unwrap();
        writeln!(project, "CERT_MODE = \"full\"").unwrap();

        let cli = serde_json::json!({"termination_grace_seconds": 2});
        let config =
            EffectiveConfig::build(Some(user.path()), Some(project.path()), Some(cli)).unwrap();

        let origins: Vec<ConfigOrigin> = config.sources.iter().map(|s| s.origin).collect();
        assert_eq!(
            origins,
            vec![
                ConfigOrigin::Builtin,
                ConfigOrigin::User,
                ConfigOrigin::Project,
                ConfigOrigin::Cli
            ]
        );
        assert_eq!(config.sources[1].digest.as_ref().map(String::len), Some(64));

        let engine = config.engine().unwrap();
        assert_eq!(engine.termination_grace_seconds, 2);
        assert_eq!(engine.orphan_policy, OrphanPolicy::Prune);
        assert_eq!(engine.env.get("SITE").map(String::as_str), Some("lab-1"));
        assert_eq!(engine.env.get("CERT_MODE").map(String::as_str), Some("full"));
        assert_eq!(config.get("env.SITE").and_then(Value::as_str), Some("lab-1"));
    }

    #[test]
    fn test_missing_files_skipped() {
        let config = EffectiveConfig::build(
            Some(Path::new("/nonexistent/config.toml")),
            Some(Path::new("/nonexistent/certlane.toml")),
            None,
        )
        .unwrap();
        assert_eq!(config.sources.len(), 1);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cli = serde_json::json!({"termination_grace_seconds": 0});
        let err = EffectiveConfig::build(None, None, Some(cli)).unwrap_err();
        assert!(err.to_string().contains("termination_grace_seconds"));

        let cli = serde_json::json!({"orphan_policy": "forget"});
        assert!(EffectiveConfig::build(None, None, Some(cli)).is_err());
    }

    #[test]
    fn test_bad_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "shell = ").unwrap();
        let err = EffectiveConfig::build(None, Some(file.path()), None).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
