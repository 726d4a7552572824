//! `key: value` block parser shared by catalogs, resource output and
//! local-job output.
//!
//! ```text
//! # comment
//! name: disk/read
//! command:
//!   dd if=/dev/sda of=/dev/null bs=1M count=100
//!   .
//!   echo done
//!
//! name: disk/write
//! ```
//!
//! A blank line ends a record. Indented lines continue the previous value;
//! their common indentation is removed and a lone `.` stands for an empty
//! line.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub source: String,
    pub line_start: usize,
    pub line_end: usize,
}

impl Origin {
    pub fn new(source: impl Into<String>, line_start: usize, line_end: usize) -> Self {
        Self {
            source: source.into(),
            line_start,
            line_end,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line_start == self.line_end {
            write!(f, "{}:{}", self.source, self.line_start)
        } else {
            write!(f, "{}:{}-{}", self.source, self.line_start, self.line_end)
        }
    }
}

/// One parsed block of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub data: BTreeMap<String, String>,
    pub origin: Origin,
}

impl Record {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Render back into block syntax (keys sorted, multi-line values
    /// indented).
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.data {
            if !value.contains('\n') {
                out.push_str(&format!("{}: {}\n", key, value));
                continue;
            }
            out.push_str(&format!("{}:\n", key));
            for line in value.split('\n') {
                if line.is_empty() {
                    out.push_str(" .\n");
                } else {
                    out.push_str(&format!(" {}\n", line));
                }
            }
        }
        out
    }
}

struct Pending {
    key: String,
    first: String,
    continuation: Vec<String>,
}

struct Builder<'a> {
    source: &'a str,
    start: usize,
    end: usize,
    data: BTreeMap<String, String>,
    pending: Option<Pending>,
}

impl<'a> Builder<'a> {
    fn new(source: &'a str, line: usize) -> Self {
        Self {
            source,
            start: line,
            end: line,
            data: BTreeMap::new(),
            pending: None,
        }
    }

    fn origin_at(&self, line: usize) -> String {
        Origin::new(self.source, line, line).to_string()
    }

    fn flush_pending(&mut self) -> Result<(), CatalogError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let value = join_value(&pending.first, &pending.continuation);
        if self.data.contains_key(&pending.key) {
            return Err(CatalogError::DuplicateKey {
                origin: Origin::new(self.source, self.start, self.end).to_string(),
                key: pending.key,
            });
        }
        self.data.insert(pending.key, value);
        Ok(())
    }

    fn finish(mut self) -> Result<Record, CatalogError> {
        self.flush_pending()?;
        Ok(Record {
            data: self.data,
            origin: Origin::new(self.source, self.start, self.end),
        })
    }
}

fn join_value(first: &str, continuation: &[String]) -> String {
    let indent = continuation
        .iter()
        .filter(|line| line.trim() != ".")
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut lines: Vec<&str> = Vec::new();
    if !first.is_empty() {
        lines.push(first);
    }
    for line in continuation {
        if line.trim() == "." {
            lines.push("");
        } else {
            lines.push(line.get(indent..).unwrap_or("").trim_end());
        }
    }
    lines.join("\n")
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Split `text` into records. `source` names the input in diagnostics.
pub fn parse_records(text: &str, source: &str) -> Result<Vec<Record>, CatalogError> {
    let mut records = Vec::new();
    let mut current: Option<Builder<'_>> = None;

    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;

        if raw.trim().is_empty() {
            if let Some(builder) = current.take() {
                records.push(builder.finish()?);
            }
            continue;
        }

        if raw.starts_with('#') {
            continue;
        }

        if raw.starts_with(char::is_whitespace) {
            let builder = current.as_mut().ok_or_else(|| CatalogError::Malformed {
                origin: Origin::new(source, lineno, lineno).to_string(),
                message: "continuation line outside of a record".to_string(),
            })?;
            let origin = builder.origin_at(lineno);
            let pending = builder.pending.as_mut().ok_or(CatalogError::Malformed {
                origin,
                message: "continuation line without a key".to_string(),
            })?;
            pending.continuation.push(raw.to_string());
            builder.end = lineno;
            continue;
        }

        let Some((key, value)) = raw.split_once(':') else {
            return Err(CatalogError::Malformed {
                origin: Origin::new(source, lineno, lineno).to_string(),
                message: format!("expected 'key: value', found '{}'", raw.trim()),
            });
        };
        let key = key.trim();
        let key = key.strip_prefix('_').unwrap_or(key);
        if !valid_key(key) {
            return Err(CatalogError::Malformed {
                origin: Origin::new(source, lineno, lineno).to_string(),
                message: format!("invalid key '{}'", key),
            });
        }

        let builder = current.get_or_insert_with(|| Builder::new(source, lineno));
        builder.flush_pending()?;
        builder.pending = Some(Pending {
            key: key.to_string(),
            first: value.trim().to_string(),
            continuation: Vec::new(),
        });
        builder.end = lineno;
    }

    if let Some(builder) = current.take() {
        records.push(builder.finish()?);
    }
    Ok(records)
}
