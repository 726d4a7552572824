//! Resource requirement expressions.
//!
//! A job's `requires` field is a small program: one boolean expression per
//! line, each referencing resource attributes as `job_name.attribute`. An
//! expression holds when at least one combination of records (one record per
//! referenced resource job) makes it true.

mod eval;
mod lexer;
mod parser;

pub use parser::{CompareOp, Expr, Literal};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single resource record: a flat attribute → value mapping.
pub type ResourceRecord = BTreeMap<String, String>;

/// The most recent records emitted by each resource job, keyed by job name.
pub type ResourceMap = BTreeMap<String, Vec<ResourceRecord>>;

/// A malformed expression.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} ({})", location(.line, .position))]
pub struct ResourceEvaluationError {
    /// Byte offset inside the offending line.
    pub position: usize,
    /// Zero-based line inside a multi-line program, if known.
    pub line: Option<usize>,
    pub message: String,
}

impl ResourceEvaluationError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            line: None,
            message: message.into(),
        }
    }

    fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

fn location(line: &Option<usize>, position: &usize) -> String {
    match line {
        Some(line) => format!("line {}, column {}", line + 1, position + 1),
        None => format!("column {}", position + 1),
    }
}

/// Outcome of evaluating an expression against a resource map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    True,
    False,
    /// A referenced resource job has not produced any output yet.
    Pending { job: String },
    /// A referenced resource job ran but emitted no records.
    NoRecords { job: String },
}

impl Evaluation {
    pub fn is_true(&self) -> bool {
        matches!(self, Evaluation::True)
    }
}

/// One parsed requirement line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceExpression {
    text: String,
    ast: Expr,
    resource_names: Vec<String>,
}

impl ResourceExpression {
    pub fn parse(text: &str) -> Result<Self, ResourceEvaluationError> {
        let text = text.trim();
        let ast = parser::parse_expression(text)?;
        let mut resource_names = Vec::new();
        ast.collect_jobs(&mut resource_names);
        Ok(Self {
            text: text.to_string(),
            ast,
            resource_names,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Resource jobs referenced by this expression, in first-seen order.
    pub fn resource_names(&self) -> &[String] {
        &self.resource_names
    }

    /// Evaluate existentially over the cartesian product of the records of
    /// every referenced job.
    pub fn evaluate(&self, resources: &ResourceMap) -> Evaluation {
        let mut columns: Vec<(&str, &[ResourceRecord])> = Vec::new();
        for name in &self.resource_names {
            match resources.get(name) {
                None => return Evaluation::Pending { job: name.clone() },
                Some(records) if records.is_empty() => {
                    return Evaluation::NoRecords { job: name.clone() }
                }
                Some(records) => columns.push((name.as_str(), records.as_slice())),
            }
        }

        let mut cursor = vec![0usize; columns.len()];
        loop {
            let binding: eval::Binding<'_> = columns
                .iter()
                .zip(&cursor)
                .map(|((name, records), idx)| (*name, &records[*idx]))
                .collect();
            if let Ok(true) = eval::truth(&self.ast, &binding) {
                return Evaluation::True;
            }

            // Advance the odometer; done once every column wrapped around
            let mut pos = columns.len();
            loop {
                if pos == 0 {
                    return Evaluation::False;
                }
                pos -= 1;
                cursor[pos] += 1;
                if cursor[pos] < columns[pos].1.len() {
                    break;
                }
                cursor[pos] = 0;
            }
        }
    }
}

impl PartialEq for ResourceExpression {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for ResourceExpression {}

impl fmt::Display for ResourceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl TryFrom<String> for ResourceExpression {
    type Error = ResourceEvaluationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceExpression> for String {
    fn from(value: ResourceExpression) -> Self {
        value.text
    }
}

/// A multi-line `requires` value. Every non-empty line is an expression and
/// all of them must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceProgram {
    text: String,
    expressions: Vec<ResourceExpression>,
}

impl ResourceProgram {
    pub fn parse(text: &str) -> Result<Self, ResourceEvaluationError> {
        let mut expressions = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let expr = ResourceExpression::parse(line).map_err(|e| e.at_line(idx))?;
            expressions.push(expr);
        }
        if expressions.is_empty() {
            return Err(ResourceEvaluationError::new(0, "empty requirement program"));
        }
        Ok(Self {
            text: text.to_string(),
            expressions,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expressions(&self) -> &[ResourceExpression] {
        &self.expressions
    }

    /// Union of the resource jobs referenced by all lines, deduplicated,
    /// in first-seen order.
    pub fn resource_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for expr in &self.expressions {
            for name in expr.resource_names() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Evaluate every line, keeping the line order.
    pub fn evaluate_each<'a>(
        &'a self,
        resources: &'a ResourceMap,
    ) -> impl Iterator<Item = (&'a ResourceExpression, Evaluation)> + 'a {
        self.expressions
            .iter()
            .map(move |expr| (expr, expr.evaluate(resources)))
    }

    pub fn holds(&self, resources: &ResourceMap) -> bool {
        self.evaluate_each(resources).all(|(_, e)| e.is_true())
    }
}

impl fmt::Display for ResourceProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl TryFrom<String> for ResourceProgram {
    type Error = ResourceEvaluationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceProgram> for String {
    fn from(value: ResourceProgram) -> Self {
        value.text
    }
}
