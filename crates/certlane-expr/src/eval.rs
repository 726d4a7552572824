//! Evaluation of an expression tree against one binding of resource records.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::parser::{CompareOp, Expr, Literal};
use crate::ResourceRecord;

/// One record chosen for every referenced job.
pub(crate) type Binding<'a> = BTreeMap<&'a str, &'a ResourceRecord>;

/// Why a binding could not produce a boolean.
///
/// Both cases make the expression false for the binding at hand; they never
/// surface to callers as errors.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Undefined {
    /// The record lacks the referenced attribute.
    MissingAttribute { job: String, attribute: String },
    /// An ordering operator was applied to a list.
    Unordered,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    List(Vec<Value>),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0,
            Value::Bool(b) => *b,
            Value::List(items) => !items.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        let n = match self {
            Value::Num(n) => *n,
            Value::Str(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        n.is_finite().then_some(n)
    }

    fn as_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::as_text).collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }
}

// Integers print without a trailing ".0" so `'2' == 2.0` and `'2' == 2`
// agree in the lexical fallback as well.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Compare two scalars: numerically when both sides are numbers or numeric
/// strings, as booleans when both are booleans, lexically otherwise.
fn compare(left: &Value, right: &Value) -> Result<Ordering, Undefined> {
    if matches!(left, Value::List(_)) || matches!(right, Value::List(_)) {
        return Err(Undefined::Unordered);
    }
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return a.partial_cmp(&b).ok_or(Undefined::Unordered);
    }
    if let (Value::Bool(a), Value::Bool(b)) = (left, right) {
        return Ok(a.cmp(b));
    }
    Ok(left.as_text().cmp(&right.as_text()))
}

fn equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equal(x, y))
        }
        (Value::List(_), _) | (_, Value::List(_)) => false,
        _ => compare(left, right) == Ok(Ordering::Equal),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::List(items) => items.iter().any(|item| equal(item, needle)),
        // `'usb' in device.bus` is a substring test, like for any string
        other => other.as_text().contains(&needle.as_text()),
    }
}

fn value_of(expr: &Expr, binding: &Binding<'_>) -> Result<Value, Undefined> {
    match expr {
        Expr::Literal(Literal::Str(s)) => Ok(Value::Str(s.clone())),
        Expr::Literal(Literal::Num(n)) => Ok(Value::Num(*n)),
        Expr::Literal(Literal::Bool(b)) => Ok(Value::Bool(*b)),
        Expr::Ref { job, attribute } => binding
            .get(job.as_str())
            .and_then(|record| record.get(attribute))
            .map(|v| Value::Str(v.clone()))
            .ok_or_else(|| Undefined::MissingAttribute {
                job: job.clone(),
                attribute: attribute.clone(),
            }),
        Expr::List(items) => items
            .iter()
            .map(|item| value_of(item, binding))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        _ => truth(expr, binding).map(Value::Bool),
    }
}

/// Evaluate `expr` to a boolean under one binding.
pub(crate) fn truth(expr: &Expr, binding: &Binding<'_>) -> Result<bool, Undefined> {
    match expr {
        Expr::Not(inner) => Ok(!truth(inner, binding)?),
        Expr::And(left, right) => Ok(truth(left, binding)? && truth(right, binding)?),
        Expr::Or(left, right) => Ok(truth(left, binding)? || truth(right, binding)?),
        Expr::Compare { op, left, right } => {
            let l = value_of(left, binding)?;
            let r = value_of(right, binding)?;
            Ok(match op {
                CompareOp::Eq => equal(&l, &r),
                CompareOp::Ne => !equal(&l, &r),
                CompareOp::Lt => compare(&l, &r)? == Ordering::Less,
                CompareOp::Le => compare(&l, &r)? != Ordering::Greater,
                CompareOp::Gt => compare(&l, &r)? == Ordering::Greater,
                CompareOp::Ge => compare(&l, &r)? != Ordering::Less,
                CompareOp::In => contains(&r, &l),
                CompareOp::NotIn => !contains(&r, &l),
            })
        }
        other => value_of(other, binding).map(|v| v.truthy()),
    }
}
