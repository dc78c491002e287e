//! Typed extraction from dynamic JSON values.
//!
//! Results and notification params arrive as arbitrary nested JSON. These helpers pull
//! typed data out of them and report shape mismatches as [`ValueError`] rather than
//! panicking on an unexpected type.

use serde_json::{Map, Value};
use thiserror::Error;

/// A dynamic value did not have the expected shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("missing field '{0}'")]
    Missing(String),

    #[error("field '{path}' expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Name of a value's JSON type, for error messages
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(path: &str, expected: &'static str, value: &Value) -> ValueError {
    ValueError::TypeMismatch {
        path: if path.is_empty() {
            "<value>".to_string()
        } else {
            path.to_string()
        },
        expected,
        found: kind_of(value),
    }
}

/// Walk `path` through nested objects starting at `map`
pub fn lookup_path<'a>(map: &'a Map<String, Value>, path: &[&str]) -> Result<&'a Value, ValueError> {
    let Some((first, rest)) = path.split_first() else {
        return Err(ValueError::Missing(String::new()));
    };

    let mut walked = (*first).to_string();
    let mut current = map
        .get(*first)
        .ok_or_else(|| ValueError::Missing(walked.clone()))?;

    for segment in rest {
        let object = current
            .as_object()
            .ok_or_else(|| mismatch(&walked, "object", current))?;
        walked.push('.');
        walked.push_str(segment);
        current = object
            .get(*segment)
            .ok_or_else(|| ValueError::Missing(walked.clone()))?;
    }

    Ok(current)
}

/// Checked accessors on [`serde_json::Value`]
pub trait ValueExt {
    fn as_map(&self) -> Result<&Map<String, Value>, ValueError>;

    fn as_number(&self) -> Result<f64, ValueError>;

    /// A non-negative integer; integral floats such as `6.0` are accepted
    fn as_unsigned(&self) -> Result<u64, ValueError>;

    fn as_text(&self) -> Result<&str, ValueError>;

    /// Walk a path of object keys
    fn path(&self, path: &[&str]) -> Result<&Value, ValueError>;
}

impl ValueExt for Value {
    fn as_map(&self) -> Result<&Map<String, Value>, ValueError> {
        self.as_object().ok_or_else(|| mismatch("", "object", self))
    }

    fn as_number(&self) -> Result<f64, ValueError> {
        self.as_f64().ok_or_else(|| mismatch("", "number", self))
    }

    fn as_unsigned(&self) -> Result<u64, ValueError> {
        if let Some(number) = self.as_u64() {
            return Ok(number);
        }
        self.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
            .map(|f| f as u64)
            .ok_or_else(|| mismatch("", "non-negative integer", self))
    }

    fn as_text(&self) -> Result<&str, ValueError> {
        self.as_str().ok_or_else(|| mismatch("", "string", self))
    }

    fn path(&self, path: &[&str]) -> Result<&Value, ValueError> {
        if path.is_empty() {
            return Ok(self);
        }
        lookup_path(self.as_map()?, path)
    }
}
