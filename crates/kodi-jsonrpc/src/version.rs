use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::value::{ValueError, ValueExt, kind_of, lookup_path};

/// Protocol version reported by the server's `JSONRPC.Version` method
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ServerVersion {
    pub major: u64,
    #[serde(default)]
    pub minor: u64,
    #[serde(default)]
    pub patch: u64,
}

impl ServerVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Extract the version from a `JSONRPC.Version` result.
    ///
    /// Current servers answer `{"version": {"major": 6, "minor": 14, "patch": 3}}`; very
    /// old ones answer `{"version": 6}`.
    pub fn from_result(result: &Map<String, Value>) -> Result<Self, ValueError> {
        let version = lookup_path(result, &["version"])?;
        match version {
            Value::Object(parts) => {
                let part = |name: &str| -> Result<Option<u64>, ValueError> {
                    match parts.get(name) {
                        None | Some(Value::Null) => Ok(None),
                        Some(value) => value.as_unsigned().map(Some).map_err(|_| {
                            ValueError::TypeMismatch {
                                path: format!("version.{name}"),
                                expected: "non-negative integer",
                                found: kind_of(value),
                            }
                        }),
                    }
                };
                let major = part("major")?
                    .ok_or_else(|| ValueError::Missing("version.major".to_string()))?;
                Ok(Self::new(
                    major,
                    part("minor")?.unwrap_or(0),
                    part("patch")?.unwrap_or(0),
                ))
            }
            Value::Number(_) => version
                .as_unsigned()
                .map(|major| Self::new(major, 0, 0))
                .map_err(|_| ValueError::TypeMismatch {
                    path: "version".to_string(),
                    expected: "non-negative integer",
                    found: "number",
                }),
            other => Err(ValueError::TypeMismatch {
                path: "version".to_string(),
                expected: "object or number",
                found: kind_of(other),
            }),
        }
    }

    /// Whether the major version is at least `min_major`
    pub fn meets(&self, min_major: u64) -> bool {
        self.major >= min_major
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
