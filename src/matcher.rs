//! Subset matching over JSON-like trees
//!
//! [`object_contains`] answers "does `actual` say at least what `expected`
//! says?". Only fields named in `expected` constrain `actual`:
//!
//! - mappings: every expected key must be present and match recursively;
//!   extra keys in `actual` are ignored.
//! - sequences: compared index by index; `actual` may be longer than
//!   `expected` but not shorter.
//! - everything else: equality.
//!
//! The comparison strategy at each position is picked from the shape of the
//! ACTUAL value there. A recursive comparison only happens when the expected
//! value has the same shape; otherwise the two values are compared for
//! equality, which fails for any shape mismatch. Use [`contains_strict`] to
//! learn where and why a match failed.
//!
//! # Example
//!
//! ```
//! use kubestep::matcher::object_contains;
//! use serde_json::json;
//!
//! let live = json!({"metadata": {"name": "a", "uid": "123"}, "spec": {"ports": [80, 443]}});
//! assert!(object_contains(&live, &json!({"spec": {"ports": [80]}})));
//! assert!(!object_contains(&live, &json!({"spec": {"ports": [443]}})));
//! ```

use serde_json::{Map, Value};
use std::fmt;

/// Structural kind of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Mapping,
    Sequence,
    Scalar,
}

impl Shape {
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => Self::Mapping,
            Value::Array(_) => Self::Sequence,
            _ => Self::Scalar,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mapping => "mapping",
            Self::Sequence => "sequence",
            Self::Scalar => "scalar",
        })
    }
}

/// True when `actual` contains everything `expected` declares
#[must_use]
pub fn object_contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => mapping_contains(actual, expected),
        (Value::Array(actual), Value::Array(expected)) => sequence_contains(actual, expected),
        _ => values_match(actual, expected),
    }
}

fn mapping_contains(actual: &Map<String, Value>, expected: &Map<String, Value>) -> bool {
    expected.iter().all(|(key, want)| {
        actual
            .get(key)
            .is_some_and(|got| object_contains(got, want))
    })
}

fn sequence_contains(actual: &[Value], expected: &[Value]) -> bool {
    expected.len() <= actual.len()
        && actual
            .iter()
            .zip(expected)
            .all(|(got, want)| object_contains(got, want))
}

/// Leaf equality
///
/// Numbers compare by value, so an integer fixture matches a float the
/// server echoed back (`1` equals `1.0`). Booleans are not numbers:
/// `true` never matches `1`, nor `false` `0`.
fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => {
            a == b || matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y)
        }
        _ => actual == expected,
    }
}

/// Why a strict match failed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Mismatch {
    #[error("{path}: key missing")]
    MissingKey { path: String },

    #[error("{path}: index missing (actual has {len} elements)")]
    MissingIndex { path: String, len: usize },

    #[error("{path}: expected a {expected}, found a {actual}")]
    ShapeMismatch {
        path: String,
        expected: Shape,
        actual: Shape,
    },

    #[error("{path}: expected {expected}, found {actual}")]
    ValueMismatch {
        path: String,
        expected: Value,
        actual: Value,
    },
}

impl Mismatch {
    /// JSON path (`$.spec.ports[0]`) of the failing position
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::MissingKey { path }
            | Self::MissingIndex { path, .. }
            | Self::ShapeMismatch { path, .. }
            | Self::ValueMismatch { path, .. } => path,
        }
    }
}

/// Subset match that reports the first failure
///
/// Same acceptance as [`object_contains`] for shape-aligned inputs, but a
/// mapping/sequence/scalar mismatch is reported as
/// [`Mismatch::ShapeMismatch`] instead of a failed equality.
pub fn contains_strict(actual: &Value, expected: &Value) -> Result<(), Mismatch> {
    check(actual, expected, &mut String::from("$"))
}

fn check(actual: &Value, expected: &Value, path: &mut String) -> Result<(), Mismatch> {
    let (got_shape, want_shape) = (Shape::of(actual), Shape::of(expected));
    if got_shape != want_shape {
        return Err(Mismatch::ShapeMismatch {
            path: path.clone(),
            expected: want_shape,
            actual: got_shape,
        });
    }

    match (actual, expected) {
        (Value::Object(got), Value::Object(want)) => {
            for (key, want_value) in want {
                let mark = path.len();
                path.push('.');
                path.push_str(key);
                let Some(got_value) = got.get(key) else {
                    return Err(Mismatch::MissingKey { path: path.clone() });
                };
                check(got_value, want_value, path)?;
                path.truncate(mark);
            }
            Ok(())
        }
        (Value::Array(got), Value::Array(want)) => {
            for (index, want_value) in want.iter().enumerate() {
                let mark = path.len();
                path.push_str(&format!("[{index}]"));
                let Some(got_value) = got.get(index) else {
                    return Err(Mismatch::MissingIndex {
                        path: path.clone(),
                        len: got.len(),
                    });
                };
                check(got_value, want_value, path)?;
                path.truncate(mark);
            }
            Ok(())
        }
        _ if values_match(actual, expected) => Ok(()),
        _ => Err(Mismatch::ValueMismatch {
            path: path.clone(),
            expected: expected.clone(),
            actual: actual.clone(),
        }),
    }
}
