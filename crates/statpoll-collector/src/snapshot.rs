//! Snapshot navigation.
//!
//! A [`Snapshot`] is the raw tree returned by one fetch. Catalog entries
//! address leaves in it with a path of [`PathSegment`]s, and every lookup
//! yields a [`Resolution`] that keeps "absent" apart from "present but zero".

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One navigation step into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Object member lookup.
    Key(String),
    /// Array element lookup.
    Index(usize),
    /// Every member of an object (or element of an array) at this level.
    /// The visited key becomes part of the emitted metric name.
    Any,
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Raw values fetched during one collection cycle. Never kept across cycles.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot(Value);

impl Snapshot {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn empty() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for Snapshot {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// A numeric leaf. Integers stay exact so 64-bit counter arithmetic does
/// not lose precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Integer(i128),
    Float(f64),
}

impl Reading {
    pub fn as_f64(self) -> f64 {
        match self {
            Reading::Integer(v) => v as f64,
            Reading::Float(v) => v,
        }
    }
}

/// Outcome of looking up one path in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(Reading),
    /// A key, index or intermediate container along the path is missing.
    NotFound,
    /// The leaf exists but is not a number.
    Malformed(String),
}

/// One branch produced by [`resolve_all`].
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// Keys visited at each [`PathSegment::Any`], in path order.
    pub captures: Vec<String>,
    pub resolution: Resolution,
}

/// Resolves a path without wildcards.
///
/// A path containing [`PathSegment::Any`] is reported as malformed; use
/// [`resolve_all`] for those.
pub fn resolve(snapshot: &Snapshot, path: &[PathSegment]) -> Resolution {
    let mut node = &snapshot.0;
    for segment in path {
        let next = match segment {
            PathSegment::Key(key) => node.as_object().and_then(|obj| obj.get(key)),
            PathSegment::Index(idx) => node.as_array().and_then(|arr| arr.get(*idx)),
            PathSegment::Any => {
                return Resolution::Malformed("wildcard in single-value path".to_string())
            }
        };
        match next {
            Some(child) => node = child,
            None => return Resolution::NotFound,
        }
    }
    read_leaf(node)
}

/// Resolves a path that may fan out over [`PathSegment::Any`].
///
/// A wildcard over an empty container yields no branches; a wildcard over a
/// scalar or a missing node yields a single `NotFound` branch.
pub fn resolve_all(snapshot: &Snapshot, path: &[PathSegment]) -> Vec<Branch> {
    let mut out = Vec::new();
    let mut captures = Vec::new();
    walk(Some(&snapshot.0), path, &mut captures, &mut out);
    out
}

fn walk(
    node: Option<&Value>,
    path: &[PathSegment],
    captures: &mut Vec<String>,
    out: &mut Vec<Branch>,
) {
    let Some(node) = node else {
        out.push(Branch {
            captures: captures.clone(),
            resolution: Resolution::NotFound,
        });
        return;
    };

    let Some((segment, rest)) = path.split_first() else {
        out.push(Branch {
            captures: captures.clone(),
            resolution: read_leaf(node),
        });
        return;
    };

    match segment {
        PathSegment::Key(key) => {
            walk(node.as_object().and_then(|o| o.get(key)), rest, captures, out)
        }
        PathSegment::Index(idx) => {
            walk(node.as_array().and_then(|a| a.get(*idx)), rest, captures, out)
        }
        PathSegment::Any => match node {
            Value::Object(map) => {
                for (key, child) in map {
                    captures.push(key.clone());
                    walk(Some(child), rest, captures, out);
                    captures.pop();
                }
            }
            Value::Array(items) => {
                for (idx, child) in items.iter().enumerate() {
                    captures.push(idx.to_string());
                    walk(Some(child), rest, captures, out);
                    captures.pop();
                }
            }
            _ => out.push(Branch {
                captures: captures.clone(),
                resolution: Resolution::NotFound,
            }),
        },
    }
}

fn read_leaf(value: &Value) -> Resolution {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Resolution::Found(Reading::Integer(i128::from(v)))
            } else if let Some(v) = n.as_u64() {
                Resolution::Found(Reading::Integer(i128::from(v)))
            } else {
                match n.as_f64() {
                    Some(v) if v.is_finite() => Resolution::Found(Reading::Float(v)),
                    _ => Resolution::Malformed(format!("non-finite number {n}")),
                }
            }
        }
        Value::Bool(b) => Resolution::Found(Reading::Integer(i128::from(*b))),
        Value::String(s) => {
            Resolution::Malformed(format!("string where a number was expected: {s:?}"))
        }
        Value::Null => Resolution::Malformed("null value".to_string()),
        Value::Array(_) => Resolution::Malformed("array where a number was expected".to_string()),
        Value::Object(_) => {
            Resolution::Malformed("object where a number was expected".to_string())
        }
    }
}
