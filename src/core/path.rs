//! Purpose: Dotted-path get/set over nested JSON values.
//! Exports: `GetOptions`, `PathError`, `get`, `set`.
//! Role: Locates tuple fields (`sourceRequest.Request-URI`) and writes decoded bodies back.
//! Invariants: `set` mutates in place through an exclusive `&mut Value`; nothing is cloned.
//! Invariants: Objects are indexed by key, arrays by decimal index; scalars have no children.
//! Invariants: `set` walks exact keys only; lower-case fallback is a read-side convenience.
use std::error::Error as StdError;
use std::fmt;

use serde_json::Value;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GetOptions {
    pub raise_on_missing: bool,
    pub try_lowercase_keys: bool,
}

impl GetOptions {
    pub fn required() -> Self {
        Self {
            raise_on_missing: true,
            try_lowercase_keys: false,
        }
    }

    pub fn with_lowercase_fallback(mut self) -> Self {
        self.try_lowercase_keys = true;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PathError {
    SegmentNotPresent { path: String, segment: String },
    TargetNotAssignable { path: String },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::SegmentNotPresent { path, segment } => {
                write!(f, "segment `{segment}` not present (path: {path})")
            }
            PathError::TargetNotAssignable { path } => {
                write!(f, "target is not an object and cannot be assigned (path: {path})")
            }
        }
    }
}

impl StdError for PathError {}

/// Looks up `path` inside `value`.
///
/// Returns `Ok(None)` for a missing segment unless `raise_on_missing` is set, in
/// which case the first missing segment is reported.
pub fn get<'a>(
    path: &str,
    value: &'a Value,
    options: GetOptions,
) -> Result<Option<&'a Value>, PathError> {
    let segments = split(path);
    match walk(value, &segments, options.try_lowercase_keys) {
        Ok(found) => Ok(Some(found)),
        Err(_) if !options.raise_on_missing => Ok(None),
        Err(index) => Err(PathError::SegmentNotPresent {
            path: path.to_string(),
            segment: segments[index].to_string(),
        }),
    }
}

/// Replaces the value at `path` with `new_value`.
pub fn set(path: &str, value: &mut Value, new_value: Value) -> Result<(), PathError> {
    let segments = split(path);
    let Some((last, parents)) = segments.split_last() else {
        return Err(PathError::TargetNotAssignable {
            path: path.to_string(),
        });
    };
    let container = walk_mut(value, parents).map_err(|index| PathError::SegmentNotPresent {
        path: path.to_string(),
        segment: parents[index].to_string(),
    })?;
    match container {
        Value::Object(map) => {
            map.insert((*last).to_string(), new_value);
            Ok(())
        }
        _ => Err(PathError::TargetNotAssignable {
            path: path.to_string(),
        }),
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('.').collect()
}

// Err carries the index of the first segment that could not be resolved.
fn walk<'a>(value: &'a Value, segments: &[&str], lowercase: bool) -> Result<&'a Value, usize> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(value);
    };
    let child = match value {
        Value::Object(map) => map.get(*first).or_else(|| {
            if lowercase {
                map.get(&first.to_lowercase())
            } else {
                None
            }
        }),
        Value::Array(items) => first.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    };
    match child {
        Some(child) => walk(child, rest, lowercase).map_err(|index| index + 1),
        None => Err(0),
    }
}

fn walk_mut<'a>(value: &'a mut Value, segments: &[&str]) -> Result<&'a mut Value, usize> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(value);
    };
    let child = match value {
        Value::Object(map) => map.get_mut(*first),
        Value::Array(items) => first
            .parse::<usize>()
            .ok()
            .and_then(move |idx| items.get_mut(idx)),
        _ => None,
    };
    match child {
        Some(child) => walk_mut(child, rest).map_err(|index| index + 1),
        None => Err(0),
    }
}
