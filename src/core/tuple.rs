//! Purpose: Decode every component of one captured traffic tuple.
//! Exports: `process_tuple`, `decode_tuple` (and `*_with_limit`), `TupleReport`, `FailureRecord`, `FailureKind`.
//! Role: Drives flag derivation and the codec per field, then writes results back by path.
//! Invariants: Top-level keys are never added or removed; only `<component>.body` changes.
//! Invariants: A field failure is isolated to that field; other fields still decode.
//! Invariants: If the bulk predicate cannot be read the tuple is returned untouched.
//! Invariants: The tuple is exclusively borrowed for the duration of one decode call.
use serde_json::Value;
use tracing::{debug, error, info};

use crate::core::codec::{DEFAULT_MAX_BODY_BYTES, DecodeError, Stage, decode_body_with_limit};
use crate::core::error::{Error, ErrorKind};
use crate::core::flags::{derive_flags, is_bulk_uri};
use crate::core::path::{self, GetOptions};
use crate::json::parse;

pub const SOURCE_REQUEST: &str = "sourceRequest";
pub const SOURCE_RESPONSE: &str = "sourceResponse";
pub const TARGET_REQUEST: &str = "targetRequest";
pub const TARGET_RESPONSES: &str = "targetResponses";
pub const SINGLE_COMPONENTS: [&str; 3] = [SOURCE_REQUEST, SOURCE_RESPONSE, TARGET_REQUEST];

pub const REQUEST_URI_PATH: &str = "sourceRequest.Request-URI";
const BODY_KEY: &str = "body";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// One codec stage (or the write-back) failed for one field.
    Decode(Stage),
    /// The bulk predicate could not be read; nothing in the tuple was decoded.
    ShortCircuit,
    /// A recognized key holds the wrong JSON shape (e.g. `targetResponses` not a list).
    Malformed,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            FailureKind::Decode(stage) => stage.label(),
            FailureKind::ShortCircuit => "short-circuit",
            FailureKind::Malformed => "malformed",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailureRecord {
    pub line: u64,
    pub component: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

impl From<DecodeError> for FailureRecord {
    fn from(err: DecodeError) -> Self {
        Self {
            line: err.line,
            message: err.to_string(),
            component: Some(err.component),
            kind: FailureKind::Decode(err.stage),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TupleReport {
    pub tuple: Value,
    pub decoded: usize,
    pub failures: Vec<FailureRecord>,
}

impl TupleReport {
    pub fn short_circuited(&self) -> bool {
        self.failures
            .iter()
            .any(|failure| failure.kind == FailureKind::ShortCircuit)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DecodeStats {
    pub decoded: usize,
    pub failures: Vec<FailureRecord>,
}

/// Parses one NDJSON line and decodes the tuple it holds.
///
/// Only a line that is not JSON at all is an `Err`; every other problem is
/// reported through `TupleReport::failures`.
pub fn process_tuple(line: &str, line_number: u64) -> Result<TupleReport, Error> {
    process_tuple_with_limit(line, line_number, DEFAULT_MAX_BODY_BYTES)
}

/// `process_tuple` with an explicit cap on each decompressed body.
pub fn process_tuple_with_limit(
    line: &str,
    line_number: u64,
    max_body_bytes: usize,
) -> Result<TupleReport, Error> {
    let mut tuple = parse::from_str::<Value>(line).map_err(|err| {
        Error::new(ErrorKind::Parse)
            .with_message("invalid tuple json")
            .with_hint(parse::hint_for_error(&err, "tuple line"))
            .with_line(line_number)
            .with_source(err)
    })?;
    let stats = decode_tuple_with_limit(&mut tuple, line_number, max_body_bytes);
    Ok(TupleReport {
        tuple,
        decoded: stats.decoded,
        failures: stats.failures,
    })
}

/// Decodes every recognized component of `tuple` in place.
pub fn decode_tuple(tuple: &mut Value, line_number: u64) -> DecodeStats {
    decode_tuple_with_limit(tuple, line_number, DEFAULT_MAX_BODY_BYTES)
}

pub fn decode_tuple_with_limit(
    tuple: &mut Value,
    line_number: u64,
    max_body_bytes: usize,
) -> DecodeStats {
    let mut stats = DecodeStats::default();

    let is_bulk = match bulk_predicate(tuple) {
        Ok(is_bulk) => is_bulk,
        Err(message) => {
            error!(line = line_number, "{message}; tuple left undecoded");
            stats.failures.push(FailureRecord {
                line: line_number,
                component: None,
                kind: FailureKind::ShortCircuit,
                message,
            });
            return stats;
        }
    };
    debug!(line = line_number, bulk = is_bulk, "decoding tuple");
    let field = FieldContext {
        is_bulk,
        line_number,
        max_body_bytes,
    };

    for name in SINGLE_COMPONENTS {
        if tuple.get(name).is_none() {
            info!(line = line_number, component = name, "component not present; skipping");
            continue;
        }
        decode_field(tuple, name, name, field, &mut stats);
    }

    let responses = match tuple.get(TARGET_RESPONSES) {
        None => {
            info!(
                line = line_number,
                component = TARGET_RESPONSES,
                "component not present; skipping"
            );
            return stats;
        }
        Some(Value::Array(items)) => items.len(),
        Some(_) => {
            let message = format!("{TARGET_RESPONSES} on line {line_number} is not a list");
            error!(line = line_number, component = TARGET_RESPONSES, "{message}");
            stats.failures.push(FailureRecord {
                line: line_number,
                component: Some(TARGET_RESPONSES.to_string()),
                kind: FailureKind::Malformed,
                message,
            });
            return stats;
        }
    };
    for idx in 0..responses {
        let element_path = format!("{TARGET_RESPONSES}.{idx}");
        let label = format!("{TARGET_RESPONSES}[{idx}]");
        decode_field(tuple, &element_path, &label, field, &mut stats);
    }
    stats
}

fn bulk_predicate(tuple: &Value) -> Result<bool, String> {
    let options = GetOptions::required().with_lowercase_fallback();
    match path::get(REQUEST_URI_PATH, tuple, options) {
        Ok(Some(Value::String(uri))) => Ok(is_bulk_uri(uri)),
        Ok(Some(_)) => Err(format!("{REQUEST_URI_PATH} is not a string")),
        Ok(None) => Err(format!("{REQUEST_URI_PATH} not found")),
        Err(err) => Err(format!("cannot determine bulk request: {err}")),
    }
}

#[derive(Clone, Copy)]
struct FieldContext {
    is_bulk: bool,
    line_number: u64,
    max_body_bytes: usize,
}

fn decode_field(
    tuple: &mut Value,
    component_path: &str,
    label: &str,
    field: FieldContext,
    stats: &mut DecodeStats,
) {
    let FieldContext {
        is_bulk,
        line_number,
        max_body_bytes,
    } = field;
    let body_path = format!("{component_path}.{BODY_KEY}");
    let decoded = {
        let Ok(Some(component)) = path::get(component_path, tuple, GetOptions::default()) else {
            return;
        };
        let Some(body) = component.get(BODY_KEY) else {
            info!(line = line_number, component = label, "component has no body; skipping");
            return;
        };
        let flags = derive_flags(component, is_bulk);
        decode_body_with_limit(body, flags, max_body_bytes, label, line_number)
    };

    // The parent was just read above, so this only fails if the tuple changed shape.
    let result = decoded.and_then(|body| {
        path::set(&body_path, tuple, body.into_value()).map_err(|err| DecodeError {
            component: label.to_string(),
            line: line_number,
            stage: Stage::WriteBack,
            cause: err.to_string(),
        })
    });
    match result {
        Ok(()) => stats.decoded += 1,
        Err(err) => {
            error!(
                line = line_number,
                component = label,
                stage = err.stage.label(),
                "{err}"
            );
            stats.failures.push(err.into());
        }
    }
}
