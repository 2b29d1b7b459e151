//! Purpose: Decode one captured component body into a structural value.
//! Exports: `Stage`, `DecodeError`, `DecodedBody`, `decode_body`, `decode_body_with_limit`.
//! Role: The per-field codec pipeline: base64, dechunk, gunzip, UTF-8, JSON or bulk JSON.
//! Invariants: Stages run in a fixed order; the first failure ends the pipeline.
//! Invariants: No partial results; the caller leaves `body` untouched on `Err`.
//! Invariants: Without the `json` flag the decoded text is returned verbatim, never parsed.
//! Invariants: Decompressed output never exceeds the body limit; past it the stage fails.
use std::fmt;
use std::io::Read;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::read::MultiGzDecoder;
use serde_json::Value;

use crate::core::chunked::dechunk;
use crate::core::flags::DecodeFlags;
use crate::json::parse;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Base64,
    Dechunk,
    Decompress,
    Utf8,
    Json,
    BulkJson,
    WriteBack,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Base64 => "base64",
            Stage::Dechunk => "dechunk",
            Stage::Decompress => "decompress",
            Stage::Utf8 => "utf8",
            Stage::Json => "json",
            Stage::BulkJson => "bulk-json",
            Stage::WriteBack => "write-back",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodeError {
    pub component: String,
    pub line: u64,
    pub stage: Stage,
    pub cause: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to decode {} on line {} at {} stage",
            self.component,
            self.line,
            self.stage.label()
        )?;
        match self.stage {
            Stage::Json => write!(f, " (body should be a json)")?,
            Stage::BulkJson => write!(f, " (body should be a bulk json)")?,
            _ => {}
        }
        write!(f, ": {}", self.cause)
    }
}

impl std::error::Error for DecodeError {}

#[derive(Clone, Debug, PartialEq)]
pub enum DecodedBody {
    Text(String),
    Json(Value),
    Bulk(Vec<Value>),
}

impl DecodedBody {
    pub fn into_value(self) -> Value {
        match self {
            DecodedBody::Text(text) => Value::String(text),
            DecodedBody::Json(value) => value,
            DecodedBody::Bulk(items) => Value::Array(items),
        }
    }
}

pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Runs the codec pipeline over a component's `body`.
///
/// `component` and `line` only feed diagnostics.
pub fn decode_body(
    body: &Value,
    flags: DecodeFlags,
    component: &str,
    line: u64,
) -> Result<DecodedBody, DecodeError> {
    decode_body_with_limit(body, flags, DEFAULT_MAX_BODY_BYTES, component, line)
}

/// Like `decode_body`, failing at `Stage::Decompress` once gunzipped output
/// would exceed `max_body_bytes`.
pub fn decode_body_with_limit(
    body: &Value,
    flags: DecodeFlags,
    max_body_bytes: usize,
    component: &str,
    line: u64,
) -> Result<DecodedBody, DecodeError> {
    let fail = |stage: Stage| {
        move |cause: String| DecodeError {
            component: component.to_string(),
            line,
            stage,
            cause,
        }
    };

    let encoded = body
        .as_str()
        .ok_or_else(|| format!("expected base64 text, found {}", value_kind(body)))
        .map_err(fail(Stage::Base64))?;
    let mut bytes = decode_base64(encoded).map_err(fail(Stage::Base64))?;
    if flags.chunked {
        bytes = dechunk(&bytes)
            .map_err(|err| err.to_string())
            .map_err(fail(Stage::Dechunk))?;
    }
    if flags.gzipped {
        bytes = gunzip(&bytes, max_body_bytes).map_err(fail(Stage::Decompress))?;
    }
    let text = String::from_utf8(bytes)
        .map_err(|err| err.utf8_error().to_string())
        .map_err(fail(Stage::Utf8))?;

    if !flags.json || text.is_empty() {
        return Ok(DecodedBody::Text(text));
    }
    if flags.bulk {
        parse_bulk(&text)
            .map(DecodedBody::Bulk)
            .map_err(fail(Stage::BulkJson))
    } else {
        parse::from_str::<Value>(&text)
            .map(DecodedBody::Json)
            .map_err(|err| format!("{}: {err}", parse::hint_for_error(&err, component)))
            .map_err(fail(Stage::Json))
    }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, String> {
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(|err| format!("invalid base64: {err}"))
}

fn gunzip(bytes: &[u8], max_bytes: usize) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    MultiGzDecoder::new(bytes)
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|err| format!("gzip decompression failed: {err}"))?;
    if out.len() > max_bytes {
        return Err(format!("decompressed body exceeds {max_bytes} bytes"));
    }
    Ok(out)
}

// One document per non-blank line, in body order.
fn parse_bulk(text: &str) -> Result<Vec<Value>, String> {
    let mut docs = Vec::new();
    for (idx, raw) in text.split('\n').enumerate() {
        let doc = raw.trim_end_matches('\r');
        if doc.trim().is_empty() {
            continue;
        }
        let value = parse::from_str::<Value>(doc).map_err(|err| {
            format!(
                "body line {}: {}: {err}",
                idx + 1,
                parse::hint_for_error(&err, "bulk document")
            )
        })?;
        docs.push(value);
    }
    Ok(docs)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
