//! Purpose: Define stable, structured JSON for non-fatal diagnostics.
//! Exports: `Notice`, `notice_json`, `failure_json`.
//! Role: Shared contract for the end-of-run summary and the `--failures` log.
//! Invariants: Notices are non-fatal and never alter stdout payloads.
//! Invariants: JSON schema is stable once published; fields are additive-only.
use serde_json::{Map, Value, json};

use crate::core::tuple::FailureRecord;
use crate::stream::{LineFailure, StreamFailure};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub message: String,
    pub details: Map<String, Value>,
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.kind));
    inner.insert("time".to_string(), json!(notice.time));
    inner.insert("cmd".to_string(), json!(notice.cmd));
    inner.insert("message".to_string(), json!(notice.message));
    inner.insert("details".to_string(), Value::Object(notice.details.clone()));

    let mut outer = Map::new();
    outer.insert("notice".to_string(), Value::Object(inner));
    Value::Object(outer)
}

/// One line of the failure log: `{"failure":{time,line,scope,...}}`.
pub fn failure_json(failure: &StreamFailure, time: &str) -> Value {
    let mut inner = match failure {
        StreamFailure::Line(line) => line_failure_fields(line),
        StreamFailure::Field(record) => field_failure_fields(record),
    };
    inner.insert("time".to_string(), json!(time));

    let mut outer = Map::new();
    outer.insert("failure".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn line_failure_fields(failure: &LineFailure) -> Map<String, Value> {
    let mut inner = Map::new();
    inner.insert("scope".to_string(), json!("line"));
    inner.insert("line".to_string(), json!(failure.line));
    inner.insert("kind".to_string(), json!(failure.error_kind));
    inner.insert("message".to_string(), json!(failure.message));
    if let Some(snippet) = &failure.snippet {
        inner.insert("snippet".to_string(), json!(snippet));
    }
    inner
}

fn field_failure_fields(record: &FailureRecord) -> Map<String, Value> {
    let mut inner = Map::new();
    inner.insert("scope".to_string(), json!("field"));
    inner.insert("line".to_string(), json!(record.line));
    if let Some(component) = &record.component {
        inner.insert("component".to_string(), json!(component));
    }
    inner.insert("kind".to_string(), json!(record.kind.label()));
    inner.insert("message".to_string(), json!(record.message));
    inner
}
