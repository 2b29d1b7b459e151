//! Purpose: Derive which decode stages apply to one captured component.
//! Exports: `DecodeFlags`, `derive_flags`, `is_bulk_uri`, `BULK_PATH_SEGMENT`.
//! Role: Pure inspection of headers plus the tuple-wide bulk predicate.
//! Invariants: `bulk` is computed once per tuple and applied to every component in it.
//! Invariants: No side effects; identical inputs give identical flags.
use serde_json::Value;

use crate::core::header::{CONTENT_ENCODING, CONTENT_TYPE, TRANSFER_ENCODING, match_header};

pub const BULK_PATH_SEGMENT: &str = "_bulk";

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DecodeFlags {
    pub json: bool,
    pub bulk: bool,
    pub chunked: bool,
    pub gzipped: bool,
}

pub fn derive_flags(component: &Value, is_bulk_tuple: bool) -> DecodeFlags {
    let json = match_header(CONTENT_TYPE, component)
        .is_some_and(|value| value.contains(JSON_CONTENT_TYPE));
    let chunked = match_header(TRANSFER_ENCODING, component)
        .is_some_and(|value| has_token(&value, "chunked"));
    let gzipped = match_header(CONTENT_ENCODING, component)
        .is_some_and(|value| has_token(&value, "gzip"));
    DecodeFlags {
        json,
        bulk: is_bulk_tuple,
        chunked,
        gzipped,
    }
}

/// True when the path part of `uri` has a `_bulk` segment (`/_bulk`, `/idx/_bulk?refresh`).
pub fn is_bulk_uri(uri: &str) -> bool {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.split('/').any(|segment| segment == BULK_PATH_SEGMENT)
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}
