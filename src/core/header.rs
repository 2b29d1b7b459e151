//! Purpose: Case-insensitive header lookup inside a captured component object.
//! Exports: `match_header`, header name constants.
//! Role: Feeds the flag deriver; captures store headers as sibling keys of `body`.
//! Invariants: Only the component's own keys are scanned, never a nested `headers` map.
//! Invariants: The first matching key in object order wins.
use serde_json::Value;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const CONTENT_ENCODING: &str = "Content-Encoding";

/// Returns the value of the first key equal to `name` ignoring ASCII case.
///
/// Multi-valued headers captured as arrays of strings are joined with `,`, the
/// same shape they would have on the wire. Other value types do not match.
pub fn match_header(name: &str, component: &Value) -> Option<String> {
    let map = component.as_object()?;
    let (_, value) = map.iter().find(|(key, _)| key.eq_ignore_ascii_case(name))?;
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| item.as_str())
                .collect::<Option<Vec<_>>>()?;
            Some(parts.join(","))
        }
        _ => None,
    }
}
