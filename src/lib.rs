//! Purpose: Library crate behind the `tuple-reader` CLI and its tests.
//! Exports: `api` (stable surface), `core` (decode engine), `json`, `notice`, `stream`.
//! Role: Turns captured traffic tuples with opaque bodies back into readable JSON.
//! Invariants: The decode core is pure and synchronous; I/O lives in `stream` only.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod json;
pub mod notice;
pub mod stream;
