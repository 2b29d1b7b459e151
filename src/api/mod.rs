//! Purpose: Define the stable public Rust API boundary for tuple decoding.
//! Exports: Core types and operations needed by the CLI and embedding callers.
//! Role: Public, additive-only surface over the decode engine and stream driver.
//! Invariants: Callers needing failure detail use `TupleReport::failures`, not logs.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::chunked::{ChunkError, dechunk};
pub use crate::core::codec::{
    DEFAULT_MAX_BODY_BYTES, DecodeError, DecodedBody, Stage, decode_body, decode_body_with_limit,
};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::flags::{DecodeFlags, derive_flags, is_bulk_uri};
pub use crate::core::header::match_header;
pub use crate::core::path::{self, GetOptions, PathError};
pub use crate::core::tuple::{
    DecodeStats, FailureKind, FailureRecord, TupleReport, decode_tuple, decode_tuple_with_limit,
    process_tuple, process_tuple_with_limit,
};
pub use crate::stream::{
    DecodeConfig, ErrorPolicy, LineFailure, StreamFailure, StreamSummary, decode_stream,
};
