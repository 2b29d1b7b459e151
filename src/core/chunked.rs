//! Purpose: Undo HTTP/1.1 chunked transfer-coding on a fully captured body.
//! Exports: `dechunk`, `ChunkError`.
//! Role: Second codec stage, run when `Transfer-Encoding` lists `chunked`.
//! Invariants: Chunks are read by declared hex length, so payloads may hold CRLF.
//! Invariants: Input without the terminating zero-length chunk is an error, never a partial result.
use std::error::Error as StdError;
use std::fmt;

use bstr::ByteSlice;

const CRLF: &[u8] = b"\r\n";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChunkError {
    MissingTerminator,
    UnterminatedSizeLine { offset: usize },
    InvalidSize { offset: usize, line: String },
    Truncated { offset: usize, expected: usize, available: usize },
    MissingDataTerminator { offset: usize },
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkError::MissingTerminator => write!(f, "missing terminating zero-length chunk"),
            ChunkError::UnterminatedSizeLine { offset } => {
                write!(f, "chunk-size line at offset {offset} is not terminated by CRLF")
            }
            ChunkError::InvalidSize { offset, line } => {
                write!(f, "invalid chunk size {line:?} at offset {offset}")
            }
            ChunkError::Truncated {
                offset,
                expected,
                available,
            } => write!(
                f,
                "chunk at offset {offset} declares {expected} bytes but only {available} remain"
            ),
            ChunkError::MissingDataTerminator { offset } => {
                write!(f, "chunk data is not followed by CRLF at offset {offset}")
            }
        }
    }
}

impl StdError for ChunkError {}

/// Concatenates the chunk payloads of `input`.
///
/// Each chunk is read by its declared hex length, so payload bytes may contain
/// CRLF. Chunk extensions (`;name=value`) and the trailer section after the
/// zero-length chunk are ignored.
pub fn dechunk(input: &[u8]) -> Result<Vec<u8>, ChunkError> {
    let mut out = Vec::with_capacity(input.len());
    let mut pos = 0usize;
    loop {
        if pos == input.len() {
            return Err(ChunkError::MissingTerminator);
        }
        let rest = &input[pos..];
        let line_len = rest
            .find(CRLF)
            .ok_or(ChunkError::UnterminatedSizeLine { offset: pos })?;
        let size_line = &rest[..line_len];
        let size = parse_chunk_size(size_line).ok_or_else(|| ChunkError::InvalidSize {
            offset: pos,
            line: size_line.to_str_lossy().into_owned(),
        })?;
        pos += line_len + CRLF.len();
        if size == 0 {
            return Ok(out);
        }

        let available = input.len() - pos;
        if size > available {
            return Err(ChunkError::Truncated {
                offset: pos,
                expected: size,
                available,
            });
        }
        let end = pos + size;
        out.extend_from_slice(&input[pos..end]);
        if input.get(end..end + CRLF.len()) != Some(CRLF) {
            return Err(ChunkError::MissingDataTerminator { offset: end });
        }
        pos = end + CRLF.len();
    }
}

fn parse_chunk_size(line: &[u8]) -> Option<usize> {
    let digits = match line.find_byte(b';') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let digits = digits.trim_with(|c| c == ' ' || c == '\t');
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let text = std::str::from_utf8(digits).ok()?;
    usize::from_str_radix(text, 16).ok()
}
