//! Purpose: Drive the tuple decoder over an NDJSON stream, one tuple per line.
//! Exports: `ErrorPolicy`, `DecodeConfig`, `StreamSummary`, `LineFailure`, `StreamFailure`, `decode_stream`.
//! Role: Line source and sink around `core::tuple`; owns skip/stop policy and fan-out.
//! Invariants: Output lines are written in input order, also when decoding in parallel.
//! Invariants: Field failures never stop the stream; only line failures consult `ErrorPolicy`.
//! Invariants: At most `max_record_bytes + 2` bytes of a line are buffered; the rest is drained unread.
//! Invariants: Worker queues are bounded.
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::sync::{Mutex, mpsc};
use std::thread;

use bstr::ByteSlice;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::codec::DEFAULT_MAX_BODY_BYTES;
use crate::core::tuple::{FailureRecord, TupleReport, process_tuple_with_limit};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorPolicy {
    Stop,
    Skip,
}

#[derive(Copy, Clone, Debug)]
pub struct DecodeConfig {
    pub errors: ErrorPolicy,
    pub jobs: usize,
    pub max_record_bytes: usize,
    pub max_body_bytes: usize,
    pub max_snippet_bytes: usize,
    pub line_buffered: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            errors: ErrorPolicy::Skip,
            jobs: 1,
            max_record_bytes: 64 * 1024 * 1024,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_snippet_bytes: 160,
            line_buffered: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StreamSummary {
    pub lines: u64,
    pub tuples: u64,
    pub skipped_lines: u64,
    pub components_decoded: u64,
    pub components_failed: u64,
    pub tuples_short_circuited: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LineFailure {
    pub line: u64,
    pub message: String,
    pub error_kind: String,
    pub snippet: Option<String>,
}

impl LineFailure {
    fn into_error(self) -> Error {
        Error::new(ErrorKind::Parse)
            .with_message(format!("{} on line {}", self.message, self.line))
            .with_line(self.line)
            .with_hint("Use -e skip to continue past malformed lines.")
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamFailure {
    Line(LineFailure),
    Field(FailureRecord),
}

type LineResult = Result<TupleReport, LineFailure>;

fn io_error(err: io::Error, message: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_source(err)
}

/// Decodes every tuple line from `reader` into `writer`.
///
/// `on_failure` sees every line failure that was skipped and every field
/// failure inside written tuples, in output order.
pub fn decode_stream<R, W, N>(
    reader: R,
    writer: W,
    config: DecodeConfig,
    mut on_failure: N,
) -> Result<StreamSummary, Error>
where
    R: Read,
    W: Write,
    N: FnMut(StreamFailure),
{
    let mut lines = LineReader::new(reader, config.max_record_bytes);
    let mut sink = Sink {
        writer: BufWriter::new(writer),
        config,
        summary: StreamSummary::default(),
    };

    if config.jobs <= 1 {
        while let Some(raw) = lines.next_line()? {
            sink.emit(decode_line(&raw, &config), &mut on_failure)?;
        }
    } else {
        decode_parallel(&mut lines, &mut sink, &mut on_failure)?;
    }

    sink.writer
        .flush()
        .map_err(|err| io_error(err, "failed to flush output"))?;
    Ok(sink.summary)
}

fn decode_parallel<R, W, N>(
    lines: &mut LineReader<R>,
    sink: &mut Sink<W>,
    on_failure: &mut N,
) -> Result<(), Error>
where
    R: Read,
    W: Write,
    N: FnMut(StreamFailure),
{
    let config = sink.config;
    let (job_tx, job_rx) = mpsc::sync_channel::<(u64, RawLine)>(config.jobs * 4);
    let job_rx = Mutex::new(job_rx);
    let (result_tx, result_rx) = mpsc::channel::<(u64, LineResult)>();

    thread::scope(|scope| {
        for worker in 0..config.jobs {
            let job_rx = &job_rx;
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                debug!(worker, "decode worker started");
                loop {
                    let job = match job_rx.lock() {
                        Ok(rx) => rx.recv(),
                        Err(_) => return,
                    };
                    let Ok((seq, raw)) = job else {
                        return;
                    };
                    let result = decode_line(&raw, &config);
                    if result_tx.send((seq, result)).is_err() {
                        return;
                    }
                }
            });
        }
        drop(result_tx);

        let mut pending = BTreeMap::new();
        let mut next = 0u64;
        let mut sent = 0u64;
        while let Some(raw) = lines.next_line()? {
            job_tx.send((sent, raw)).map_err(|_| {
                Error::new(ErrorKind::Internal).with_message("decode workers exited early")
            })?;
            sent += 1;
            while let Ok((seq, result)) = result_rx.try_recv() {
                pending.insert(seq, result);
            }
            flush_ready(&mut pending, &mut next, sink, on_failure)?;
        }
        drop(job_tx);

        for (seq, result) in result_rx.iter() {
            pending.insert(seq, result);
            flush_ready(&mut pending, &mut next, sink, on_failure)?;
        }
        if next != sent {
            return Err(Error::new(ErrorKind::Internal)
                .with_message(format!("decoded {next} of {sent} lines")));
        }
        Ok(())
    })
}

fn flush_ready<W, N>(
    pending: &mut BTreeMap<u64, LineResult>,
    next: &mut u64,
    sink: &mut Sink<W>,
    on_failure: &mut N,
) -> Result<(), Error>
where
    W: Write,
    N: FnMut(StreamFailure),
{
    while let Some(result) = pending.remove(&*next) {
        sink.emit(result, on_failure)?;
        *next += 1;
    }
    Ok(())
}

fn decode_line(raw: &RawLine, config: &DecodeConfig) -> LineResult {
    let line_no = raw.line_no;
    let line_failure = |message: &str, error_kind: &str| LineFailure {
        line: line_no,
        message: message.to_string(),
        error_kind: error_kind.to_string(),
        snippet: Some(truncate_bytes(&raw.bytes, config.max_snippet_bytes)),
    };
    if raw.oversize {
        return Err(line_failure("record exceeds size limit", "Oversize"));
    }
    let Ok(text) = std::str::from_utf8(&raw.bytes) else {
        return Err(line_failure("line is not valid utf-8", "Utf8"));
    };
    process_tuple_with_limit(text, line_no, config.max_body_bytes).map_err(|err| {
        let mut failure = line_failure("invalid tuple json", "Parse");
        if let Some(hint) = err.hint() {
            failure.message = format!("invalid tuple json ({hint})");
        }
        failure
    })
}

struct Sink<W: Write> {
    writer: BufWriter<W>,
    config: DecodeConfig,
    summary: StreamSummary,
}

impl<W: Write> Sink<W> {
    fn emit<N>(&mut self, result: LineResult, on_failure: &mut N) -> Result<(), Error>
    where
        N: FnMut(StreamFailure),
    {
        self.summary.lines += 1;
        match result {
            Ok(report) => {
                self.write_json_line(&report.tuple)?;
                self.summary.tuples += 1;
                self.summary.components_decoded += report.decoded as u64;
                if report.short_circuited() {
                    self.summary.tuples_short_circuited += 1;
                } else {
                    self.summary.components_failed += report.failures.len() as u64;
                }
                for failure in report.failures {
                    on_failure(StreamFailure::Field(failure));
                }
                Ok(())
            }
            Err(failure) => match self.config.errors {
                ErrorPolicy::Stop => Err(failure.into_error()),
                ErrorPolicy::Skip => {
                    warn!(line = failure.line, kind = %failure.error_kind, "{}; line skipped", failure.message);
                    self.summary.skipped_lines += 1;
                    on_failure(StreamFailure::Line(failure));
                    Ok(())
                }
            },
        }
    }

    fn write_json_line(&mut self, value: &Value) -> Result<(), Error> {
        serde_json::to_writer(&mut self.writer, value).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode tuple")
                .with_source(err)
        })?;
        self.writer
            .write_all(b"\n")
            .map_err(|err| io_error(err, "failed to write output"))?;
        if self.config.line_buffered {
            self.writer
                .flush()
                .map_err(|err| io_error(err, "failed to flush output"))?;
        }
        Ok(())
    }
}

struct RawLine {
    line_no: u64,
    bytes: Vec<u8>,
    // Set when the line ran past the cap; `bytes` then holds only its head.
    oversize: bool,
}

// Yields non-blank lines with their 1-based physical line numbers.
struct LineReader<R: Read> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    line_no: u64,
    max_record_bytes: usize,
}

impl<R: Read> LineReader<R> {
    fn new(reader: R, max_record_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
            line_no: 0,
            max_record_bytes,
        }
    }

    fn next_line(&mut self) -> Result<Option<RawLine>, Error> {
        // Room for the content plus a CRLF terminator.
        let limit = self.max_record_bytes as u64 + 2;
        loop {
            self.buf.clear();
            let read = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .map_err(|err| io_error(err, "failed to read input"))?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            // Hit the cap before a newline: the line is longer than allowed.
            let truncated = read as u64 == limit && !self.buf.ends_with(b"\n");
            let line = self.buf.trim_end_with(|c| c == '\n' || c == '\r');
            if truncated || line.len() > self.max_record_bytes {
                let bytes = line.to_vec();
                if truncated {
                    self.skip_rest_of_line()?;
                }
                return Ok(Some(RawLine {
                    line_no: self.line_no,
                    bytes,
                    oversize: true,
                }));
            }
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(RawLine {
                line_no: self.line_no,
                bytes: line.to_vec(),
                oversize: false,
            }));
        }
    }

    fn skip_rest_of_line(&mut self) -> Result<(), Error> {
        loop {
            let available = self
                .inner
                .fill_buf()
                .map_err(|err| io_error(err, "failed to read input"))?;
            if available.is_empty() {
                return Ok(());
            }
            let (used, done) = match available.find_byte(b'\n') {
                Some(idx) => (idx + 1, true),
                None => (available.len(), false),
            };
            self.inner.consume(used);
            if done {
                return Ok(());
            }
        }
    }
}

fn truncate_snippet(input: &str, max: usize) -> String {
    if input.len() <= max {
        return input.to_string();
    }
    let suffix = "...";
    if max <= suffix.len() {
        return suffix[..max].to_string();
    }
    let mut take = max - suffix.len();
    while !input.is_char_boundary(take) {
        take -= 1;
    }
    format!("{}{suffix}", &input[..take])
}

fn truncate_bytes(input: &[u8], max: usize) -> String {
    let text = input.to_str_lossy();
    truncate_snippet(&text, max)
}
