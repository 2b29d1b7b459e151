//! Purpose: Hold top-level CLI command dispatch for `tuple-reader`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap; wire files and stdio to the stream driver.
//! Invariants: Decoded tuples go to the output sink only; diagnostics go to stderr or `--failures`.
//! Invariants: A failure-log write error is reported after the stream finishes, never mid-line.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use tuple_reader::api::{DecodeConfig, ErrorPolicy, StreamFailure, StreamSummary, decode_stream};
use tuple_reader::notice::failure_json;

use super::*;

pub(super) fn dispatch_command(command: Command, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "tuple-reader", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output();
            Ok(RunOutcome::ok())
        }
        Command::Decode(args) => run_decode(args, color_mode),
    }
}

fn run_decode(args: DecodeArgs, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    let config = DecodeConfig {
        errors: match args.errors {
            ErrorPolicyCli::Stop => ErrorPolicy::Stop,
            ErrorPolicyCli::Skip => ErrorPolicy::Skip,
        },
        jobs: resolve_jobs(args.jobs),
        max_record_bytes: args.max_record_bytes,
        max_body_bytes: args.max_body_bytes,
        line_buffered: args.line_buffered,
        ..DecodeConfig::default()
    };

    let input: Box<dyn Read> = match args.input.as_deref() {
        None => Box::new(io::stdin().lock()),
        Some(path) if path == Path::new("-") => Box::new(io::stdin().lock()),
        Some(path) => Box::new(open_input(path)?),
    };
    let output: Box<dyn Write> = match args.output.as_deref() {
        None => Box::new(io::stdout().lock()),
        Some(path) => Box::new(create_output(path)?),
    };
    let mut failure_log = match args.failures.as_deref() {
        Some(path) => Some((BufWriter::new(create_output(path)?), path.to_path_buf())),
        None => None,
    };

    let mut failure_count = 0u64;
    let mut log_error: Option<Error> = None;
    let summary = decode_stream(input, output, config, |failure: StreamFailure| {
        failure_count += 1;
        let Some((writer, path)) = failure_log.as_mut() else {
            return;
        };
        if log_error.is_some() {
            return;
        }
        let time = notice_time_now().unwrap_or_default();
        let line = failure_json(&failure, &time).to_string();
        if let Err(err) = writeln!(writer, "{line}") {
            log_error = Some(
                Error::new(ErrorKind::Io)
                    .with_message("failed to write failure log")
                    .with_path(path.clone())
                    .with_source(err),
            );
        }
    })?;

    if let Some((mut writer, path)) = failure_log {
        if let Some(err) = log_error {
            return Err(err);
        }
        writer.flush().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to flush failure log")
                .with_path(path)
                .with_source(err)
        })?;
    }

    if !args.quiet {
        emit_notice(&summary_notice(&summary), color_mode);
    }

    if args.fail_on_errors && failure_count > 0 {
        return Ok(RunOutcome::with_code(to_exit_code(ErrorKind::Decode)));
    }
    Ok(RunOutcome::ok())
}

fn resolve_jobs(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

fn open_input(path: &Path) -> Result<File, Error> {
    File::open(path).map_err(|err| {
        let kind = if err.kind() == io::ErrorKind::NotFound {
            ErrorKind::NotFound
        } else {
            ErrorKind::Io
        };
        Error::new(kind)
            .with_message("failed to open input")
            .with_path(path)
            .with_source(err)
    })
}

fn create_output(path: &Path) -> Result<File, Error> {
    File::create(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to create output file")
            .with_path(path)
            .with_source(err)
    })
}

fn summary_notice(summary: &StreamSummary) -> Notice {
    let details = match serde_json::to_value(summary) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let failed = summary.components_failed + summary.tuples_short_circuited;
    Notice {
        kind: "summary".to_string(),
        time: notice_time_now().unwrap_or_default(),
        cmd: "decode".to_string(),
        message: format!(
            "decoded {} bodies in {} tuples; {} failed, {} lines skipped",
            summary.components_decoded, summary.tuples, failed, summary.skipped_lines
        ),
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_jobs, summary_notice};
    use tuple_reader::api::StreamSummary;

    #[test]
    fn zero_jobs_means_available_parallelism() {
        assert_eq!(resolve_jobs(3), 3);
        assert!(resolve_jobs(0) >= 1);
    }

    #[test]
    fn summary_notice_carries_counts() {
        let summary = StreamSummary {
            lines: 4,
            tuples: 3,
            skipped_lines: 1,
            components_decoded: 7,
            components_failed: 2,
            tuples_short_circuited: 0,
        };
        let notice = summary_notice(&summary);
        assert_eq!(notice.kind, "summary");
        assert_eq!(notice.details["components_decoded"], 7);
        assert!(notice.message.contains("2 failed"));
        assert!(notice.message.contains("1 lines skipped"));
    }
}
