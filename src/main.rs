//! Purpose: `tuple-reader` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, writes decoded tuples on stdout.
//! Invariants: stdout carries only NDJSON tuples (or JSON for `version` when piped).
//! Invariants: Non-interactive errors and notices are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use tuple_reader::api::{DEFAULT_MAX_BODY_BYTES, Error, ErrorKind, to_exit_code};
use tuple_reader::notice::{Notice, notice_json};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    init_tracing(cli.verbose);

    command_dispatch::dispatch_command(cli.command, color_mode)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "tuple-reader",
    version,
    about = "Decode captured traffic tuples into readable JSON",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Each input line is one captured tuple: sourceRequest, sourceResponse,
targetRequest, and targetResponses, with base64 bodies. Bodies are decoded
(base64, chunked framing, gzip, JSON or bulk JSON) and written back in place.
"#,
    after_help = r#"EXAMPLES
  $ tuple-reader decode --in tuples.log --out decoded.ndjson
  $ cat tuples.log | tuple-reader decode --failures failures.ndjson
  $ tuple-reader decode --in tuples.log --jobs 8 -e stop

LEARN MORE
  $ tuple-reader <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        global = true,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,
    #[arg(
        short,
        long,
        global = true,
        help = "Log benign skips and per-line progress (overridden by RUST_LOG)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, ValueEnum)]
enum ErrorPolicyCli {
    Stop,
    Skip,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Decode a stream of captured tuples",
        long_about = r#"Decode a newline-delimited stream of captured tuples.

Every body is decoded independently. A body that fails to decode is left as
base64 and reported; the rest of the tuple and the stream continue."#,
        after_help = r#"EXAMPLES
  $ tuple-reader decode --in tuples.log                      # to stdout
  $ tuple-reader decode --in tuples.log --out decoded.ndjson
  $ tail -f tuples.log | tuple-reader decode --line-buffered
  $ tuple-reader decode --in tuples.log --failures failed.ndjson --fail-on-errors

NOTES
  - Lines that are not JSON are skipped by default (-e skip); -e stop aborts.
  - Exit code 6 with --fail-on-errors means some line or body could not be decoded."#
    )]
    Decode(DecodeArgs),
    #[command(about = "Print version info")]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        long_about = r#"Generate shell completion scripts.

Prints a completion script for the given shell to stdout."#,
        after_help = r#"EXAMPLES
  $ tuple-reader completion bash > ~/.local/share/bash-completion/completions/tuple-reader
  $ tuple-reader completion zsh > ~/.zfunc/_tuple-reader"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Args)]
struct DecodeArgs {
    #[arg(
        long = "in",
        value_name = "FILE",
        help = "Input NDJSON file (default: stdin; `-` also means stdin)",
        value_hint = ValueHint::FilePath
    )]
    input: Option<PathBuf>,
    #[arg(
        long = "out",
        value_name = "FILE",
        help = "Output NDJSON file (default: stdout)",
        value_hint = ValueHint::FilePath
    )]
    output: Option<PathBuf>,
    #[arg(
        long,
        value_name = "FILE",
        help = "Write one JSON failure record per line to FILE",
        value_hint = ValueHint::FilePath
    )]
    failures: Option<PathBuf>,
    #[arg(
        short = 'e',
        long = "errors",
        default_value = "skip",
        value_enum,
        help = "Policy for lines that are not valid tuples: skip|stop"
    )]
    errors: ErrorPolicyCli,
    #[arg(
        short = 'j',
        long,
        default_value_t = 1,
        help = "Decode with N worker threads (0 = one per CPU); output order is kept"
    )]
    jobs: usize,
    #[arg(
        long,
        default_value_t = 64 * 1024 * 1024,
        help = "Lines longer than this many bytes are treated as failures"
    )]
    max_record_bytes: usize,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_BODY_BYTES,
        help = "Fail a body whose decompressed size would exceed this many bytes"
    )]
    max_body_bytes: usize,
    #[arg(long, help = "Flush output after every tuple (for live pipes)")]
    line_buffered: bool,
    #[arg(long, help = "Exit with code 6 if any line or body failed to decode")]
    fail_on_errors: bool,
    #[arg(short, long, help = "Do not print the end-of-run summary on stderr")]
    quiet: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::NotFound => err.with_hint("Check the --in path, or pipe tuples on stdin."),
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_BACKTRACE=1 and share command/context if it persists.",
    )
}

fn emit_version_output() {
    if io::stdout().is_terminal() {
        println!("tuple-reader {}", env!("CARGO_PKG_VERSION"));
    } else {
        println!(
            "{}",
            json!({
                "name": "tuple-reader",
                "version": env!("CARGO_PKG_VERSION"),
            })
        );
    }
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {}", notice.message);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Parse => "parse error".to_string(),
        ErrorKind::Decode => "decode error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(line) = err.line() {
        inner.insert("line".to_string(), json!(line));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let label = |text: &str, color: AnsiColor| colorize_label(text, use_color, color);
    let mut text = format!("{} {}", label("error:", AnsiColor::Red), error_message(err));
    match (err.path(), err.line()) {
        (Some(path), Some(line)) => text.push_str(&format!(" ({}:{line})", path.display())),
        (Some(path), None) => text.push_str(&format!(" ({})", path.display())),
        (None, Some(line)) => text.push_str(&format!(" (line {line})")),
        (None, None) => {}
    }
    if let Some(cause) = error_causes(err).first() {
        text.push_str(&format!("\n  {} {cause}", label("caused by:", AnsiColor::Yellow)));
    }
    if let Some(hint) = err.hint() {
        text.push_str(&format!("\n  {} {hint}", label("hint:", AnsiColor::Yellow)));
    }
    text
}

// First non-empty line of clap's rendering, without its `error:` prefix.
fn clap_error_summary(err: &clap::Error) -> String {
    err.to_string()
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.strip_prefix("error:").unwrap_or(line).trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn clap_error_hint(err: &clap::Error) -> String {
    if err.to_string().contains("tuple-reader decode") {
        "Try `tuple-reader decode --help`.".to_string()
    } else {
        "Try `tuple-reader --help`.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Cli, Command, ErrorPolicyCli, clap_error_hint, clap_error_summary, error_json, error_text,
    };
    use clap::Parser;
    use tuple_reader::api::{Error, ErrorKind};

    #[test]
    fn error_text_respects_color_flag() {
        let err = Error::new(ErrorKind::Usage).with_message("bad input");
        let colored = error_text(&err, true);
        let plain = error_text(&err, false);
        assert!(colored.contains("\u{1b}[31merror:\u{1b}[0m"));
        assert!(plain.contains("error:"));
        assert!(!plain.contains("\u{1b}["));
    }

    #[test]
    fn error_text_folds_path_and_line_into_first_line() {
        let err = Error::new(ErrorKind::Parse)
            .with_message("invalid tuple json")
            .with_path("capture.ndjson")
            .with_line(9)
            .with_hint("Use -e skip to continue past malformed lines.");
        let text = error_text(&err, false);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("error: invalid tuple json (capture.ndjson:9)"));
        assert_eq!(
            lines.next(),
            Some("  hint: Use -e skip to continue past malformed lines.")
        );
    }

    #[test]
    fn clap_errors_point_at_the_subcommand_help() {
        let Err(err) = Cli::try_parse_from(["tuple-reader", "decode", "--errors", "sometimes"])
        else {
            panic!("expected a parse error");
        };
        assert!(clap_error_summary(&err).contains("sometimes"));
        assert_eq!(clap_error_hint(&err), "Try `tuple-reader decode --help`.");

        let Err(err) = Cli::try_parse_from(["tuple-reader", "frobnicate"]) else {
            panic!("expected a parse error");
        };
        assert_eq!(clap_error_hint(&err), "Try `tuple-reader --help`.");
    }

    #[test]
    fn error_json_includes_line_and_hint() {
        let err = Error::new(ErrorKind::Parse)
            .with_message("invalid tuple json on line 3")
            .with_hint("Use -e skip to continue past malformed lines.")
            .with_line(3);
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Parse");
        assert_eq!(value["error"]["line"], 3);
        assert!(value["error"]["hint"].as_str().unwrap().contains("-e skip"));
    }

    #[test]
    fn decode_args_parse_with_defaults() {
        let cli = Cli::try_parse_from(["tuple-reader", "decode", "--in", "tuples.log"])
            .expect("parse");
        let Command::Decode(args) = cli.command else {
            panic!("expected decode");
        };
        assert_eq!(args.input.as_deref(), Some(std::path::Path::new("tuples.log")));
        assert_eq!(args.errors, ErrorPolicyCli::Skip);
        assert_eq!(args.jobs, 1);
        assert_eq!(args.max_body_bytes, tuple_reader::api::DEFAULT_MAX_BODY_BYTES);
        assert!(!args.fail_on_errors);
    }

    #[test]
    fn decode_args_accept_stop_and_jobs() {
        let cli = Cli::try_parse_from(["tuple-reader", "decode", "-e", "stop", "-j", "4", "-v"])
            .expect("parse");
        assert!(cli.verbose);
        let Command::Decode(args) = cli.command else {
            panic!("expected decode");
        };
        assert_eq!(args.errors, ErrorPolicyCli::Stop);
        assert_eq!(args.jobs, 4);
    }
}
