//! Implementation of the `ledgerkit-check` command.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ledgerkit_loader::{LoadResult, Options, Session, SourceMap};
use ledgerkit_parser::ParseError;
use serde::Serialize;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::report;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "LEDGERKIT_LOG";

/// Code given to parser warnings in JSON output.
const WARNING_CODE: &str = "W0001";

/// Output format for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output (default)
    #[default]
    Text,
    /// JSON output for IDE/tooling integration
    Json,
}

/// A diagnostic message in JSON format.
#[derive(Debug, Serialize)]
pub struct JsonDiagnostic {
    /// Source file path
    pub file: String,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub column: usize,
    /// End line number (1-based)
    pub end_line: usize,
    /// End column number (1-based)
    pub end_column: usize,
    /// Severity: "error" or "warning"
    pub severity: String,
    /// Diagnostic code (e.g. "P0016", "E7001")
    pub code: String,
    /// Message
    pub message: String,
    /// Optional hint for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Include chain, outermost first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// JSON output structure for all diagnostics.
#[derive(Debug, Serialize)]
pub struct JsonOutput {
    /// List of diagnostics
    pub diagnostics: Vec<JsonDiagnostic>,
    /// Number of transactions read
    pub xact_count: usize,
    /// Total error count
    pub error_count: usize,
    /// Total warning count
    pub warning_count: usize,
}

/// Read ledger journals and report every error.
#[derive(Parser, Debug)]
#[command(name = "ledgerkit-check", author, version, about, long_about = None)]
pub struct Args {
    /// Journal files to read, in order
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Show verbose output including timing information
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress all output (just use exit code)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format (text or json)
    #[arg(long, short = 'f', value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Read `,` as the decimal mark
    #[arg(long)]
    pub decimal_comma: bool,

    /// Print time amounts as H:MM
    #[arg(long)]
    pub time_colon: bool,

    /// Warn about undeclared accounts, commodities and payees
    #[arg(long)]
    pub strict: bool,

    /// Reject undeclared accounts, commodities and payees
    #[arg(long)]
    pub pedantic: bool,

    /// Do not enforce balance assertions
    #[arg(long)]
    pub permissive: bool,

    /// Price database read before the journals
    #[arg(long, value_name = "FILE")]
    pub price_db: Option<PathBuf>,

    /// Date format tried before the built-in ones (strftime syntax)
    #[arg(long, value_name = "FORMAT")]
    pub input_date_format: Option<String>,

    /// Read every journal under this account
    #[arg(long, value_name = "ACCOUNT")]
    pub master_account: Option<String>,

    /// Never colour diagnostics
    #[arg(long)]
    pub no_color: bool,
}

impl Args {
    /// Session options selected on the command line.
    #[must_use]
    pub fn options(&self) -> Options {
        let mut options = Options::new();
        let flags = [
            ("decimal-comma", self.decimal_comma),
            ("time-colon", self.time_colon),
            ("strict", self.strict),
            ("pedantic", self.pedantic),
            ("permissive", self.permissive),
        ];
        for (name, on) in flags {
            if on {
                options.set(name, None);
            }
        }
        if let Some(path) = &self.price_db {
            options.set("price-db", Some(&path.to_string_lossy()));
        }
        if let Some(format) = &self.input_date_format {
            options.set("input-date-format", Some(format));
        }
        if let Some(account) = &self.master_account {
            options.set("master-account", Some(account));
        }
        options
    }
}

/// Line and column span of a parse error, both 1-based.
fn error_location(error: &ParseError, source_map: &SourceMap) -> (usize, usize, usize, usize) {
    let Some(file) = source_map.get_by_path(&error.path) else {
        return (error.line, 1, error.line, 1);
    };
    let (line, column) = file.line_col(error.span.start);
    if error.line != 0 && line != error.line {
        return (error.line, 1, error.line, 1);
    }
    let (end_line, end_column) = file.line_col(error.span.end);
    (line, column, end_line, end_column)
}

fn json_diagnostics(
    result: &LoadResult,
    source_map: &SourceMap,
    main_file: &str,
) -> Vec<JsonDiagnostic> {
    let mut diagnostics = Vec::new();

    for warning in &result.option_warnings {
        diagnostics.push(JsonDiagnostic {
            file: main_file.to_string(),
            line: 1,
            column: 1,
            end_line: 1,
            end_column: 1,
            severity: "warning".to_string(),
            code: warning.code.to_string(),
            message: warning.message.clone(),
            hint: None,
            context: None,
        });
    }

    for error in &result.errors {
        let (line, column, end_line, end_column) = error_location(error, source_map);
        let context = if error.context.is_empty() {
            None
        } else {
            let chain: Vec<&str> = error.context.iter().rev().map(String::as_str).collect();
            Some(chain.join("\n"))
        };
        diagnostics.push(JsonDiagnostic {
            file: error.path.display().to_string(),
            line,
            column,
            end_line,
            end_column,
            severity: "error".to_string(),
            code: report::error_code(error),
            message: error.message(),
            hint: error.hint.clone(),
            context,
        });
    }

    for warning in &result.warnings {
        diagnostics.push(JsonDiagnostic {
            file: warning.path.display().to_string(),
            line: warning.line,
            column: 1,
            end_line: warning.line,
            end_column: 1,
            severity: "warning".to_string(),
            code: WARNING_CODE.to_string(),
            message: warning.message.clone(),
            hint: None,
            context: None,
        });
    }

    diagnostics
}

/// Check the journals named in `args`, writing diagnostics to `out`.
///
/// Returns the process exit status: 0 when clean, 1 when any error was
/// found. Failures that stop reading altogether, such as a missing
/// top-level file, are returned as `Err`.
pub fn run<W: Write>(args: &Args, out: &mut W) -> Result<u8> {
    let start = std::time::Instant::now();
    let mut session = Session::new(args.options());

    let result = session
        .read_journal_files(&args.files)
        .with_context(|| format!("failed to read {}", display_files(&args.files)))?;

    let error_count = result.errors.len();
    let warning_count = result.warnings.len() + result.option_warnings.len();
    let exit = u8::from(error_count > 0);
    tracing::debug!(
        xacts = result.xact_count,
        errors = error_count,
        warnings = warning_count,
        "journals read"
    );

    if args.quiet {
        return Ok(exit);
    }

    match args.format {
        OutputFormat::Json => {
            let main_file = args
                .files
                .first()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            let output = JsonOutput {
                diagnostics: json_diagnostics(&result, session.source_map(), &main_file),
                xact_count: result.xact_count,
                error_count,
                warning_count,
            };
            serde_json::to_writer_pretty(&mut *out, &output)
                .context("failed to write JSON output")?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            let color = !args.no_color && io::stdout().is_terminal();
            report::report_option_warnings(&result.option_warnings, &mut *out)?;
            report::report_parse_errors(&result.errors, session.source_map(), color, &mut *out)?;
            report::report_warnings(&result.warnings, &mut *out)?;

            if args.verbose {
                writeln!(
                    out,
                    "Read {} transactions from {} files in {:.2?}",
                    result.xact_count,
                    session.source_map().len(),
                    start.elapsed()
                )?;
            }
            report::print_summary(error_count, warning_count, &mut *out)?;
        }
    }

    Ok(exit)
}

fn display_files(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn init_tracing(verbose: bool) {
    let result = if verbose {
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(io::stderr)
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("warning: logging disabled: {e}");
    }
}

/// Entry point of the `ledgerkit-check` binary.
pub fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut stdout = io::stdout().lock();
    match run(&args, &mut stdout) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            if !args.quiet {
                eprintln!("error: {e:#}");
            }
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerkit_core::CheckingStyle;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "ledgerkit-check",
            "--strict",
            "--decimal-comma",
            "-f",
            "json",
            "a.ledger",
            "b.ledger",
        ]);
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.format, OutputFormat::Json);

        let options = args.options();
        assert!(options.decimal_comma);
        assert_eq!(options.checking_style(), CheckingStyle::Warning);
        assert!(options.warnings.is_empty());
    }

    #[test]
    fn test_files_required() {
        assert!(Args::try_parse_from(["ledgerkit-check"]).is_err());
    }

    #[test]
    fn test_value_options() {
        let args = Args::parse_from([
            "ledgerkit-check",
            "--price-db",
            "prices.db",
            "--master-account",
            "Personal",
            "main.ledger",
        ]);
        let options = args.options();
        assert_eq!(options.price_db, Some(PathBuf::from("prices.db")));
        assert_eq!(options.master_account.as_deref(), Some("Personal"));
    }
}
