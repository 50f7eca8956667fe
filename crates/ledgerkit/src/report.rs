//! Error reporting with source-annotated diagnostics.
//!
//! Uses ariadne for pretty-printed error messages with source context.

use std::io::Write;

use ariadne::{ColorGenerator, Config, Label, Report, ReportKind, Source};
use ledgerkit_loader::{OptionWarning, SourceMap};
use ledgerkit_parser::{ParseError, ParseWarning};

/// Diagnostic code shown for a parse error.
#[must_use]
pub fn error_code(error: &ParseError) -> String {
    format!("P{:04}", error.kind_code())
}

/// Char offsets of a byte span, clamped to the source.
///
/// ariadne counts characters, journals are full of `€` and `£`.
fn char_range(source: &str, start: usize, end: usize) -> (usize, usize) {
    let to_chars = |offset: usize| {
        let mut offset = offset.min(source.len());
        while !source.is_char_boundary(offset) {
            offset -= 1;
        }
        source[..offset].chars().count()
    };
    let start = to_chars(start);
    (start, to_chars(end).max(start))
}

/// Report parse errors to the given writer.
///
/// Errors whose file is in `source_map` are drawn over their source text,
/// with the include chain as notes; the rest are printed plainly.
pub fn report_parse_errors<W: Write>(
    errors: &[ParseError],
    source_map: &SourceMap,
    color: bool,
    writer: &mut W,
) -> std::io::Result<usize> {
    let mut colors = ColorGenerator::new();

    for error in errors {
        let Some(file) = source_map.get_by_path(&error.path) else {
            writeln!(writer, "error[{}]: {error}", error_code(error))?;
            if let Some(hint) = &error.hint {
                writeln!(writer, "  help: {hint}")?;
            }
            writeln!(writer)?;
            continue;
        };

        let path_str = file.path.display().to_string();
        let id = path_str.as_str();
        let (start, end) = char_range(&file.source, error.span.start, error.span.end);

        let mut report = Report::build(ReportKind::Error, (id, start..end))
            .with_code(error_code(error))
            .with_message(error.message())
            .with_label(
                Label::new((id, start..end))
                    .with_message(error.label())
                    .with_color(colors.next()),
            )
            .with_config(Config::default().with_compact(false).with_color(color));
        for ctx in error.context.iter().rev() {
            report = report.with_note(ctx);
        }
        if let Some(hint) = &error.hint {
            report = report.with_help(hint);
        }
        report
            .finish()
            .write((id, Source::from(file.source.as_str())), &mut *writer)?;
    }

    Ok(errors.len())
}

/// Report parser warnings, one line each.
pub fn report_warnings<W: Write>(
    warnings: &[ParseWarning],
    writer: &mut W,
) -> std::io::Result<usize> {
    for warning in warnings {
        writeln!(
            writer,
            "warning: {}:{}: {}",
            warning.path.display(),
            warning.line,
            warning.message
        )?;
    }
    Ok(warnings.len())
}

/// Report rejected options, one line each.
pub fn report_option_warnings<W: Write>(
    warnings: &[OptionWarning],
    writer: &mut W,
) -> std::io::Result<usize> {
    for warning in warnings {
        writeln!(writer, "warning[{}]: {}", warning.code, warning.message)?;
    }
    Ok(warnings.len())
}

/// Print a summary of errors and warnings.
pub fn print_summary<W: Write>(
    errors: usize,
    warnings: usize,
    writer: &mut W,
) -> std::io::Result<()> {
    if errors == 0 && warnings == 0 {
        writeln!(writer, "\x1b[32m\u{2713}\x1b[0m No errors found")?;
    } else {
        let error_text = if errors == 1 { "error" } else { "errors" };
        let warning_text = if warnings == 1 { "warning" } else { "warnings" };

        if errors > 0 && warnings > 0 {
            writeln!(
                writer,
                "\x1b[31m\u{2717}\x1b[0m {errors} {error_text}, {warnings} {warning_text}"
            )?;
        } else if errors > 0 {
            writeln!(writer, "\x1b[31m\u{2717}\x1b[0m {errors} {error_text}")?;
        } else {
            writeln!(writer, "\x1b[33m\u{26A0}\x1b[0m {warnings} {warning_text}")?;
        }
    }
    Ok(())
}
