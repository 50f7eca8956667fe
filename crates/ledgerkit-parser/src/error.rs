//! Parse error types.

use std::fmt;
use std::path::PathBuf;

use ledgerkit_core::{AmountError, BalanceError, DateError, ExprError, JournalError, XactError};
use serde::Serialize;
use thiserror::Error;

use crate::Span;

/// A parse error with location information.
///
/// `context` holds the "While parsing ..." lines gathered on the way out,
/// innermost first; [`fmt::Display`] prints them outermost first, the way
/// they read in a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// The kind of error.
    pub kind: ParseErrorKind,
    /// File the error was found in; empty until located.
    pub path: PathBuf,
    /// 1-based line number; 0 until located.
    pub line: usize,
    /// Byte range of the offending directive.
    pub span: Span,
    /// Accumulated context, innermost first.
    pub context: Vec<String>,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl ParseError {
    /// Create a new, unlocated parse error.
    #[must_use]
    pub const fn new(kind: ParseErrorKind) -> Self {
        Self {
            kind,
            path: PathBuf::new(),
            line: 0,
            span: Span::new(0, 0),
            context: Vec::new(),
            hint: None,
        }
    }

    /// Record where the error happened.
    #[must_use]
    pub fn at(mut self, path: impl Into<PathBuf>, line: usize, span: Span) -> Self {
        self.path = path.into();
        self.line = line;
        self.span = span;
        self
    }

    /// Add an outer context line.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Add a hint for fixing this error.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Whether this is the cancellation signal rather than bad input.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ParseErrorKind::Cancelled)
    }

    /// Get a numeric code for the error kind.
    #[must_use]
    pub const fn kind_code(&self) -> u32 {
        match &self.kind {
            ParseErrorKind::UnexpectedWhitespace => 1,
            ParseErrorKind::MissingArgument(_) => 2,
            ParseErrorKind::SubDirectiveMissingArgument { .. } => 3,
            ParseErrorKind::IllegalOption(_) => 4,
            ParseErrorKind::PythonUnsupported(_) => 5,
            ParseErrorKind::PostingHasNoAccount => 6,
            ParseErrorKind::MissingCostAmount => 7,
            ParseErrorKind::NegativeCost => 8,
            ParseErrorKind::ExpectedCostAmount => 9,
            ParseErrorKind::AssignmentNotConstant => 10,
            ParseErrorKind::AssertionNotConstant => 11,
            ParseErrorKind::BalanceAssertion { .. } => 12,
            ParseErrorKind::ExpectedAssignmentAmount => 13,
            ParseErrorKind::UnexpectedText(_) => 14,
            ParseErrorKind::IncludeNotFound(_) => 15,
            ParseErrorKind::EndWithoutApply => 16,
            ParseErrorKind::EndApplyWithoutApply(_) => 17,
            ParseErrorKind::EndApplyMismatch { .. } => 18,
            ParseErrorKind::AssertionFailed(_) => 19,
            ParseErrorKind::FixedDirective => 20,
            ParseErrorKind::InvalidYear(_) => 21,
            ParseErrorKind::IllegalAlias { .. } => 22,
            ParseErrorKind::PricingEntry => 23,
            ParseErrorKind::PeriodUnbalanced => 24,
            ParseErrorKind::ExpectedPredicate => 25,
            ParseErrorKind::Io { .. } => 26,
            ParseErrorKind::Cancelled => 27,
            ParseErrorKind::Amount(_) => 30,
            ParseErrorKind::Balance(_) => 31,
            ParseErrorKind::Expr(_) => 32,
            ParseErrorKind::Xact(_) => 33,
            ParseErrorKind::Journal(_) => 34,
            ParseErrorKind::Date(_) => 35,
        }
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    /// Get a short label for the error.
    #[must_use]
    pub const fn label(&self) -> &str {
        match &self.kind {
            ParseErrorKind::UnexpectedWhitespace => "unexpected indentation",
            ParseErrorKind::MissingArgument(_) | ParseErrorKind::SubDirectiveMissingArgument { .. } => {
                "missing argument"
            }
            ParseErrorKind::IllegalOption(_) => "unknown option",
            ParseErrorKind::PythonUnsupported(_) => "unsupported directive",
            ParseErrorKind::PostingHasNoAccount => "expected account name",
            ParseErrorKind::MissingCostAmount | ParseErrorKind::ExpectedCostAmount => "expected cost",
            ParseErrorKind::NegativeCost => "negative cost",
            ParseErrorKind::AssignmentNotConstant
            | ParseErrorKind::AssertionNotConstant
            | ParseErrorKind::ExpectedAssignmentAmount => "expected balance amount",
            ParseErrorKind::BalanceAssertion { .. } => "balance assertion failed",
            ParseErrorKind::UnexpectedText(_) => "unexpected text",
            ParseErrorKind::IncludeNotFound(_) => "include not found",
            ParseErrorKind::EndWithoutApply
            | ParseErrorKind::EndApplyWithoutApply(_)
            | ParseErrorKind::EndApplyMismatch { .. } => "unmatched end",
            ParseErrorKind::AssertionFailed(_) => "assertion failed",
            ParseErrorKind::FixedDirective => "invalid fixed rate",
            ParseErrorKind::InvalidYear(_) => "invalid year",
            ParseErrorKind::IllegalAlias { .. } => "illegal alias",
            ParseErrorKind::PricingEntry => "invalid price entry",
            ParseErrorKind::PeriodUnbalanced => "unbalanced periodic transaction",
            ParseErrorKind::ExpectedPredicate => "expected predicate",
            ParseErrorKind::Io { .. } => "read error",
            ParseErrorKind::Cancelled => "cancelled",
            ParseErrorKind::Amount(_) => "invalid amount",
            ParseErrorKind::Balance(_) => "balance error",
            ParseErrorKind::Expr(_) => "expression error",
            ParseErrorKind::Xact(_) => "transaction error",
            ParseErrorKind::Journal(_) => "journal error",
            ParseErrorKind::Date(_) => "invalid date",
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ctx in self.context.iter().rev() {
            writeln!(f, "{ctx}")?;
        }
        write!(f, "Error: {}", self.kind)
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Kinds of parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    /// An indented line outside any block.
    #[error("Unexpected whitespace at beginning of line")]
    UnexpectedWhitespace,
    /// A directive that needs an argument had none.
    #[error("Directive '{0}' requires an argument")]
    MissingArgument(String),
    /// A sub-line of a `payee`, `commodity` or `account` block had no
    /// argument.
    #[error("{directive} directive '{keyword}' requires an argument")]
    SubDirectiveMissingArgument {
        /// `Payee`, `Commodity` or `Account`.
        directive: &'static str,
        /// The sub-directive keyword.
        keyword: String,
    },
    /// No option handler answered to this name.
    #[error("Illegal option {0}")]
    IllegalOption(String),
    /// `python` or `import`.
    #[error("'{0}' directive seen, but Python support is missing")]
    PythonUnsupported(&'static str),
    /// A posting line without an account.
    #[error("Posting has no account")]
    PostingHasNoAccount,
    /// `@ =` with nothing after it.
    #[error("Posting is missing a cost amount")]
    MissingCostAmount,
    /// A cost below zero.
    #[error("A posting's cost may not be negative")]
    NegativeCost,
    /// `@` with nothing after it.
    #[error("Expected a cost amount")]
    ExpectedCostAmount,
    /// A balance assignment whose amount evaluated to nothing.
    #[error("Balance assignment must evaluate to a constant")]
    AssignmentNotConstant,
    /// A balance assertion whose amount evaluated to nothing.
    #[error("Balance assertion must evaluate to a constant")]
    AssertionNotConstant,
    /// The account's balance differs from the asserted one.
    #[error("Balance assertion off by {diff} (expected to see {expected})")]
    BalanceAssertion {
        /// Asserted minus actual.
        diff: String,
        /// The balance the account would need.
        expected: String,
    },
    /// `=` with nothing after it.
    #[error("Expected an balance assignment/assertion amount")]
    ExpectedAssignmentAmount,
    /// Text left over after a posting's amount.
    #[error("Unexpected char '{0}' (Note: inline math requires parentheses)")]
    UnexpectedText(String),
    /// No file matched an `include` pattern.
    #[error("File to include was not found: \"{0}\"")]
    IncludeNotFound(String),
    /// `end` with nothing applied.
    #[error("'end' or 'end apply' found, but no enclosing 'apply' directive")]
    EndWithoutApply,
    /// `end apply KIND` with nothing applied.
    #[error("'end apply {0}' found, but no enclosing 'apply' directive")]
    EndApplyWithoutApply(String),
    /// `end apply KIND` closing a different kind.
    #[error("'end apply {found}' directive does not match 'apply {open}' directive")]
    EndApplyMismatch {
        /// The kind named by `end`.
        found: String,
        /// The kind that is open.
        open: String,
    },
    /// An `assert` directive evaluated false.
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),
    /// `apply fixed` without a usable price.
    #[error("Error in fixed directive")]
    FixedDirective,
    /// `apply year` / `Y` with a bad year.
    #[error("Argument '{0}' not a valid year")]
    InvalidYear(String),
    /// An alias that names itself.
    #[error("Illegal alias {alias}={account}")]
    IllegalAlias {
        /// The alias.
        alias: String,
        /// The account it was meant for.
        account: String,
    },
    /// A `P` line that could not be read.
    #[error("Pricing entry failed to parse")]
    PricingEntry,
    /// A `~` transaction whose postings do not balance.
    #[error("Period transaction failed to balance")]
    PeriodUnbalanced,
    /// `=` with no predicate.
    #[error("Expected predicate after '='")]
    ExpectedPredicate,
    /// A file could not be read.
    #[error("Cannot read file \"{path}\": {message}")]
    Io {
        /// The file.
        path: String,
        /// The operating system's message.
        message: String,
    },
    /// The run was cancelled; never recovered from.
    #[error("Operation was cancelled")]
    Cancelled,
    /// Amount arithmetic or parsing.
    #[error(transparent)]
    Amount(#[from] AmountError),
    /// Balance arithmetic.
    #[error(transparent)]
    Balance(#[from] BalanceError),
    /// Expression parsing or evaluation.
    #[error(transparent)]
    Expr(#[from] ExprError),
    /// Transaction balancing.
    #[error(transparent)]
    Xact(#[from] XactError),
    /// Journal registration and checks.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// Dates.
    #[error(transparent)]
    Date(#[from] DateError),
}

macro_rules! impl_from_kind {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for ParseError {
                fn from(err: $source) -> Self {
                    Self::new(ParseErrorKind::from(err))
                }
            }
        )*
    };
}

impl_from_kind!(AmountError, BalanceError, ExprError, XactError, JournalError, DateError);

impl From<ParseErrorKind> for ParseError {
    fn from(kind: ParseErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Result alias for parser internals.
pub type ParseResult<T> = Result<T, ParseError>;

/// A non-fatal finding, such as a failed `check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    /// The warning text.
    pub message: String,
    /// File the warning was raised in.
    pub path: PathBuf,
    /// 1-based line number.
    pub line: usize,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Warning: \"{}\", line {}: {}",
            self.path.display(),
            self.line,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_new() {
        let err = ParseError::new(ParseErrorKind::PostingHasNoAccount);
        assert_eq!(err.line, 0);
        assert!(err.context.is_empty());
        assert!(err.hint.is_none());
    }

    #[test]
    fn test_parse_error_located() {
        let err = ParseError::new(ParseErrorKind::ExpectedPredicate).at("a.ledger", 4, Span::new(10, 14));
        assert_eq!(err.path, PathBuf::from("a.ledger"));
        assert_eq!(err.line, 4);
        assert_eq!(err.span, Span::new(10, 14));
    }

    #[test]
    fn test_display_prints_outer_context_first() {
        let err = ParseError::new(ParseErrorKind::NegativeCost)
            .with_context("While parsing posting:")
            .with_context("While parsing file \"a.ledger\", line 3:");
        assert_eq!(
            err.to_string(),
            "While parsing file \"a.ledger\", line 3:\nWhile parsing posting:\nError: A posting's cost may not be negative"
        );
    }

    #[test]
    fn test_kind_codes() {
        let code = |kind| ParseError::new(kind).kind_code();
        assert_eq!(code(ParseErrorKind::UnexpectedWhitespace), 1);
        assert_eq!(code(ParseErrorKind::MissingArgument("account".into())), 2);
        assert_eq!(code(ParseErrorKind::EndWithoutApply), 16);
        assert_eq!(code(ParseErrorKind::Amount(AmountError::DivideByZero)), 30);
        assert_eq!(code(ParseErrorKind::Date(DateError::InvalidYear)), 35);
    }

    #[test]
    fn test_error_labels() {
        let label = |kind| ParseError::new(kind).label().to_string();
        assert_eq!(label(ParseErrorKind::PostingHasNoAccount), "expected account name");
        assert_eq!(
            label(ParseErrorKind::BalanceAssertion {
                diff: "$1".into(),
                expected: "$2".into()
            }),
            "balance assertion failed"
        );
        assert_eq!(label(ParseErrorKind::EndApplyWithoutApply("tag".into())), "unmatched end");
    }

    #[test]
    fn test_error_messages() {
        let msg = |kind: ParseErrorKind| kind.to_string();
        assert_eq!(
            msg(ParseErrorKind::MissingArgument("include".into())),
            "Directive 'include' requires an argument"
        );
        assert_eq!(
            msg(ParseErrorKind::SubDirectiveMissingArgument {
                directive: "Commodity",
                keyword: "alias".into()
            }),
            "Commodity directive 'alias' requires an argument"
        );
        assert_eq!(
            msg(ParseErrorKind::BalanceAssertion {
                diff: "$-5.00".into(),
                expected: "$25.00".into()
            }),
            "Balance assertion off by $-5.00 (expected to see $25.00)"
        );
        assert_eq!(
            msg(ParseErrorKind::EndApplyMismatch {
                found: "tag".into(),
                open: "account".into()
            }),
            "'end apply tag' directive does not match 'apply account' directive"
        );
        assert_eq!(
            msg(ParseErrorKind::IncludeNotFound("/tmp/x.ledger".into())),
            "File to include was not found: \"/tmp/x.ledger\""
        );
        assert_eq!(
            msg(ParseErrorKind::PythonUnsupported("import")),
            "'import' directive seen, but Python support is missing"
        );
        assert_eq!(
            msg(ParseErrorKind::Amount(AmountError::DivideByZero)),
            "Divide by zero"
        );
    }

    #[test]
    fn test_from_core_errors() {
        let err: ParseError = JournalError::DoubleCheckin.into();
        assert_eq!(err.message(), "Cannot double check-in to the same account");
        assert!(!err.is_cancelled());
        assert!(ParseError::new(ParseErrorKind::Cancelled).is_cancelled());
    }

    #[test]
    fn test_warning_display() {
        let warning = ParseWarning {
            message: "Check failed: 1 == 2".into(),
            path: PathBuf::from("a.ledger"),
            line: 7,
        };
        assert_eq!(
            warning.to_string(),
            "Warning: \"a.ledger\", line 7: Check failed: 1 == 2"
        );
    }
}
