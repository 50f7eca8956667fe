//! Textual ledger journal parser.
//!
//! This crate reads the plain-text ledger format into a
//! [`ledgerkit_core::Journal`]: transactions, automated and periodic
//! transactions, account/commodity/payee/tag declarations, prices, options,
//! `apply`/`end` scopes, `include` and timelog entries.
//!
//! # Features
//!
//! - Line-oriented reader with per-directive error recovery
//! - Errors carry their file, line, byte span and the include chain
//! - `apply account|tag|fixed|year` scopes that reach into included files
//! - Includes resolved through a [`FileSystem`], so journals can be served
//!   from memory
//! - Cooperative cancellation through a [`CancellationToken`]
//!
//! # Example
//!
//! ```ignore
//! use ledgerkit_core::{CommodityPool, Journal, SymbolScope};
//! use ledgerkit_parser::parse_source;
//!
//! let source = "2024/01/15 * Coffee Shop\n  Expenses:Food:Coffee  $5.00\n  Assets:Cash\n";
//!
//! let pool = CommodityPool::with_builtins();
//! let scope = SymbolScope::new();
//! let mut journal = Journal::new();
//! let ctx = parse_source("coffee.ledger", source, &mut journal, &pool, &scope).unwrap();
//! assert!(ctx.errors.is_empty());
//! assert_eq!(ctx.count, 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod apply;
pub mod cancel;
pub mod context;
mod error;
pub mod fs;
mod span;
pub mod textual;

pub use apply::{Applied, ApplyStack};
pub use cancel::CancellationToken;
pub use context::{ParseContext, ParseContextStack};
pub use error::{ParseError, ParseErrorKind, ParseResult, ParseWarning};
pub use fs::{FileSystem, MemoryFileSystem, OsFileSystem};
pub use span::Span;
pub use textual::TextualParser;

use std::path::PathBuf;

use ledgerkit_core::{CommodityPool, Journal, Scope};

/// Parse `source` as if it were the file `path`, reading any included
/// files from disk.
///
/// Returns the finished context; its `errors` and `warnings` hold what was
/// recovered from. Only cancellation or a failure applying deferred
/// postings is returned as `Err`.
pub fn parse_source(
    path: impl Into<PathBuf>,
    source: impl Into<String>,
    journal: &mut Journal,
    pool: &CommodityPool,
    scope: &dyn Scope,
) -> ParseResult<ParseContext> {
    let context = ParseContext::from_string(path, source);
    let mut parser = TextualParser::new(journal, pool, scope, &OsFileSystem, context);
    parser.parse()?;
    Ok(parser.into_context())
}
