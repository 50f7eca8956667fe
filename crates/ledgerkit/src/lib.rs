//! Command-line tools for plain-text ledger journals.
//!
//! - `ledgerkit-check`: read one or more journals and report every error,
//!   as ariadne diagnostics or as JSON.
//!
//! # Example Usage
//!
//! ```bash
//! ledgerkit-check household.ledger
//! ledgerkit-check --strict --format json 2024.ledger prices.db
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cmd;
pub mod report;
