//! Core types for ledgerkit
//!
//! This crate holds everything a ledger journal is made of, independent of
//! how it is read:
//!
//! - [`Amount`] - An exact quantity tagged with a commodity
//! - [`CommodityPool`] - The session's commodities, prices and conversions
//! - [`Balance`] - Amounts in several commodities at once
//! - [`Value`] - The dynamic value type expressions compute with
//! - [`Expr`] - Value expressions, evaluated against a [`Scope`]
//! - [`Journal`] - Accounts, transactions and the registries that check them
//!
//! # Example
//!
//! ```
//! use ledgerkit_core::{Amount, Balance, CommodityPool};
//!
//! let pool = CommodityPool::with_builtins();
//! let rent = Amount::parse("$1,200.00", &pool).unwrap();
//! let fee = Amount::parse("$2.50", &pool).unwrap();
//! assert_eq!(rent.checked_add(&fee).unwrap().to_string(), "$1,202.50");
//!
//! let mut balance = Balance::new();
//! balance.add_amount(&rent).unwrap();
//! balance.add_amount(&Amount::parse("10 EUR", &pool).unwrap()).unwrap();
//! assert_eq!(balance.len(), 2);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod account;
pub mod amount;
pub mod annotation;
pub mod balance;
pub mod commodity;
pub mod error;
pub mod expr;
pub mod format;
pub mod item;
pub mod journal;
pub mod pool;
pub mod post;
pub mod predicate;
pub mod quantity;
pub mod scope;
pub mod timelog;
pub mod times;
pub mod value;
pub mod xact;

pub use account::{Account, AccountFlags, AccountId, Accounts};
pub use amount::{Amount, ParseFlags, PrintFlags};
pub use annotation::{Annotation, AnnotationFlags, KeepDetails};
pub use balance::Balance;
pub use commodity::{Commodity, CommodityFlags, CommodityRef};
pub use error::{
    AmountError, AmountResult, BalanceError, BalanceResult, ExprError, ExprResult, JournalError,
    JournalResult, XactError,
};
pub use expr::Expr;
pub use item::{Item, ItemFlags, ItemPosition, ItemState};
pub use journal::{xact_scope, CheckingStyle, Journal, JournalOptions, PostScope};
pub use pool::{CommodityPool, CostBreakdown, PricePoint};
pub use post::{Post, PostFlags};
pub use predicate::Predicate;
pub use quantity::Quantity;
pub use scope::{BindScope, EmptyScope, Scope, Symbol, SymbolKind, SymbolScope};
pub use timelog::{TimeEvent, TimeLog};
pub use times::{DateContext, DateError, DateInterval};
pub use value::Value;
pub use xact::{AutoXact, CheckExpr, CheckKind, DeferredNote, FinalizeContext, PeriodXact, Xact};

// Re-export commonly used external types
pub use chrono::{NaiveDate, NaiveDateTime};
pub use rust_decimal::Decimal;
