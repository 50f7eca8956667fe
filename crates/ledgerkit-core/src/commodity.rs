//! Commodities: named units with display style and precision.
//!
//! Every commodity belongs to a [`CommodityPool`](crate::pool::CommodityPool),
//! which hands out one canonical [`CommodityRef`] per symbol and one per
//! (symbol, annotation) pair. Commodity identity is therefore pointer
//! identity. Annotated commodities share their base record (flags,
//! precision, scaling links) with the plain commodity they annotate.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::amount::Amount;
use crate::annotation::Annotation;
use crate::error::{AmountError, AmountResult};
use crate::format::NumberStyle;

bitflags! {
    /// Display and bookkeeping flags of a commodity.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CommodityFlags: u32 {
        /// The symbol follows the number.
        const STYLE_SUFFIXED = 0x0001;
        /// A space separates symbol and number.
        const STYLE_SEPARATED = 0x0002;
        /// `,` is the decimal mark.
        const STYLE_DECIMAL_COMMA = 0x0004;
        /// Integer digits are grouped by thousands.
        const STYLE_THOUSANDS = 0x0008;
        /// No market price is ever looked up.
        const NOMARKET = 0x0010;
        /// Created by the engine rather than by input.
        const BUILTIN = 0x0020;
        /// Visited during a graph walk.
        const WALKED = 0x0040;
        /// Declared by a `commodity` directive or a price entry.
        const KNOWN = 0x0080;
        /// Appears as the target of a price.
        const PRIMARY = 0x0100;
        /// An annotated variant has been created.
        const SAW_ANNOTATED = 0x0200;
        /// A floating lot price has been seen.
        const SAW_ANN_PRICE_FLOAT = 0x0400;
        /// A fixated lot price has been seen.
        const SAW_ANN_PRICE_FIXATED = 0x0800;
        /// `h`/`m` quantities print as `H:MM`.
        const STYLE_TIME_COLON = 0x1000;
        /// Parsed usage never changes this commodity's style.
        const STYLE_NO_MIGRATE = 0x2000;
    }
}

/// The subset of flags learned from how amounts are written.
pub const STYLE_FLAGS: CommodityFlags = CommodityFlags::STYLE_SUFFIXED
    .union(CommodityFlags::STYLE_SEPARATED)
    .union(CommodityFlags::STYLE_DECIMAL_COMMA)
    .union(CommodityFlags::STYLE_THOUSANDS)
    .union(CommodityFlags::STYLE_TIME_COLON);

/// Pool-wide style defaults, set from the `decimal-comma` and `time-colon`
/// options.
#[derive(Debug, Default)]
pub struct CommodityDefaults {
    decimal_comma: Cell<bool>,
    time_colon: Cell<bool>,
}

impl CommodityDefaults {
    /// Whether `,` is the decimal mark for every commodity.
    pub fn decimal_comma(&self) -> bool {
        self.decimal_comma.get()
    }

    /// Set the decimal-comma default.
    pub fn set_decimal_comma(&self, on: bool) {
        self.decimal_comma.set(on);
    }

    /// Whether `h` and `m` print in `H:MM` form by default.
    pub fn time_colon(&self) -> bool {
        self.time_colon.get()
    }

    /// Set the time-colon default.
    pub fn set_time_colon(&self, on: bool) {
        self.time_colon.set(on);
    }
}

/// Shared handle to a canonical commodity.
pub type CommodityRef = Rc<Commodity>;

/// State shared by a commodity and all of its annotated variants.
#[derive(Default)]
pub struct CommodityBase {
    symbol: String,
    flags: Cell<CommodityFlags>,
    precision: Cell<u32>,
    name: RefCell<Option<String>>,
    note: RefCell<Option<String>>,
    value_expr: RefCell<Option<String>>,
    smaller: RefCell<Option<Amount>>,
    larger: RefCell<Option<Amount>>,
}

impl CommodityBase {
    /// A fresh base record for `symbol`.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    pub(crate) fn clear_links(&self) {
        self.smaller.replace(None);
        self.larger.replace(None);
    }
}

/// A unit of measure, optionally carrying lot annotation details.
pub struct Commodity {
    base: Rc<CommodityBase>,
    qualified_symbol: Option<String>,
    details: Option<Annotation>,
    referent: Option<CommodityRef>,
    defaults: Rc<CommodityDefaults>,
    serial: u64,
}

impl Commodity {
    pub(crate) fn new_base(
        base: Rc<CommodityBase>,
        defaults: Rc<CommodityDefaults>,
        serial: u64,
    ) -> Self {
        let qualified_symbol = if symbol_needs_quotes(&base.symbol) {
            Some(format!("\"{}\"", base.symbol))
        } else {
            None
        };
        Self {
            base,
            qualified_symbol,
            details: None,
            referent: None,
            defaults,
            serial,
        }
    }

    pub(crate) fn new_annotated(referent: &CommodityRef, details: Annotation, serial: u64) -> Self {
        Self {
            base: Rc::clone(&referent.base),
            qualified_symbol: referent.qualified_symbol.clone(),
            details: Some(details),
            referent: Some(Rc::clone(referent)),
            defaults: Rc::clone(&referent.defaults),
            serial,
        }
    }

    /// The printable symbol, quoted when it contains special characters.
    pub fn symbol(&self) -> &str {
        self.qualified_symbol.as_deref().unwrap_or(&self.base.symbol)
    }

    /// The bare symbol.
    pub fn base_symbol(&self) -> &str {
        &self.base.symbol
    }

    /// Allocation order within the pool.
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    /// The shared base record.
    pub fn base(&self) -> &Rc<CommodityBase> {
        &self.base
    }

    /// Current flags.
    pub fn flags(&self) -> CommodityFlags {
        self.base.flags.get()
    }

    /// Whether all of `flags` are set.
    pub fn has_flags(&self, flags: CommodityFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Set additional flags.
    pub fn add_flags(&self, flags: CommodityFlags) {
        self.base.flags.set(self.flags() | flags);
    }

    /// Clear flags.
    pub fn drop_flags(&self, flags: CommodityFlags) {
        self.base.flags.set(self.flags() - flags);
    }

    /// Display precision.
    pub fn precision(&self) -> u32 {
        self.base.precision.get()
    }

    /// Overwrite the display precision.
    pub fn set_precision(&self, precision: u32) {
        self.base.precision.set(precision);
    }

    /// Descriptive name from a `format`/`name` sub-directive.
    pub fn name(&self) -> Option<String> {
        self.base.name.borrow().clone()
    }

    /// Set the descriptive name.
    pub fn set_name(&self, name: Option<String>) {
        self.base.name.replace(name);
    }

    /// Free-form note.
    pub fn note(&self) -> Option<String> {
        self.base.note.borrow().clone()
    }

    /// Set the note.
    pub fn set_note(&self, note: Option<String>) {
        self.base.note.replace(note);
    }

    /// Valuation expression text, if any.
    pub fn value_expr(&self) -> Option<String> {
        self.base.value_expr.borrow().clone()
    }

    /// Set the valuation expression text.
    pub fn set_value_expr(&self, expr: Option<String>) {
        self.base.value_expr.replace(expr);
    }

    /// The next smaller unit, as an amount of that unit per one of this one.
    pub fn smaller(&self) -> Option<Amount> {
        self.base.smaller.borrow().clone()
    }

    /// Link a smaller unit.
    pub fn set_smaller(&self, amount: Option<Amount>) {
        self.base.smaller.replace(amount);
    }

    /// The next larger unit.
    pub fn larger(&self) -> Option<Amount> {
        self.base.larger.borrow().clone()
    }

    /// Link a larger unit.
    pub fn set_larger(&self, amount: Option<Amount>) {
        self.base.larger.replace(amount);
    }

    /// Pool-wide style defaults.
    pub fn defaults(&self) -> &Rc<CommodityDefaults> {
        &self.defaults
    }

    /// Whether this commodity carries annotation details.
    pub const fn is_annotated(&self) -> bool {
        self.details.is_some()
    }

    /// Annotation details of an annotated commodity.
    pub const fn annotation(&self) -> Option<&Annotation> {
        self.details.as_ref()
    }

    /// Annotation details, failing for a plain commodity.
    pub fn details(&self) -> AmountResult<&Annotation> {
        self.details.as_ref().ok_or(AmountError::NotAnnotated)
    }

    /// The unannotated commodity this one refers to (itself when plain).
    pub fn referent(self: &Rc<Self>) -> CommodityRef {
        match &self.referent {
            Some(r) => Rc::clone(r),
            None => Rc::clone(self),
        }
    }

    /// Whether both commodities share the same base record.
    pub fn same_base(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.base, &other.base)
    }

    /// Whether `h`/`m` print with a colon.
    pub fn uses_time_colon(&self) -> bool {
        matches!(self.base_symbol(), "h" | "m")
            && (self.defaults.time_colon() || self.has_flags(CommodityFlags::STYLE_TIME_COLON))
    }

    /// Punctuation for numbers in this commodity.
    pub fn number_style(&self) -> NumberStyle {
        let time_colon = self.uses_time_colon();
        let decimal_comma =
            self.defaults.decimal_comma() || self.has_flags(CommodityFlags::STYLE_DECIMAL_COMMA);
        let thousands = if self.has_flags(CommodityFlags::STYLE_THOUSANDS) {
            Some(if time_colon {
                ':'
            } else if decimal_comma {
                '.'
            } else {
                ','
            })
        } else {
            None
        };
        let decimal_mark = if time_colon {
            ':'
        } else if decimal_comma {
            ','
        } else {
            '.'
        };
        NumberStyle {
            thousands,
            decimal_mark,
        }
    }

    /// The symbol as printed next to a number.
    ///
    /// With `elide_quotes`, a quoted separated symbol without spaces prints
    /// bare unless it is entirely digits.
    pub fn print(&self, elide_quotes: bool) -> String {
        let sym = self.symbol();
        if elide_quotes
            && self.has_flags(CommodityFlags::STYLE_SEPARATED)
            && sym.starts_with('"')
            && !sym.contains(' ')
        {
            let inner = &sym[1..sym.len() - 1];
            if !inner.chars().all(|c| c.is_ascii_digit()) {
                return inner.to_string();
            }
        }
        sym.to_string()
    }

    /// Annotation suffix, empty for a plain commodity.
    pub fn write_annotations(&self, no_computed: bool, keep_base: bool) -> String {
        self.details
            .as_ref()
            .map(|d| d.print(keep_base, no_computed))
            .unwrap_or_default()
    }
}

impl PartialEq for Commodity {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for Commodity {}

impl Hash for Commodity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self, state);
    }
}

impl fmt::Debug for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commodity")
            .field("symbol", &self.symbol())
            .field("flags", &self.flags())
            .field("precision", &self.precision())
            .field("annotated", &self.is_annotated())
            .finish()
    }
}

impl fmt::Display for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.print(false), self.write_annotations(false, false))
    }
}

const INVALID_SYMBOL_CHARS: &[char] = &[
    ' ', '\t', '\n', '\r', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '.', ',', ';', ':',
    '?', '!', '-', '+', '*', '/', '^', '&', '|', '=', '<', '>', '{', '}', '[', ']', '(', ')', '@',
];

const RESERVED_WORDS: &[&str] = &["and", "div", "else", "false", "if", "or", "not", "true"];

/// Whether `c` may not appear in an unquoted symbol.
pub fn is_invalid_symbol_char(c: char) -> bool {
    INVALID_SYMBOL_CHARS.contains(&c)
}

/// Whether `symbol` must be quoted to be read back.
pub fn symbol_needs_quotes(symbol: &str) -> bool {
    symbol.chars().any(is_invalid_symbol_char)
}

/// Read a commodity symbol from the start of `text` (after whitespace).
///
/// Returns the symbol and the unread remainder. When no symbol is found, or
/// the word is reserved by the expression language, the symbol is empty and
/// the remainder is `text` itself.
pub fn parse_symbol(text: &str) -> AmountResult<(String, &str)> {
    let rest = text.trim_start();
    if let Some(quoted) = rest.strip_prefix('"') {
        return match quoted.find('"') {
            Some(end) => {
                let symbol = &quoted[..end];
                if symbol.is_empty() {
                    Ok((String::new(), text))
                } else {
                    Ok((symbol.to_string(), &quoted[end + 1..]))
                }
            }
            None => Err(AmountError::UnclosedQuote),
        };
    }
    let end = rest
        .find(|c: char| is_invalid_symbol_char(c))
        .unwrap_or(rest.len());
    let symbol = &rest[..end];
    if symbol.is_empty() || RESERVED_WORDS.contains(&symbol) {
        return Ok((String::new(), text));
    }
    Ok((symbol.to_string(), &rest[end..]))
}
