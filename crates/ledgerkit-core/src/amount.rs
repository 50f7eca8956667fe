//! Commoditized amounts.
//!
//! An [`Amount`] pairs an exact [`Quantity`] with an optional commodity. An
//! amount without a quantity is *null*: it is distinct from zero and every
//! arithmetic or inspection operation on it fails with an error naming the
//! uninitialized side.
//!
//! Parsing an amount has a side effect on the commodity pool: unless
//! [`ParseFlags::NO_MIGRATE`] is given, the style it was written in (symbol
//! placement, separators, decimal mark) and its precision are merged into
//! the commodity, so a commodity's display format is learned from the input
//! in the order it is read.
//!
//! # Example
//!
//! ```
//! use ledgerkit_core::{Amount, CommodityPool};
//!
//! let pool = CommodityPool::new();
//! let a = Amount::parse("$100.00", &pool).unwrap();
//! let b = Amount::parse("$0.5", &pool).unwrap();
//! assert_eq!(a.checked_add(&b).unwrap().to_string(), "$100.50");
//! assert_eq!(pool.find("$").unwrap().precision(), 2);
//! ```

use bitflags::bitflags;
use num_bigint::BigInt;
use num_rational::BigRational;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::str::FromStr;

use crate::annotation::{Annotation, AnnotationFlags, KeepDetails};
use crate::commodity::{parse_symbol, CommodityFlags, CommodityRef};
use crate::error::{AmountError, AmountResult, BinaryOp, Uninitialized};
use crate::format::{format_number, NumberStyle};
use crate::pool::CommodityPool;
use crate::quantity::{pow10, Quantity};

/// Extra fraction digits kept by multiplication and division beyond the
/// commodity's display precision.
pub const EXTEND_BY_DIGITS: u32 = 6;

/// Bound on scaling-chain walks, guarding against cyclic conversions.
const MAX_SCALING_STEPS: usize = 64;

bitflags! {
    /// Options for [`Amount::parse_with`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParseFlags: u8 {
        /// Do not merge style and precision into the commodity; keep full
        /// precision when printing.
        const NO_MIGRATE = 0x01;
        /// Do not reduce to the smallest unit.
        const NO_REDUCE = 0x02;
        /// Report a missing quantity as a null amount instead of an error.
        const SOFT_FAIL = 0x04;
        /// Do not read lot annotations.
        const NO_ANNOT = 0x08;
    }
}

bitflags! {
    /// Options for [`Amount::print`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PrintFlags: u8 {
        /// Print quoted symbols bare when unambiguous.
        const ELIDE_COMMODITY_QUOTES = 0x01;
        /// Leave out annotation details that were calculated.
        const NO_COMPUTED_ANNOTATIONS = 0x02;
    }
}

/// A quantity in a commodity.
#[derive(Clone, Default)]
pub struct Amount {
    quantity: Option<Quantity>,
    commodity: Option<CommodityRef>,
}

fn same_commodity(a: Option<&CommodityRef>, b: Option<&CommodityRef>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => Rc::ptr_eq(x, y),
        (None, None) => true,
        _ => false,
    }
}

impl Amount {
    /// The null amount.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            quantity: None,
            commodity: None,
        }
    }

    /// An amount of `quantity` units of `commodity`.
    #[must_use]
    pub const fn new(quantity: Quantity, commodity: Option<CommodityRef>) -> Self {
        Self {
            quantity: Some(quantity),
            commodity,
        }
    }

    /// An integer with no commodity.
    #[must_use]
    pub fn from_i64(value: i64) -> Self {
        Self::new(Quantity::from_i64(value), None)
    }

    /// A float with no commodity; `None` for NaN or infinity.
    #[must_use]
    pub fn from_f64(value: f64) -> Option<Self> {
        Quantity::from_f64(value).map(|q| Self::new(q, None))
    }

    /// A decimal with no commodity.
    #[must_use]
    pub fn from_decimal(value: Decimal) -> Self {
        Self::new(Quantity::from_decimal(value), None)
    }

    /// Parse with default flags.
    pub fn parse(text: &str, pool: &CommodityPool) -> AmountResult<Self> {
        Self::parse_with(text, pool, ParseFlags::empty())
    }

    /// Parse without touching the commodity's learned style.
    pub fn exact(text: &str, pool: &CommodityPool) -> AmountResult<Self> {
        Self::parse_with(text, pool, ParseFlags::NO_MIGRATE)
    }

    /// Parse with explicit flags, ignoring any trailing text.
    ///
    /// With [`ParseFlags::SOFT_FAIL`], text without a quantity yields the
    /// null amount.
    pub fn parse_with(text: &str, pool: &CommodityPool, flags: ParseFlags) -> AmountResult<Self> {
        Ok(Self::parse_prefix(text, pool, flags)?
            .map(|(amount, _)| amount)
            .unwrap_or_default())
    }

    /// Parse an amount at the start of `text`, returning it and the unread
    /// remainder.
    ///
    /// The accepted forms are `[-]NUM[ ]SYM` and `[-]SYM[ ]NUM`, optionally
    /// followed by lot annotations. Returns `Ok(None)` only under
    /// [`ParseFlags::SOFT_FAIL`] when no quantity was found.
    pub fn parse_prefix<'a>(
        text: &'a str,
        pool: &CommodityPool,
        flags: ParseFlags,
    ) -> AmountResult<Option<(Self, &'a str)>> {
        let mut line = text.trim_start();
        let mut negative = false;
        if let Some(rest) = line.strip_prefix('-') {
            negative = true;
            line = rest.trim_start();
        }

        let mut style = CommodityFlags::empty();
        let mut details: Option<Annotation> = None;
        let quant: String;
        let symbol: String;

        if line.starts_with(|c: char| c.is_ascii_digit()) {
            let (q, rest) = parse_quantity(line);
            quant = q;
            line = rest;
            if line.is_empty() {
                symbol = String::new();
            } else {
                if line.starts_with(char::is_whitespace) {
                    style |= CommodityFlags::STYLE_SEPARATED;
                }
                let (sym, rest) = parse_symbol(line)?;
                line = rest;
                if !sym.is_empty() {
                    style |= CommodityFlags::STYLE_SUFFIXED;
                }
                if !flags.contains(ParseFlags::NO_ANNOT) && !line.trim().is_empty() {
                    let (ann, rest) = Annotation::parse(line, pool)?;
                    line = rest;
                    details = Some(ann);
                }
                symbol = sym;
            }
        } else {
            let (sym, rest) = parse_symbol(line)?;
            line = rest;
            if line.starts_with(char::is_whitespace) {
                style |= CommodityFlags::STYLE_SEPARATED;
            }
            let (q, rest) = parse_quantity(line);
            quant = q;
            line = rest;
            if !flags.contains(ParseFlags::NO_ANNOT) && !quant.is_empty() && !line.trim().is_empty()
            {
                let (ann, rest) = Annotation::parse(line, pool)?;
                line = rest;
                details = Some(ann);
            }
            symbol = sym;
        }

        if quant.is_empty() {
            if flags.contains(ParseFlags::SOFT_FAIL) {
                return Ok(None);
            }
            return Err(AmountError::NoQuantity);
        }

        let commodity = if symbol.is_empty() {
            None
        } else {
            Some(pool.find_or_create(&symbol))
        };

        let no_migrate_style = commodity
            .as_ref()
            .is_some_and(|c| c.has_flags(CommodityFlags::STYLE_NO_MIGRATE));
        let decimal_comma = pool.defaults().decimal_comma()
            || commodity
                .as_ref()
                .is_some_and(|c| c.has_flags(CommodityFlags::STYLE_DECIMAL_COMMA));

        let scan = scan_punctuation(&quant, decimal_comma)?;
        style |= scan.style;

        let keep_precision = flags.contains(ParseFlags::NO_MIGRATE);
        if !keep_precision {
            if let Some(c) = commodity.as_ref().filter(|_| !no_migrate_style) {
                c.add_flags(style);
                if scan.precision > c.precision() {
                    tracing::debug!(
                        commodity = c.symbol(),
                        from = c.precision(),
                        to = scan.precision,
                        "widening display precision"
                    );
                    c.set_precision(scan.precision);
                }
            }
        }

        let digits: String = quant.chars().filter(|&c| c != '.' && c != ',').collect();
        let numer =
            BigInt::from_str(&digits).map_err(|_| AmountError::InvalidQuantity(quant.clone()))?;
        let mut quantity = Quantity::from_rational(
            BigRational::new(numer, pow10(scan.precision)),
            scan.precision,
        )
        .with_keep_precision(keep_precision);
        if negative {
            quantity = quantity.negated();
        }

        let mut amount = Self::new(quantity, commodity);
        if !flags.contains(ParseFlags::NO_REDUCE) {
            amount = amount.reduced()?;
        }

        if let Some(mut details) = details.filter(|d| !d.is_empty()) {
            if let Some(base) = amount.commodity.clone() {
                if details.has_flags(AnnotationFlags::PRICE_NOT_PER_UNIT) {
                    if let Some(price) = details.price.take() {
                        details.price = Some(price.checked_div(&amount.abs()?)?);
                    }
                }
                amount.commodity = Some(pool.find_or_create_annotated(&base, details));
            }
        }

        tracing::trace!(text, amount = %amount, "parsed amount");
        Ok(Some((amount, line)))
    }

    /// Whether this amount has no quantity.
    pub const fn is_null(&self) -> bool {
        self.quantity.is_none()
    }

    /// The quantity, if any.
    pub const fn quantity(&self) -> Option<&Quantity> {
        self.quantity.as_ref()
    }

    /// Whether a commodity is attached.
    pub const fn has_commodity(&self) -> bool {
        self.commodity.is_some()
    }

    /// The commodity, if any.
    pub const fn commodity(&self) -> Option<&CommodityRef> {
        self.commodity.as_ref()
    }

    /// The same quantity in `commodity`.
    #[must_use]
    pub fn with_commodity(&self, commodity: Option<CommodityRef>) -> Self {
        Self {
            quantity: Some(self.quantity.clone().unwrap_or_else(Quantity::zero)),
            commodity,
        }
    }

    /// Attach a commodity in place; a null amount becomes zero.
    pub fn set_commodity(&mut self, commodity: Option<CommodityRef>) {
        if self.quantity.is_none() {
            self.quantity = Some(Quantity::zero());
        }
        self.commodity = commodity;
    }

    /// Detach the commodity in place.
    pub fn clear_commodity(&mut self) {
        self.commodity = None;
    }

    /// The bare number.
    #[must_use]
    pub fn number(&self) -> Self {
        Self {
            quantity: self.quantity.clone(),
            commodity: None,
        }
    }

    fn require(&self, message: &'static str) -> AmountResult<&Quantity> {
        self.quantity
            .as_ref()
            .ok_or(AmountError::Uninitialized(message))
    }

    fn operands<'a>(
        &'a self,
        other: &'a Self,
        op: BinaryOp,
    ) -> AmountResult<(&'a Quantity, &'a Quantity)> {
        match (&self.quantity, &other.quantity) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(AmountError::UninitializedOperand {
                op,
                side: Uninitialized::classify(self.quantity.is_some(), other.quantity.is_some())
                    .unwrap_or(Uninitialized::Both),
            }),
        }
    }

    fn commodity_mismatch(&self, other: &Self) -> Option<(String, String)> {
        match (&self.commodity, &other.commodity) {
            (Some(a), Some(b)) if !Rc::ptr_eq(a, b) => Some((a.to_string(), b.to_string())),
            _ => None,
        }
    }

    fn clamp_precision(&self, quantity: Quantity) -> Quantity {
        match &self.commodity {
            Some(c) if !quantity.keep_precision() => {
                let limit = c.precision() + EXTEND_BY_DIGITS;
                if quantity.precision() > limit {
                    quantity.with_precision(limit)
                } else {
                    quantity
                }
            }
            _ => quantity,
        }
    }

    /// Sum of two amounts in the same (or no) commodity.
    pub fn checked_add(&self, other: &Self) -> AmountResult<Self> {
        let (a, b) = self.operands(other, BinaryOp::Add)?;
        if let Some((left, right)) = self.commodity_mismatch(other) {
            return Err(AmountError::AddingDifferentCommodities { left, right });
        }
        let mut sum = a.add(b);
        if self.has_commodity() == other.has_commodity() && sum.precision() < b.precision() {
            sum = sum.with_precision(b.precision());
        }
        Ok(Self {
            quantity: Some(sum),
            commodity: self.commodity.clone(),
        })
    }

    /// Difference of two amounts in the same (or no) commodity.
    pub fn checked_sub(&self, other: &Self) -> AmountResult<Self> {
        let (a, b) = self.operands(other, BinaryOp::Subtract)?;
        if let Some((left, right)) = self.commodity_mismatch(other) {
            return Err(AmountError::SubtractingDifferentCommodities { left, right });
        }
        let mut diff = a.sub(b);
        if self.has_commodity() == other.has_commodity() && diff.precision() < b.precision() {
            diff = diff.with_precision(b.precision());
        }
        Ok(Self {
            quantity: Some(diff),
            commodity: self.commodity.clone(),
        })
    }

    /// Product. A commodity-less left side adopts the right's commodity.
    pub fn checked_mul(&self, other: &Self) -> AmountResult<Self> {
        let (a, b) = self.operands(other, BinaryOp::Multiply)?;
        let product = a.mul(b);
        let mut result = Self {
            quantity: None,
            commodity: self.commodity.clone().or_else(|| other.commodity.clone()),
        };
        result.quantity = Some(result.clamp_precision(product));
        Ok(result)
    }

    /// Quotient, carrying [`EXTEND_BY_DIGITS`] extra digits of precision.
    pub fn checked_div(&self, other: &Self) -> AmountResult<Self> {
        let (a, b) = self.operands(other, BinaryOp::Divide)?;
        if other.is_zero()? {
            return Err(AmountError::DivideByZero);
        }
        let quotient = a.div(b)?;
        let quotient =
            quotient.with_precision(a.precision() + b.precision() + EXTEND_BY_DIGITS);
        let mut result = Self {
            quantity: None,
            commodity: self.commodity.clone().or_else(|| other.commodity.clone()),
        };
        result.quantity = Some(result.clamp_precision(quotient));
        Ok(result)
    }

    /// Exact ordering of two amounts in the same (or no) commodity.
    pub fn compare(&self, other: &Self) -> AmountResult<Ordering> {
        let (a, b) = self.operands(other, BinaryOp::Compare)?;
        if let Some((left, right)) = self.commodity_mismatch(other) {
            return Err(AmountError::ComparingDifferentCommodities { left, right });
        }
        Ok(a.compare(b))
    }

    /// `self < other`.
    pub fn is_less_than(&self, other: &Self) -> AmountResult<bool> {
        Ok(self.compare(other)? == Ordering::Less)
    }

    /// `self > other`.
    pub fn is_greater_than(&self, other: &Self) -> AmountResult<bool> {
        Ok(self.compare(other)? == Ordering::Greater)
    }

    /// Negated copy.
    pub fn negated(&self) -> AmountResult<Self> {
        let q = self.require("Cannot negate an uninitialized amount")?;
        Ok(Self {
            quantity: Some(q.negated()),
            commodity: self.commodity.clone(),
        })
    }

    /// Absolute value.
    pub fn abs(&self) -> AmountResult<Self> {
        if self.sign()? < 0 {
            self.negated()
        } else {
            Ok(self.clone())
        }
    }

    /// -1, 0 or 1 from the exact value.
    pub fn sign(&self) -> AmountResult<i32> {
        Ok(self
            .require("Cannot determine sign of an uninitialized amount")?
            .sign())
    }

    /// Whether the amount displays as zero in its commodity's precision.
    pub fn is_zero(&self) -> AmountResult<bool> {
        let q = self.require("Cannot determine if an uninitialized amount is zero")?;
        if let Some(c) = &self.commodity {
            if q.keep_precision() || q.precision() < c.precision() {
                return Ok(q.is_zero());
            }
            if q.is_zero() {
                return Ok(true);
            }
            return Ok(q.is_zero_in_precision(c.precision()));
        }
        Ok(q.is_zero())
    }

    /// Whether the exact value is zero.
    pub fn is_realzero(&self) -> AmountResult<bool> {
        Ok(self.sign()? == 0)
    }

    /// Whether the amount displays as non-zero.
    pub fn is_nonzero(&self) -> AmountResult<bool> {
        Ok(!self.is_zero()?)
    }

    /// Stored precision.
    pub fn precision(&self) -> AmountResult<u32> {
        Ok(self
            .require("Cannot determine precision of an uninitialized amount")?
            .precision())
    }

    /// Whether display rounding is suppressed.
    pub fn keep_precision(&self) -> bool {
        self.quantity.as_ref().is_some_and(Quantity::keep_precision)
    }

    /// Set whether display rounding is suppressed.
    pub fn set_keep_precision(&mut self, keep: bool) -> AmountResult<()> {
        let q = self.require(
            "Cannot set whether to keep the precision of an uninitialized amount",
        )?;
        self.quantity = Some(q.with_keep_precision(keep));
        Ok(())
    }

    /// Number of fraction digits shown when printing.
    pub fn display_precision(&self) -> AmountResult<u32> {
        let q = self.require("Cannot determine display precision of an uninitialized amount")?;
        Ok(Self::display_precision_of(q, self.commodity.as_ref()))
    }

    fn display_precision_of(q: &Quantity, commodity: Option<&CommodityRef>) -> u32 {
        match commodity {
            Some(c) if !q.keep_precision() => c.precision(),
            Some(c) => q.precision().max(c.precision()),
            None => q.precision(),
        }
    }

    /// Rounded to the display precision.
    pub fn truncated(&self) -> AmountResult<Self> {
        let q = self.require("Cannot truncate an uninitialized amount")?;
        let places = Self::display_precision_of(q, self.commodity.as_ref());
        tracing::trace!(amount = %self, places, "truncating");
        Ok(Self {
            quantity: Some(q.round_to(places)),
            commodity: self.commodity.clone(),
        })
    }

    /// Display rounding enabled; the value is unchanged.
    pub fn rounded(&self) -> AmountResult<Self> {
        let q = self.require("Cannot set rounding for an uninitialized amount")?;
        Ok(Self {
            quantity: Some(q.with_keep_precision(false)),
            commodity: self.commodity.clone(),
        })
    }

    /// Display rounding disabled; the value is unchanged.
    pub fn unrounded(&self) -> AmountResult<Self> {
        let q = self.require("Cannot unround an uninitialized amount")?;
        Ok(Self {
            quantity: Some(q.with_keep_precision(true)),
            commodity: self.commodity.clone(),
        })
    }

    /// Rounded to `places` fraction digits, ties to even.
    pub fn round_to(&self, places: u32) -> AmountResult<Self> {
        let q = self.require("Cannot round an uninitialized amount")?;
        Ok(Self {
            quantity: Some(q.round_to(places)),
            commodity: self.commodity.clone(),
        })
    }

    /// Largest integer not above the value.
    pub fn floored(&self) -> AmountResult<Self> {
        let q = self.require("Cannot compute floor on an uninitialized amount")?;
        Ok(Self {
            quantity: Some(q.floor()),
            commodity: self.commodity.clone(),
        })
    }

    /// Smallest integer not below the value.
    pub fn ceilinged(&self) -> AmountResult<Self> {
        let q = self.require("Cannot compute ceiling on an uninitialized amount")?;
        Ok(Self {
            quantity: Some(q.ceil()),
            commodity: self.commodity.clone(),
        })
    }

    /// `1 / self`; zero stays zero.
    pub fn inverted(&self) -> AmountResult<Self> {
        let q = self.require("Cannot invert an uninitialized amount")?;
        Ok(Self {
            quantity: Some(q.inverted()),
            commodity: self.commodity.clone(),
        })
    }

    /// Converted to the smallest unit along the commodity's scaling chain.
    pub fn reduced(&self) -> AmountResult<Self> {
        let mut quantity = self.require("Cannot reduce an uninitialized amount")?.clone();
        let mut commodity = self.commodity.clone();
        for _ in 0..MAX_SCALING_STEPS {
            let Some(smaller) = commodity.as_ref().and_then(|c| c.smaller()) else {
                break;
            };
            if let Some(factor) = smaller.quantity() {
                quantity = quantity.mul(factor);
            }
            commodity = smaller.commodity.clone();
        }
        Ok(Self {
            quantity: Some(quantity),
            commodity,
        })
    }

    /// Converted to the largest unit in which the value is still at least one.
    pub fn unreduced(&self) -> AmountResult<Self> {
        self.require("Cannot unreduce an uninitialized amount")?;
        let one = Self::from_i64(1);
        let mut tmp = self.clone();
        let mut commodity = self.commodity.clone();
        let mut shifted = false;

        for _ in 0..MAX_SCALING_STEPS {
            let Some(larger) = commodity.as_ref().and_then(|c| c.larger()) else {
                break;
            };
            let next = tmp.checked_div(&larger.number())?;
            if next.abs()?.is_less_than(&one)? {
                break;
            }
            tmp = next;
            commodity = larger.commodity.clone();
            shifted = true;
        }

        if !shifted {
            return Ok(self.clone());
        }

        if let Some(c) = commodity.as_ref().filter(|c| c.uses_time_colon()) {
            if let Some(smaller) = c.smaller() {
                let mut floored = tmp.floored()?;
                let mut fraction = tmp.checked_sub(&floored)?;
                if fraction.sign()? < 0 {
                    fraction = fraction.checked_add(&one)?;
                    floored = floored.checked_sub(&one)?;
                }
                let minutes = smaller.number().checked_div(&Self::from_i64(100))?;
                tmp = floored.checked_add(&fraction.checked_mul(&minutes)?)?;
            }
        }

        Ok(Self {
            quantity: tmp.quantity,
            commodity,
        })
    }

    /// Whether the commodity is annotated.
    pub fn has_annotation(&self) -> AmountResult<bool> {
        self.require("Cannot determine if an uninitialized amount's commodity is annotated")?;
        Ok(self.commodity.as_ref().is_some_and(|c| c.is_annotated()))
    }

    /// The commodity's annotation details.
    pub fn annotation(&self) -> AmountResult<&Annotation> {
        self.require("Cannot return commodity annotation details of an uninitialized amount")?;
        self.commodity
            .as_ref()
            .and_then(|c| c.annotation())
            .ok_or(AmountError::NotAnnotated)
    }

    /// Re-express in the annotated variant of this commodity.
    ///
    /// Annotating an amount with no commodity does nothing.
    pub fn annotate(&self, details: Annotation, pool: &CommodityPool) -> AmountResult<Self> {
        self.require("Cannot annotate the commodity of an uninitialized amount")?;
        let Some(commodity) = &self.commodity else {
            return Ok(self.clone());
        };
        let base = commodity.referent();
        tracing::trace!(base = base.symbol(), details = %details, "annotating amount");
        Ok(Self {
            quantity: self.quantity.clone(),
            commodity: Some(pool.find_or_create_annotated(&base, details)),
        })
    }

    /// Drop annotation details not selected by `keep`.
    pub fn strip_annotations(&self, keep: KeepDetails, pool: &CommodityPool) -> AmountResult<Self> {
        self.require("Cannot strip commodity annotations from an uninitialized amount")?;
        match &self.commodity {
            Some(c) if c.is_annotated() && !keep.keep_all() => Ok(Self {
                quantity: self.quantity.clone(),
                commodity: Some(pool.strip_annotations(c, keep)),
            }),
            _ => Ok(self.clone()),
        }
    }

    /// Total lot price: the annotation price times this quantity.
    pub fn price(&self) -> AmountResult<Option<Self>> {
        let Some(price) = self
            .commodity
            .as_ref()
            .and_then(|c| c.annotation())
            .and_then(|a| a.price.as_ref())
        else {
            return Ok(None);
        };
        Ok(Some(price.checked_mul(self)?))
    }

    /// Nearest integer.
    pub fn to_i64(&self) -> AmountResult<i64> {
        let q = self.require("Cannot convert an uninitialized amount to a long")?;
        q.to_i64().ok_or_else(|| AmountError::Overflow(self.to_string()))
    }

    /// Nearest float.
    pub fn to_f64(&self) -> AmountResult<f64> {
        Ok(self
            .require("Cannot convert an uninitialized amount to a double")?
            .to_f64())
    }

    /// Nearest decimal.
    pub fn to_decimal(&self) -> AmountResult<Decimal> {
        let q = self.require("Cannot convert an uninitialized amount to a decimal")?;
        q.to_decimal()
            .ok_or_else(|| AmountError::Overflow(self.to_string()))
    }

    /// Whether the value rounds to an `i64`.
    pub fn fits_in_i64(&self) -> bool {
        self.quantity.as_ref().is_some_and(Quantity::fits_in_i64)
    }

    /// Structural validity: a commodity requires a quantity.
    pub fn valid(&self) -> bool {
        match &self.quantity {
            Some(q) => q.valid(),
            None => self.commodity.is_none(),
        }
    }

    /// Render with the commodity's learned style.
    pub fn print(&self, flags: PrintFlags) -> String {
        let Some(q) = &self.quantity else {
            return "<null>".to_string();
        };
        let places = Self::display_precision_of(q, self.commodity.as_ref());
        let Some(c) = &self.commodity else {
            return format_number(q.value(), places, 0, NumberStyle::PLAIN);
        };

        let number = format_number(q.value(), places, c.precision(), c.number_style());
        let symbol = c.print(flags.contains(PrintFlags::ELIDE_COMMODITY_QUOTES));
        let sep = if c.has_flags(CommodityFlags::STYLE_SEPARATED) {
            " "
        } else {
            ""
        };
        let mut out = if c.has_flags(CommodityFlags::STYLE_SUFFIXED) {
            format!("{number}{sep}{symbol}")
        } else {
            format!("{symbol}{sep}{number}")
        };
        out.push_str(
            &c.write_annotations(flags.contains(PrintFlags::NO_COMPUTED_ANNOTATIONS), false),
        );
        out
    }

    /// Render at full internal precision.
    pub fn to_full_string(&self) -> String {
        self.unrounded()
            .map_or_else(|_| self.print(PrintFlags::empty()), |a| a.print(PrintFlags::empty()))
    }

    /// Render the number alone.
    pub fn quantity_string(&self) -> String {
        self.number().print(PrintFlags::empty())
    }

    /// Establish that one `larger` is `smaller` units, e.g. `1.0m` = `60s`.
    pub fn parse_conversion(larger: &str, smaller: &str, pool: &CommodityPool) -> AmountResult<()> {
        let larger = Self::parse_with(larger, pool, ParseFlags::NO_REDUCE)?;
        let smaller = Self::parse_with(smaller, pool, ParseFlags::NO_REDUCE)?;
        let larger = larger.checked_mul(&smaller)?;

        if let Some(c) = &larger.commodity {
            c.set_smaller(Some(smaller.clone()));
            let inherited = smaller
                .commodity
                .as_ref()
                .map_or(CommodityFlags::empty(), |s| s.flags());
            c.add_flags(inherited | CommodityFlags::NOMARKET);
        }
        if let Some(c) = &smaller.commodity {
            c.set_larger(Some(larger.clone()));
        }
        tracing::debug!(larger = %larger, smaller = %smaller, "registered unit conversion");
        Ok(())
    }
}

/// Result of [`scan_punctuation`].
struct PunctuationScan {
    style: CommodityFlags,
    precision: u32,
}

/// Classify `.` and `,` in a quantity from right to left.
///
/// Thousands groups must be exactly three digits; a separator at any other
/// offset is the decimal mark. Mixing styles inconsistently is an error.
fn scan_punctuation(quant: &str, decimal_comma: bool) -> AmountResult<PunctuationScan> {
    let mut decimal_comma_style = decimal_comma;
    let mut style = CommodityFlags::empty();
    let mut offset: u32 = 0;
    let mut last_comma: Option<usize> = None;
    let mut last_period: Option<usize> = None;
    let mut no_more_commas = false;
    let mut no_more_periods = false;
    let mut precision = 0;

    for (index, ch) in quant.char_indices().rev() {
        match ch {
            '.' => {
                if no_more_periods {
                    return Err(AmountError::TooManyPeriods);
                }
                if decimal_comma_style {
                    if offset % 3 != 0 {
                        return Err(AmountError::IncorrectThousandMarkPeriod);
                    }
                    style |= CommodityFlags::STYLE_THOUSANDS;
                    no_more_commas = true;
                } else if last_comma.is_some() {
                    decimal_comma_style = true;
                    if offset % 3 != 0 {
                        return Err(AmountError::IncorrectThousandMarkPeriod);
                    }
                } else {
                    no_more_periods = true;
                    precision = offset;
                    offset = 0;
                }
                last_period.get_or_insert(index);
            }
            ',' => {
                if no_more_commas {
                    return Err(AmountError::TooManyCommas);
                }
                if decimal_comma_style {
                    if last_period.is_some() {
                        return Err(AmountError::IncorrectDecimalComma);
                    }
                    no_more_commas = true;
                    precision = offset;
                    offset = 0;
                } else if offset % 3 != 0 {
                    if last_comma.is_some() || last_period.is_some() {
                        return Err(AmountError::IncorrectThousandMarkComma);
                    }
                    decimal_comma_style = true;
                    no_more_commas = true;
                    precision = offset;
                    offset = 0;
                } else {
                    style |= CommodityFlags::STYLE_THOUSANDS;
                    no_more_periods = true;
                }
                last_comma.get_or_insert(index);
            }
            _ => offset += 1,
        }
    }

    if decimal_comma_style {
        style |= CommodityFlags::STYLE_DECIMAL_COMMA;
    }
    Ok(PunctuationScan { style, precision })
}

/// Split off the run of digits, signs and separators at the start of
/// `text`, ending at its last digit.
fn parse_quantity(text: &str) -> (String, &str) {
    let line = text.trim_start();
    let end = line
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '.' | ',')))
        .unwrap_or(line.len());
    match line[..end].rfind(|c: char| c.is_ascii_digit()) {
        Some(last) => (line[..=last].to_string(), &line[last + 1..]),
        None => (String::new(), line),
    }
}

/// Deterministic ordering of amounts by commodity: symbol, then lot price,
/// date and tag.
pub fn compare_by_commodity(left: &Amount, right: &Amount) -> Ordering {
    let (lc, rc) = match (&left.commodity, &right.commodity) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(l), Some(r)) => (l, r),
    };
    let by_symbol = lc.base_symbol().cmp(rc.base_symbol());
    if by_symbol != Ordering::Equal {
        return by_symbol;
    }
    let (la, ra) = match (lc.annotation(), rc.annotation()) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(l), Some(r)) => (l, r),
    };

    let by_price = match (&la.price, &ra.price) {
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(lp), Some(rp)) => {
            let (lq, rq) = (lp.quantity(), rp.quantity());
            lq.zip(rq).map_or(Ordering::Equal, |(a, b)| a.compare(b))
        }
        (None, None) => Ordering::Equal,
    };
    by_price
        .then_with(|| la.date.cmp(&ra.date))
        .then_with(|| la.tag.cmp(&ra.tag))
        .then_with(|| la.value_expr.cmp(&ra.value_expr))
}

impl PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        self.quantity == other.quantity
            && same_commodity(self.commodity.as_ref(), other.commodity.as_ref())
    }
}

impl Eq for Amount {}

impl Hash for Amount {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.quantity.hash(state);
        self.commodity.as_ref().map(Rc::as_ptr).hash(state);
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print(PrintFlags::empty()))
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.to_full_string())
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self::from_decimal(value)
    }
}
