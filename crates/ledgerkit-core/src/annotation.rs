//! Lot annotations: `{price}`, `[date]`, `(tag)` and `((expr))`.

use bitflags::bitflags;
use chrono::NaiveDate;
use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::amount::{Amount, ParseFlags};
use crate::error::{AmountError, AmountResult};
use crate::pool::CommodityPool;
use crate::times;

bitflags! {
    /// How each annotation detail came to be.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AnnotationFlags: u8 {
        /// `{{total}}`: the price was written for the whole lot.
        const PRICE_NOT_PER_UNIT = 0x01;
        /// `{=price}`: the price never floats with the market.
        const PRICE_FIXATED = 0x02;
        /// The price was computed from a cost.
        const PRICE_CALCULATED = 0x04;
        /// The date was computed from the transaction.
        const DATE_CALCULATED = 0x08;
        /// The tag was computed.
        const TAG_CALCULATED = 0x10;
        /// The valuation expression was computed.
        const VALUE_EXPR_CALCULATED = 0x20;
    }
}

/// Lot details distinguishing an annotated commodity from its base.
#[derive(Clone, Default)]
pub struct Annotation {
    /// Per-unit acquisition price.
    pub price: Option<Amount>,
    /// Acquisition date.
    pub date: Option<NaiveDate>,
    /// Free-form lot tag.
    pub tag: Option<String>,
    /// Valuation expression text.
    pub value_expr: Option<String>,
    flags: Cell<AnnotationFlags>,
}

impl Annotation {
    /// Details with the given price, date and tag.
    #[must_use]
    pub fn new(price: Option<Amount>, date: Option<NaiveDate>, tag: Option<String>) -> Self {
        Self {
            price,
            date,
            tag,
            ..Self::default()
        }
    }

    /// Whether no detail is present.
    pub fn is_empty(&self) -> bool {
        self.price.as_ref().map_or(true, Amount::is_null)
            && self.date.is_none()
            && self.tag.as_deref().map_or(true, str::is_empty)
            && self.value_expr.is_none()
    }

    /// Current flags.
    pub fn flags(&self) -> AnnotationFlags {
        self.flags.get()
    }

    /// Whether all of `flags` are set.
    pub fn has_flags(&self, flags: AnnotationFlags) -> bool {
        self.flags.get().contains(flags)
    }

    /// Set or clear `flags`.
    pub fn set_flags(&self, flags: AnnotationFlags, on: bool) {
        let mut current = self.flags.get();
        current.set(flags, on);
        self.flags.set(current);
    }

    /// Builder-style flag setter.
    #[must_use]
    pub fn with_flags(self, flags: AnnotationFlags) -> Self {
        self.set_flags(flags, true);
        self
    }

    /// Parse as many annotation groups as follow at the start of `text`.
    ///
    /// Stops without consuming at the first character that does not open
    /// a group, and at `(@`, which begins a virtual cost.
    pub fn parse<'a>(text: &'a str, pool: &CommodityPool) -> AmountResult<(Self, &'a str)> {
        let mut details = Self::default();
        let mut line = text;

        loop {
            let rest = line.trim_start();
            if let Some(after) = rest.strip_prefix('{') {
                if details.price.is_some() {
                    return Err(AmountError::MoreThanOnePrice);
                }
                let mut body = after;
                let mut flags = AnnotationFlags::empty();
                if let Some(b) = body.strip_prefix('{') {
                    body = b;
                    flags |= AnnotationFlags::PRICE_NOT_PER_UNIT;
                }
                body = body.trim_start();
                if let Some(b) = body.strip_prefix('=') {
                    body = b;
                    flags |= AnnotationFlags::PRICE_FIXATED;
                }
                let Some(end) = body.find('}') else {
                    return Err(AmountError::LotPriceLacksClosingBrace);
                };
                let buf = &body[..end];
                let mut after_close = &body[end + 1..];
                if flags.contains(AnnotationFlags::PRICE_NOT_PER_UNIT) {
                    after_close = after_close
                        .strip_prefix('}')
                        .ok_or(AmountError::LotPriceLacksDoubleClosingBrace)?;
                }
                let price = Amount::parse_with(buf, pool, ParseFlags::NO_MIGRATE)?;
                tracing::trace!(price = %price, "parsed annotation price");
                details.price = Some(price);
                details.flags.set(details.flags.get() | flags);
                line = after_close;
            } else if let Some(after) = rest.strip_prefix('[') {
                if details.date.is_some() {
                    return Err(AmountError::MoreThanOneDate);
                }
                let Some(end) = after.find(']') else {
                    return Err(AmountError::DateLacksClosingBracket);
                };
                let buf = &after[..end];
                let date = times::parse_date(buf.trim(), pool.date_context())
                    .map_err(|_| AmountError::InvalidAnnotationDate(buf.to_string()))?;
                details.date = Some(date);
                line = &after[end + 1..];
            } else if let Some(after) = rest.strip_prefix('(') {
                if after.starts_with('@') {
                    break;
                } else if let Some(inner) = after.strip_prefix('(') {
                    if details.value_expr.is_some() {
                        return Err(AmountError::MoreThanOneValueExpr);
                    }
                    let Some(end) = inner.find(')') else {
                        return Err(AmountError::ValueExprLacksClosingParentheses);
                    };
                    let after_close = inner[end + 1..]
                        .strip_prefix(')')
                        .ok_or(AmountError::ValueExprLacksClosingParentheses)?;
                    details.value_expr = Some(inner[..end].to_string());
                    line = after_close;
                } else {
                    if details.tag.as_deref().is_some_and(|t| !t.is_empty()) {
                        return Err(AmountError::MoreThanOneTag);
                    }
                    let Some(end) = after.find(')') else {
                        return Err(AmountError::TagLacksClosingParenthesis);
                    };
                    details.tag = Some(after[..end].to_string());
                    line = &after[end + 1..];
                }
            } else {
                break;
            }
        }

        Ok((details, line))
    }

    /// Render as ` {price} [date] (tag) ((expr))`.
    ///
    /// With `no_computed`, details that were calculated rather than written
    /// are omitted. Unless `keep_base`, the price is shown unreduced.
    pub fn print(&self, keep_base: bool, no_computed: bool) -> String {
        let flags = self.flags.get();
        let mut out = String::new();
        if let Some(price) = &self.price {
            if !no_computed || !flags.contains(AnnotationFlags::PRICE_CALCULATED) {
                let shown = if keep_base {
                    price.clone()
                } else {
                    price.unreduced().unwrap_or_else(|_| price.clone())
                };
                out.push_str(" {");
                if flags.contains(AnnotationFlags::PRICE_FIXATED) {
                    out.push('=');
                }
                out.push_str(&shown.to_string());
                out.push('}');
            }
        }
        if let Some(date) = self.date {
            if !no_computed || !flags.contains(AnnotationFlags::DATE_CALCULATED) {
                out.push_str(&format!(" [{}]", date.format(times::PRINTED_DATE_FORMAT)));
            }
        }
        if let Some(tag) = self.tag.as_deref().filter(|t| !t.is_empty()) {
            if !no_computed || !flags.contains(AnnotationFlags::TAG_CALCULATED) {
                out.push_str(&format!(" ({tag})"));
            }
        }
        if let Some(expr) = &self.value_expr {
            if !flags.contains(AnnotationFlags::VALUE_EXPR_CALCULATED) {
                out.push_str(&format!(" (({expr}))"));
            }
        }
        out
    }
}

impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        self.price == other.price
            && self.date == other.date
            && self.tag == other.tag
            && self.value_expr == other.value_expr
    }
}

impl Eq for Annotation {}

impl Hash for Annotation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.price.hash(state);
        self.date.hash(state);
        self.tag.hash(state);
        self.value_expr.hash(state);
    }
}

impl fmt::Debug for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotation")
            .field("price", &self.price.as_ref().map(ToString::to_string))
            .field("date", &self.date)
            .field("tag", &self.tag)
            .field("value_expr", &self.value_expr)
            .field("flags", &self.flags.get())
            .finish()
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print(false, false))
    }
}

/// Which annotation details survive [`CommodityPool::strip_annotations`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepDetails {
    /// Keep lot prices.
    pub keep_price: bool,
    /// Keep lot dates.
    pub keep_date: bool,
    /// Keep lot tags.
    pub keep_tag: bool,
    /// Drop details that were calculated rather than written.
    pub only_actuals: bool,
}

impl KeepDetails {
    /// Keep everything that was written.
    pub const ALL: Self = Self {
        keep_price: true,
        keep_date: true,
        keep_tag: true,
        only_actuals: false,
    };

    /// Keep nothing.
    pub const NONE: Self = Self {
        keep_price: false,
        keep_date: false,
        keep_tag: false,
        only_actuals: false,
    };

    /// Whether every detail is kept.
    pub const fn keep_all(&self) -> bool {
        self.keep_price && self.keep_date && self.keep_tag && !self.only_actuals
    }

    /// Whether any detail is kept.
    pub const fn keep_any(&self) -> bool {
        self.keep_price || self.keep_date || self.keep_tag
    }
}
