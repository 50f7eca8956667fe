//! The commodity pool.
//!
//! A [`CommodityPool`] is the session-scoped registry of commodities. It
//! guarantees one canonical [`CommodityRef`] per symbol and one per
//! (symbol, annotation) pair, so commodity equality throughout the engine is
//! pointer equality. The pool also owns the pool-wide style defaults, the
//! date context shared with the journal parser, and the price history.
//!
//! Nothing here is global: every parse session creates (or resets) its own
//! pool, so independent sessions in one process never see each other's
//! commodities.

use chrono::NaiveDateTime;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::amount::{Amount, ParseFlags};
use crate::annotation::{Annotation, AnnotationFlags, KeepDetails};
use crate::commodity::{parse_symbol, Commodity, CommodityBase, CommodityDefaults, CommodityFlags, CommodityRef};
use crate::error::AmountResult;
use crate::times::{self, DateContext};

/// Unit conversions installed by [`CommodityPool::with_builtins`].
const TIME_CONVERSIONS: &[(&str, &str)] = &[("1.0m", "60s"), ("1.00h", "60m")];

/// A recorded price: one unit of some commodity was worth `price` at `when`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricePoint {
    /// When the price was observed.
    pub when: NaiveDateTime,
    /// Per-unit price.
    pub price: Amount,
}

/// Result of [`CommodityPool::exchange`].
#[derive(Debug, Clone)]
pub struct CostBreakdown {
    /// The exchanged amount, annotated with its per-unit cost.
    pub amount: Amount,
    /// Total cost of the exchange.
    pub final_cost: Amount,
    /// Cost basis: the lot price times the amount, or the final cost.
    pub basis_cost: Amount,
}

/// Session-scoped registry of commodities and their prices.
pub struct CommodityPool {
    commodities: RefCell<HashMap<String, CommodityRef>>,
    annotated: RefCell<HashMap<(String, Annotation), CommodityRef>>,
    prices: RefCell<HashMap<String, Vec<PricePoint>>>,
    default_commodity: RefCell<Option<CommodityRef>>,
    defaults: Rc<CommodityDefaults>,
    dates: Rc<DateContext>,
    keep_base: Cell<bool>,
    builtins: bool,
    next_serial: Cell<u64>,
}

impl Default for CommodityPool {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::mutable_key_type)]
impl CommodityPool {
    /// An empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commodities: RefCell::new(HashMap::new()),
            annotated: RefCell::new(HashMap::new()),
            prices: RefCell::new(HashMap::new()),
            default_commodity: RefCell::new(None),
            defaults: Rc::new(CommodityDefaults::default()),
            dates: Rc::new(DateContext::default()),
            keep_base: Cell::new(false),
            builtins: false,
            next_serial: Cell::new(0),
        }
    }

    /// A pool holding the builtin `s` and `%` commodities and the
    /// `m`/`h` time conversions.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut pool = Self::new();
        pool.builtins = true;
        pool.install_builtins();
        pool
    }

    fn install_builtins(&self) {
        for symbol in ["s", "%"] {
            self.find_or_create(symbol)
                .add_flags(CommodityFlags::BUILTIN | CommodityFlags::NOMARKET);
        }
        for (larger, smaller) in TIME_CONVERSIONS {
            if let Err(err) = Amount::parse_conversion(larger, smaller, self) {
                tracing::error!(larger, smaller, %err, "failed to install builtin conversion");
            }
        }
    }

    /// Pool-wide style defaults.
    pub fn defaults(&self) -> &Rc<CommodityDefaults> {
        &self.defaults
    }

    /// The date context shared with the journal parser.
    pub const fn date_context(&self) -> &Rc<DateContext> {
        &self.dates
    }

    /// Whether annotation prices print in their reduced unit.
    pub fn keep_base(&self) -> bool {
        self.keep_base.get()
    }

    /// Set whether annotation prices print in their reduced unit.
    pub fn set_keep_base(&self, keep: bool) {
        self.keep_base.set(keep);
    }

    /// The commodity set by a `D` directive.
    pub fn default_commodity(&self) -> Option<CommodityRef> {
        self.default_commodity.borrow().clone()
    }

    /// Set the default commodity.
    pub fn set_default_commodity(&self, commodity: Option<CommodityRef>) {
        self.default_commodity.replace(commodity);
    }

    /// Number of distinct plain commodities (aliases count once per name).
    pub fn len(&self) -> usize {
        self.commodities.borrow().len()
    }

    /// Whether the pool holds no commodities.
    pub fn is_empty(&self) -> bool {
        self.commodities.borrow().is_empty()
    }

    /// All plain commodities, in creation order.
    pub fn commodities(&self) -> Vec<CommodityRef> {
        let mut all: Vec<_> = self.commodities.borrow().values().cloned().collect();
        all.sort_by_key(|c| c.serial());
        all.dedup_by(|a, b| Rc::ptr_eq(a, b));
        all
    }

    fn serial(&self) -> u64 {
        let serial = self.next_serial.get();
        self.next_serial.set(serial + 1);
        serial
    }

    /// Look up a plain commodity.
    pub fn find(&self, symbol: &str) -> Option<CommodityRef> {
        self.commodities.borrow().get(symbol).cloned()
    }

    /// Create a plain commodity, replacing any previous one of that name.
    pub fn create(&self, symbol: &str) -> CommodityRef {
        tracing::debug!(symbol, "creating commodity");
        let base = Rc::new(CommodityBase::new(symbol));
        let commodity = Rc::new(Commodity::new_base(base, Rc::clone(&self.defaults), self.serial()));
        self.commodities
            .borrow_mut()
            .insert(symbol.to_string(), Rc::clone(&commodity));
        commodity
    }

    /// The canonical commodity for `symbol`, created on first use.
    pub fn find_or_create(&self, symbol: &str) -> CommodityRef {
        match self.find(symbol) {
            Some(c) => c,
            None => self.create(symbol),
        }
    }

    /// Look up an annotated commodity.
    pub fn find_annotated(&self, symbol: &str, details: &Annotation) -> Option<CommodityRef> {
        self.annotated
            .borrow()
            .get(&(symbol.to_string(), details.clone()))
            .cloned()
    }

    /// Create the annotated variant of `commodity`.
    pub fn create_annotated(&self, commodity: &CommodityRef, details: Annotation) -> CommodityRef {
        let referent = commodity.referent();
        tracing::debug!(symbol = referent.base_symbol(), details = %details, "creating annotated commodity");

        let mut saw = CommodityFlags::SAW_ANNOTATED;
        if details.price.is_some() {
            saw |= if details.has_flags(AnnotationFlags::PRICE_FIXATED) {
                CommodityFlags::SAW_ANN_PRICE_FIXATED
            } else {
                CommodityFlags::SAW_ANN_PRICE_FLOAT
            };
        }
        referent.add_flags(saw);

        let key = (referent.base_symbol().to_string(), details.clone());
        let annotated = Rc::new(Commodity::new_annotated(&referent, details, self.serial()));
        self.annotated.borrow_mut().insert(key, Rc::clone(&annotated));
        annotated
    }

    /// The canonical annotated variant of `commodity` for `details`.
    ///
    /// Empty details yield the plain commodity.
    pub fn find_or_create_annotated(&self, commodity: &CommodityRef, details: Annotation) -> CommodityRef {
        if details.is_empty() {
            return commodity.referent();
        }
        match self.find_annotated(commodity.base_symbol(), &details) {
            Some(c) => c,
            None => self.create_annotated(commodity, details),
        }
    }

    /// Make `name` another key for `referent`'s commodity.
    pub fn alias(&self, name: &str, referent: &CommodityRef) -> CommodityRef {
        let target = referent.referent();
        tracing::debug!(name, target = target.base_symbol(), "aliasing commodity");
        self.commodities
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&target));
        target
    }

    /// The commodity left after dropping annotation details not kept.
    ///
    /// A price is also kept when both floating and fixated prices have been
    /// seen for the base and this one is fixated; likewise only written
    /// (not calculated) details survive `only_actuals`.
    pub fn strip_annotations(&self, commodity: &CommodityRef, keep: KeepDetails) -> CommodityRef {
        let Some(details) = commodity.annotation() else {
            return Rc::clone(commodity);
        };
        let referent = commodity.referent();
        let flags = details.flags();
        let both_seen = referent.has_flags(
            CommodityFlags::SAW_ANN_PRICE_FLOAT | CommodityFlags::SAW_ANN_PRICE_FIXATED,
        );

        let keep_price = details.price.is_some()
            && (keep.keep_price || (flags.contains(AnnotationFlags::PRICE_FIXATED) && both_seen))
            && (!keep.only_actuals || !flags.contains(AnnotationFlags::PRICE_CALCULATED));
        let keep_date = details.date.is_some()
            && keep.keep_date
            && (!keep.only_actuals || !flags.contains(AnnotationFlags::DATE_CALCULATED));
        let keep_tag = details.tag.is_some()
            && keep.keep_tag
            && (!keep.only_actuals || !flags.contains(AnnotationFlags::TAG_CALCULATED));

        if !(keep_price || keep_date || keep_tag) {
            return referent;
        }

        let stripped = Annotation::new(
            details.price.clone().filter(|_| keep_price),
            details.date.filter(|_| keep_date),
            details.tag.clone().filter(|_| keep_tag),
        );
        let mut carried = AnnotationFlags::empty();
        if keep_price {
            carried |= flags & (AnnotationFlags::PRICE_FIXATED | AnnotationFlags::PRICE_CALCULATED);
        }
        if keep_date {
            carried |= flags & AnnotationFlags::DATE_CALCULATED;
        }
        if keep_tag {
            carried |= flags & AnnotationFlags::TAG_CALCULATED;
        }
        self.find_or_create_annotated(&referent, stripped.with_flags(carried))
    }

    /// Record that one unit of `commodity` was worth `price` at `when`.
    ///
    /// A reflexive entry (from a `P` directive) also marks the price's
    /// commodity as primary.
    pub fn add_price(&self, commodity: &CommodityRef, when: NaiveDateTime, price: Amount, reflexive: bool) {
        if reflexive {
            if let Some(target) = price.commodity() {
                target.add_flags(CommodityFlags::PRIMARY);
            }
        }
        let referent = commodity.referent();
        tracing::debug!(commodity = referent.base_symbol(), %when, price = %price, "adding price");
        let mut prices = self.prices.borrow_mut();
        let history = prices.entry(referent.base_symbol().to_string()).or_default();
        let at = history.partition_point(|p| p.when <= when);
        history.insert(at, PricePoint { when, price });
    }

    /// Every price recorded for `commodity`, oldest first.
    pub fn prices(&self, commodity: &CommodityRef) -> Vec<PricePoint> {
        self.prices
            .borrow()
            .get(commodity.base_symbol())
            .cloned()
            .unwrap_or_default()
    }

    /// The most recent price of `commodity` in `target` at or before `moment`.
    ///
    /// `target` defaults to the default commodity; without either, the most
    /// recent price in any commodity is returned. Inverse entries (a price
    /// of `target` in `commodity`) are used when they are more recent.
    pub fn find_price(
        &self,
        commodity: &CommodityRef,
        target: Option<&CommodityRef>,
        moment: Option<NaiveDateTime>,
    ) -> Option<PricePoint> {
        let source = commodity.referent();
        let target = target.cloned().or_else(|| self.default_commodity());
        let moment = moment.unwrap_or_else(|| self.dates.current_time());

        let prices = self.prices.borrow();
        let in_target = |p: &&PricePoint, wanted: &CommodityRef| {
            p.when <= moment && p.price.commodity().is_some_and(|c| Rc::ptr_eq(&c.referent(), wanted))
        };

        let Some(target) = target.map(|t| t.referent()) else {
            return prices
                .get(source.base_symbol())
                .and_then(|h| h.iter().rev().find(|p| p.when <= moment))
                .cloned();
        };
        if Rc::ptr_eq(&source, &target) {
            return None;
        }

        let direct = prices
            .get(source.base_symbol())
            .and_then(|h| h.iter().rev().find(|p| in_target(p, &target)))
            .cloned();
        let inverse = prices
            .get(target.base_symbol())
            .and_then(|h| h.iter().rev().find(|p| in_target(p, &source)))
            .and_then(|p| {
                let inverted = p.price.number().inverted().ok()?;
                Some(PricePoint {
                    when: p.when,
                    price: inverted.with_commodity(Some(Rc::clone(&target))),
                })
            });

        match (direct, inverse) {
            (Some(d), Some(i)) if i.when > d.when => Some(i),
            (Some(d), _) => Some(d),
            (None, i) => i,
        }
    }

    /// Exchange `amount` for `cost`, recording the implied price.
    ///
    /// `cost` is per unit when `is_per_unit`, else the total. The returned
    /// amount is annotated with the calculated per-unit price and, when
    /// given, the moment's date and the tag.
    pub fn exchange(
        &self,
        amount: &Amount,
        cost: &Amount,
        is_per_unit: bool,
        add_price: bool,
        moment: Option<NaiveDateTime>,
        tag: Option<&str>,
    ) -> AmountResult<CostBreakdown> {
        tracing::debug!(amount = %amount, cost = %cost, is_per_unit, "exchanging");
        let current = amount.commodity().and_then(|c| c.annotation()).cloned();

        let mut per_unit_cost = if is_per_unit || amount.is_realzero()? {
            cost.abs()?
        } else {
            cost.checked_div(amount)?.abs()?
        };
        if !cost.has_commodity() {
            per_unit_cost.clear_commodity();
        }

        let fixated = current
            .as_ref()
            .is_some_and(|a| a.price.is_some() && a.has_flags(AnnotationFlags::PRICE_FIXATED));
        let distinct = match (amount.commodity(), per_unit_cost.commodity()) {
            (Some(a), Some(b)) => !Rc::ptr_eq(&a.referent(), &b.referent()),
            (None, None) => false,
            _ => true,
        };
        if add_price && !per_unit_cost.is_realzero()? && !fixated && distinct {
            if let Some(commodity) = amount.commodity() {
                let when = moment.unwrap_or_else(|| self.dates.current_time());
                self.add_price(commodity, when, per_unit_cost.clone(), false);
            }
        }

        let final_cost = if is_per_unit {
            cost.checked_mul(&amount.abs()?)?
        } else {
            cost.clone()
        };
        let basis_cost = match current.as_ref().and_then(|a| a.price.as_ref()) {
            Some(price) => price.checked_mul(amount)?.unrounded()?,
            None => final_cost.clone(),
        };

        let mut flags = AnnotationFlags::PRICE_CALCULATED;
        if current
            .as_ref()
            .is_some_and(|a| a.has_flags(AnnotationFlags::PRICE_FIXATED))
        {
            flags |= AnnotationFlags::PRICE_FIXATED;
        }
        if moment.is_some() {
            flags |= AnnotationFlags::DATE_CALCULATED;
        }
        if tag.is_some_and(|t| !t.is_empty()) {
            flags |= AnnotationFlags::TAG_CALCULATED;
        }
        let details = Annotation::new(
            Some(per_unit_cost),
            moment.map(|m| m.date()),
            tag.map(str::to_string),
        )
        .with_flags(flags);
        let annotated = amount.annotate(details, self)?;

        tracing::debug!(
            amount = %annotated,
            final_cost = %final_cost,
            basis_cost = %basis_cost,
            "exchange result"
        );
        Ok(CostBreakdown {
            amount: annotated,
            final_cost,
            basis_cost,
        })
    }

    /// Parse the body of a `P` directive: `DATE [TIME] SYMBOL PRICE`.
    ///
    /// The date may be left out when `no_date` is set, in which case the
    /// current time is used. Returns `None` for an empty body.
    pub fn parse_price_directive(
        &self,
        text: &str,
        do_not_add_price: bool,
        no_date: bool,
    ) -> AmountResult<Option<(CommodityRef, PricePoint)>> {
        let text = text.trim();
        let (first, rest) = split_word(text);
        if first.is_empty() || rest.is_empty() {
            return Ok(None);
        }

        let starts_digit = |s: &str| s.starts_with(|c: char| c.is_ascii_digit());
        let (when, mut symbol_and_price) = if !no_date && starts_digit(rest) {
            let (time, rest) = split_word(rest);
            if rest.is_empty() {
                return Ok(None);
            }
            let when = times::parse_datetime(&format!("{first} {time}"), &self.dates)?;
            (when, rest)
        } else if !no_date && starts_digit(first) {
            let date = times::parse_date(first, &self.dates)?;
            (date.and_time(chrono::NaiveTime::MIN), rest)
        } else {
            (self.dates.current_time(), text)
        };

        let (symbol, after) = parse_symbol(symbol_and_price)?;
        symbol_and_price = after;
        let price = Amount::parse_with(symbol_and_price, self, ParseFlags::NO_MIGRATE)?;

        let commodity = self.find_or_create(&symbol);
        if !do_not_add_price {
            self.add_price(&commodity, when, price.clone(), true);
        }
        commodity.add_flags(CommodityFlags::KNOWN);
        Ok(Some((commodity, PricePoint { when, price })))
    }

    /// Parse `SYMBOL[=PRICE[;PRICE...]]`, recording each price at `moment`.
    pub fn parse_price_expression(
        &self,
        text: &str,
        add_price: bool,
        moment: Option<NaiveDateTime>,
    ) -> AmountResult<CommodityRef> {
        let (symbol, prices) = match text.split_once('=') {
            Some((symbol, prices)) => (symbol.trim(), Some(prices.trim())),
            None => (text.trim(), None),
        };
        let commodity = self.find_or_create(symbol);
        if let Some(prices) = prices.filter(|p| add_price && !p.is_empty()) {
            let when = moment.unwrap_or_else(|| self.dates.current_date().and_time(chrono::NaiveTime::MIN));
            for price in prices.split(';') {
                self.add_price(&commodity, when, Amount::parse(price, self)?, false);
            }
        }
        Ok(commodity)
    }

    /// Forget every commodity and price.
    ///
    /// Pools created with builtins get them back; style defaults and the
    /// date context are restored to their initial state.
    pub fn reset(&self) {
        tracing::debug!("resetting commodity pool");
        self.break_links();
        self.commodities.borrow_mut().clear();
        self.annotated.borrow_mut().clear();
        self.prices.borrow_mut().clear();
        self.default_commodity.replace(None);
        self.defaults.set_decimal_comma(false);
        self.defaults.set_time_colon(false);
        self.dates.reset();
        self.keep_base.set(false);
        self.next_serial.set(0);
        if self.builtins {
            self.install_builtins();
        }
    }

    fn break_links(&self) {
        for commodity in self.commodities.borrow().values() {
            commodity.base().clear_links();
        }
    }
}

impl Drop for CommodityPool {
    fn drop(&mut self) {
        self.break_links();
    }
}

impl std::fmt::Debug for CommodityPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommodityPool")
            .field("commodities", &self.commodities.borrow().len())
            .field("annotated", &self.annotated.borrow().len())
            .field("default_commodity", &self.default_commodity().map(|c| c.symbol().to_string()))
            .finish_non_exhaustive()
    }
}

fn split_word(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(at) => (&text[..at], text[at..].trim_start()),
        None => (text, ""),
    }
}
