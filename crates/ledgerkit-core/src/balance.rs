//! Multi-commodity balances.
//!
//! A [`Balance`] holds at most one [`Amount`] per commodity (annotated
//! variants count as distinct commodities). Amounts that reach an exact zero
//! are removed, so an empty balance is the zero balance.

use std::fmt;
use std::rc::Rc;

use crate::amount::{compare_by_commodity, Amount};
use crate::annotation::KeepDetails;
use crate::commodity::CommodityRef;
use crate::error::{AmountError, BalanceError, BalanceResult};
use crate::pool::CommodityPool;

/// A sum of amounts in several commodities.
#[derive(Clone, Default)]
pub struct Balance {
    amounts: Vec<Amount>,
}

fn same(a: Option<&CommodityRef>, b: Option<&CommodityRef>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => Rc::ptr_eq(x, y),
        (None, None) => true,
        _ => false,
    }
}

impl Balance {
    /// The empty balance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            amounts: Vec::new(),
        }
    }

    /// A balance holding one amount.
    pub fn from_amount(amount: &Amount) -> BalanceResult<Self> {
        let mut balance = Self::new();
        balance.add_amount(amount)?;
        Ok(balance)
    }

    /// Number of commodities held.
    pub fn len(&self) -> usize {
        self.amounts.len()
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// The component amounts in insertion order.
    pub fn amounts(&self) -> impl Iterator<Item = &Amount> {
        self.amounts.iter()
    }

    fn position(&self, commodity: Option<&CommodityRef>) -> Option<usize> {
        self.amounts
            .iter()
            .position(|a| same(a.commodity(), commodity))
    }

    /// Add an amount in place.
    pub fn add_amount(&mut self, amount: &Amount) -> BalanceResult<()> {
        if amount.is_null() {
            return Err(BalanceError::AddUninitialized);
        }
        if amount.is_realzero()? {
            return Ok(());
        }
        match self.position(amount.commodity()) {
            Some(i) => {
                let sum = self.amounts[i].checked_add(amount)?;
                if sum.is_realzero()? {
                    self.amounts.remove(i);
                } else {
                    self.amounts[i] = sum;
                }
            }
            None => self.amounts.push(amount.clone()),
        }
        Ok(())
    }

    /// Subtract an amount in place.
    pub fn sub_amount(&mut self, amount: &Amount) -> BalanceResult<()> {
        if amount.is_null() {
            return Err(BalanceError::SubtractUninitialized);
        }
        if amount.is_realzero()? {
            return Ok(());
        }
        match self.position(amount.commodity()) {
            Some(i) => {
                let diff = self.amounts[i].checked_sub(amount)?;
                if diff.is_realzero()? {
                    self.amounts.remove(i);
                } else {
                    self.amounts[i] = diff;
                }
            }
            None => self.amounts.push(amount.negated()?),
        }
        Ok(())
    }

    /// Add every component of another balance in place.
    pub fn add_balance(&mut self, other: &Self) -> BalanceResult<()> {
        for amount in &other.amounts {
            self.add_amount(amount)?;
        }
        Ok(())
    }

    /// Subtract every component of another balance in place.
    pub fn sub_balance(&mut self, other: &Self) -> BalanceResult<()> {
        for amount in &other.amounts {
            self.sub_amount(amount)?;
        }
        Ok(())
    }

    /// Scaled by `factor`.
    ///
    /// A commodity-less factor scales every component. A commoditized factor
    /// is only accepted for a balance of one plain commodity.
    pub fn checked_mul(&self, factor: &Amount) -> BalanceResult<Self> {
        if factor.is_null() {
            return Err(BalanceError::MultiplyUninitialized);
        }
        if factor.is_realzero()? || self.is_empty() {
            return Ok(Self::new());
        }
        if !factor.has_commodity() {
            return self.map(|a| a.checked_mul(factor));
        }
        match self.amounts.as_slice() {
            [single] if single.has_annotation()? => Err(BalanceError::MultiplyAnnotated),
            [single] => Self::from_amount(&single.checked_mul(factor)?),
            _ => Err(BalanceError::MultiplyMultiCommodity),
        }
    }

    /// Divided by `divisor`, under the same rules as [`Balance::checked_mul`].
    pub fn checked_div(&self, divisor: &Amount) -> BalanceResult<Self> {
        if divisor.is_null() {
            return Err(BalanceError::DivideUninitialized);
        }
        if divisor.is_realzero()? {
            return Err(BalanceError::DivideByZero);
        }
        if self.is_empty() {
            return Ok(Self::new());
        }
        if !divisor.has_commodity() {
            return self.map(|a| a.checked_div(divisor));
        }
        match self.amounts.as_slice() {
            [single] if single.has_annotation()? => Err(BalanceError::DivideAnnotated),
            [single] => Self::from_amount(&single.checked_div(divisor)?),
            _ => Err(BalanceError::DivideMultiCommodity),
        }
    }

    fn map(&self, f: impl Fn(&Amount) -> Result<Amount, AmountError>) -> BalanceResult<Self> {
        let mut out = Self::new();
        for amount in &self.amounts {
            out.add_amount(&f(amount)?)?;
        }
        Ok(out)
    }

    /// Every component negated.
    pub fn negated(&self) -> BalanceResult<Self> {
        self.map(Amount::negated)
    }

    /// Every component made non-negative.
    pub fn abs(&self) -> BalanceResult<Self> {
        self.map(Amount::abs)
    }

    /// Sum of the bare numbers of every component.
    pub fn number(&self) -> BalanceResult<Amount> {
        let mut total = Amount::from_i64(0);
        for amount in &self.amounts {
            total = total.checked_add(&amount.number())?;
        }
        Ok(total)
    }

    /// Every component rounded to its display precision.
    pub fn truncated(&self) -> BalanceResult<Self> {
        self.map(Amount::truncated)
    }

    /// Display rounding enabled on every component.
    pub fn rounded(&self) -> BalanceResult<Self> {
        self.map(Amount::rounded)
    }

    /// Display rounding disabled on every component.
    pub fn unrounded(&self) -> BalanceResult<Self> {
        self.map(Amount::unrounded)
    }

    /// Every component in its smallest unit; components may merge.
    pub fn reduced(&self) -> BalanceResult<Self> {
        self.map(Amount::reduced)
    }

    /// Every component in its largest unit that is at least one.
    pub fn unreduced(&self) -> BalanceResult<Self> {
        self.map(Amount::unreduced)
    }

    /// Drop annotation details not selected by `keep`, merging lots that
    /// become identical.
    pub fn strip_annotations(&self, keep: KeepDetails, pool: &CommodityPool) -> BalanceResult<Self> {
        self.map(|a| a.strip_annotations(keep, pool))
    }

    /// The component in `commodity`.
    ///
    /// With no commodity requested, a single-commodity balance yields its
    /// amount; otherwise annotations are stripped and the lookup retried,
    /// failing when several commodities remain.
    pub fn commodity_amount(
        &self,
        commodity: Option<&CommodityRef>,
        pool: &CommodityPool,
    ) -> BalanceResult<Option<Amount>> {
        if let Some(c) = commodity {
            return Ok(self
                .amounts
                .iter()
                .find(|a| a.commodity().is_some_and(|ac| Rc::ptr_eq(ac, c)))
                .cloned());
        }
        match self.amounts.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(single.clone())),
            _ => {
                let stripped = self.strip_annotations(KeepDetails::NONE, pool)?;
                match stripped.amounts.as_slice() {
                    [single] => Ok(Some(single.clone())),
                    _ => Err(AmountError::MultipleCommodities(self.to_string()).into()),
                }
            }
        }
    }

    /// The single component, if there is exactly one.
    pub fn single_amount(&self) -> Option<&Amount> {
        match self.amounts.as_slice() {
            [single] => Some(single),
            _ => None,
        }
    }

    /// Convert a single-commodity balance into its amount.
    pub fn to_amount(&self) -> BalanceResult<Amount> {
        match self.amounts.as_slice() {
            [] => Err(BalanceError::EmptyToAmount),
            [single] => Ok(single.clone()),
            _ => Err(BalanceError::MultipleToAmount),
        }
    }

    /// Whether every component displays as zero.
    pub fn is_zero(&self) -> BalanceResult<bool> {
        for amount in &self.amounts {
            if !amount.is_zero()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether every component is exactly zero.
    pub fn is_realzero(&self) -> BalanceResult<bool> {
        for amount in &self.amounts {
            if !amount.is_realzero()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether some component displays as non-zero.
    pub fn is_nonzero(&self) -> BalanceResult<bool> {
        Ok(!self.is_zero()?)
    }

    /// Whether the balance equals a single amount; zero equals the empty
    /// balance.
    pub fn eq_amount(&self, amount: &Amount) -> BalanceResult<bool> {
        if amount.is_null() {
            return Err(BalanceError::CompareUninitialized);
        }
        if amount.is_realzero()? {
            return Ok(self.is_empty());
        }
        Ok(self.single_amount() == Some(amount))
    }

    /// Whether every component is a valid amount.
    pub fn valid(&self) -> bool {
        self.amounts.iter().all(|a| a.valid() && !a.is_null())
    }

    /// Components ordered by commodity.
    pub fn sorted_amounts(&self) -> Vec<&Amount> {
        let mut sorted: Vec<&Amount> = self.amounts.iter().collect();
        sorted.sort_by(|a, b| compare_by_commodity(a, b));
        sorted
    }

    /// One line per component, ordered by commodity; `0` when empty.
    pub fn print_lines(&self) -> Vec<String> {
        if self.is_empty() {
            return vec!["0".to_string()];
        }
        self.sorted_amounts()
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl PartialEq for Balance {
    fn eq(&self, other: &Self) -> bool {
        self.amounts.len() == other.amounts.len()
            && self.amounts.iter().all(|a| {
                other
                    .position(a.commodity())
                    .is_some_and(|i| &other.amounts[i] == a)
            })
    }
}

impl Eq for Balance {}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print_lines().join("\n"))
    }
}

impl fmt::Debug for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.amounts.iter()).finish()
    }
}
