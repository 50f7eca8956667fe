//! Dynamically typed values produced by expressions.

use chrono::NaiveDate;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

use crate::amount::Amount;
use crate::balance::Balance;
use crate::error::{AmountError, ExprError, ExprResult};
use crate::times::PRINTED_DATE_FORMAT;

/// The result of evaluating an expression.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// No value.
    #[default]
    Null,
    /// A truth value.
    Boolean(bool),
    /// A plain integer.
    Integer(i64),
    /// A commoditized amount.
    Amount(Amount),
    /// A multi-commodity balance.
    Balance(Balance),
    /// Text.
    String(String),
    /// A calendar date.
    Date(NaiveDate),
    /// A compiled regular expression.
    Mask(Regex),
}

impl Value {
    /// Article-prefixed name of the kind, as used in error messages.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "an uninitialized value",
            Self::Boolean(_) => "a boolean",
            Self::Integer(_) => "an integer",
            Self::Amount(_) => "an amount",
            Self::Balance(_) => "a balance",
            Self::String(_) => "a string",
            Self::Date(_) => "a date",
            Self::Mask(_) => "a regexp",
        }
    }

    /// Whether this is [`Value::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness: non-zero numbers, non-empty strings, set dates.
    pub fn is_true(&self) -> ExprResult<bool> {
        Ok(match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Amount(a) => !a.is_null() && a.is_nonzero()?,
            Self::Balance(b) => b.is_nonzero()?,
            Self::String(s) => !s.is_empty(),
            Self::Date(_) => true,
            Self::Mask(_) => {
                return Err(ExprError::Unsupported {
                    op: "determine truth of",
                    kind: self.kind_name(),
                })
            }
        })
    }

    /// Numeric values as an amount.
    pub fn to_amount(&self) -> ExprResult<Amount> {
        match self {
            Self::Integer(i) => Ok(Amount::from_i64(*i)),
            Self::Amount(a) => Ok(a.clone()),
            Self::Balance(b) => Ok(b.to_amount()?),
            Self::Boolean(b) => Ok(Amount::from_i64(i64::from(*b))),
            _ => Err(ExprError::Unsupported {
                op: "convert to an amount",
                kind: self.kind_name(),
            }),
        }
    }

    /// Numeric values as a balance.
    pub fn to_balance(&self) -> ExprResult<Balance> {
        match self {
            Self::Null => Ok(Balance::new()),
            Self::Balance(b) => Ok(b.clone()),
            other => Ok(Balance::from_amount(&other.to_amount()?)?),
        }
    }

    /// Text form of strings and printed form of everything else.
    pub fn to_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Collapse a balance of zero or one commodity to a simpler value.
    pub fn simplified(self) -> Self {
        match self {
            Self::Balance(b) if b.is_empty() => Self::Integer(0),
            Self::Balance(b) => match b.single_amount() {
                Some(a) => Self::Amount(a.clone()),
                None => Self::Balance(b),
            },
            other => other,
        }
    }

    fn mismatch(&self, op: &'static str, other: &Self) -> ExprError {
        ExprError::TypeMismatch {
            op,
            left: self.kind_name(),
            right: other.kind_name(),
        }
    }

    const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Amount(_) | Self::Balance(_))
    }

    /// `self + other`.
    pub fn add(&self, other: &Self) -> ExprResult<Self> {
        match (self, other) {
            (Self::Null, v) | (v, Self::Null) => Ok(v.clone()),
            (Self::Integer(a), Self::Integer(b)) => a
                .checked_add(*b)
                .map(Self::Integer)
                .ok_or_else(|| AmountError::Overflow(format!("{a} + {b}")).into()),
            (Self::String(a), b) => Ok(Self::String(format!("{a}{}", b.to_text()))),
            (Self::Date(d), n) if n.is_numeric() => {
                add_days(*d, n.to_amount()?.to_i64()?).map(Self::Date)
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let mut sum = a.to_balance()?;
                sum.add_balance(&b.to_balance()?)?;
                Ok(Self::Balance(sum).simplified())
            }
            (a, b) => Err(a.mismatch("add", b)),
        }
    }

    /// `self - other`.
    pub fn sub(&self, other: &Self) -> ExprResult<Self> {
        match (self, other) {
            (v, Self::Null) => Ok(v.clone()),
            (Self::Null, v) => v.negated(),
            (Self::Integer(a), Self::Integer(b)) => a
                .checked_sub(*b)
                .map(Self::Integer)
                .ok_or_else(|| AmountError::Overflow(format!("{a} - {b}")).into()),
            (Self::Date(a), Self::Date(b)) => Ok(Self::Integer((*a - *b).num_days())),
            (Self::Date(d), n) if n.is_numeric() => {
                let days = n.to_amount()?.to_i64()?;
                days.checked_neg()
                    .ok_or_else(|| self.mismatch("subtract", other))
                    .and_then(|n| add_days(*d, n))
                    .map(Self::Date)
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let mut diff = a.to_balance()?;
                diff.sub_balance(&b.to_balance()?)?;
                Ok(Self::Balance(diff).simplified())
            }
            (a, b) => Err(a.mismatch("subtract", b)),
        }
    }

    /// `self * other`.
    pub fn mul(&self, other: &Self) -> ExprResult<Self> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a
                .checked_mul(*b)
                .map(Self::Integer)
                .ok_or_else(|| AmountError::Overflow(format!("{a} * {b}")).into()),
            (Self::Balance(b), v) if v.is_numeric() => {
                Ok(Self::Balance(b.checked_mul(&v.to_amount()?)?).simplified())
            }
            (v, Self::Balance(b)) if v.is_numeric() => {
                Ok(Self::Balance(b.checked_mul(&v.to_amount()?)?).simplified())
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                Ok(Self::Amount(a.to_amount()?.checked_mul(&b.to_amount()?)?))
            }
            (Self::String(s), Self::Integer(n)) => {
                Ok(Self::String(s.repeat(usize::try_from(*n).unwrap_or(0))))
            }
            (a, b) => Err(a.mismatch("multiply", b)),
        }
    }

    /// `self / other`. Integer division yields an exact amount.
    pub fn div(&self, other: &Self) -> ExprResult<Self> {
        match (self, other) {
            (Self::Balance(b), v) if v.is_numeric() => {
                Ok(Self::Balance(b.checked_div(&v.to_amount()?)?).simplified())
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                Ok(Self::Amount(a.to_amount()?.checked_div(&b.to_amount()?)?))
            }
            (a, b) => Err(a.mismatch("divide", b)),
        }
    }

    /// Arithmetic negation, or logical negation of booleans.
    pub fn negated(&self) -> ExprResult<Self> {
        match self {
            Self::Null => Ok(Self::Null),
            Self::Boolean(b) => Ok(Self::Boolean(!b)),
            Self::Integer(i) => Ok(Self::Integer(-i)),
            Self::Amount(a) => Ok(Self::Amount(a.negated()?)),
            Self::Balance(b) => Ok(Self::Balance(b.negated()?)),
            _ => Err(ExprError::Unsupported {
                op: "negate",
                kind: self.kind_name(),
            }),
        }
    }

    /// Ordering between comparable values.
    pub fn compare(&self, other: &Self) -> ExprResult<Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => Ok(a.cmp(b)),
            (Self::Boolean(a), Self::Boolean(b)) => Ok(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Ok(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Ok(a.cmp(b)),
            (Self::Null, Self::Null) => Ok(Ordering::Equal),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (x, y) = (a.to_amount()?, b.to_amount()?);
                // A bare number compares against the quantity of the other.
                if x.has_commodity() && !y.has_commodity() {
                    return Ok(x.number().compare(&y)?);
                }
                if !x.has_commodity() && y.has_commodity() {
                    return Ok(x.compare(&y.number())?);
                }
                Ok(x.compare(&y)?)
            }
            (a, b) => Err(a.mismatch("compare", b)),
        }
    }

    /// Equality between values, with numeric promotion.
    pub fn equals(&self, other: &Self) -> ExprResult<bool> {
        match (self, other) {
            (Self::Null, Self::Null) => Ok(true),
            (Self::Null, _) | (_, Self::Null) => Ok(false),
            (Self::Balance(b), v) | (v, Self::Balance(b)) if v.is_numeric() => match v {
                Self::Balance(other) => Ok(b == other),
                _ => Ok(b.eq_amount(&v.to_amount()?)?),
            },
            (Self::Mask(a), Self::Mask(b)) => Ok(a.as_str() == b.as_str()),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (x, y) = (a.to_amount()?, b.to_amount()?);
                if x.commodity().is_some() && y.commodity().is_some() && x.commodity() != y.commodity() {
                    return Ok(false);
                }
                Ok(self.compare(other)? == Ordering::Equal)
            }
            (a, b) => Ok(std::mem::discriminant(a) == std::mem::discriminant(b)
                && a.compare(b)? == Ordering::Equal),
        }
    }

    /// Whether a string value matches `mask`.
    pub fn matches(&self, mask: &Regex) -> ExprResult<bool> {
        match self {
            Self::String(s) => Ok(mask.is_match(s)),
            Self::Null => Ok(false),
            other => Ok(mask.is_match(&other.to_text())),
        }
    }
}

fn add_days(date: NaiveDate, days: i64) -> ExprResult<NaiveDate> {
    let delta = chrono::Duration::try_days(days).ok_or(ExprError::Unsupported {
        op: "shift",
        kind: "a date",
    })?;
    date.checked_add_signed(delta).ok_or(ExprError::Unsupported {
        op: "shift",
        kind: "a date",
    })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Amount(a) => write!(f, "{a}"),
            Self::Balance(b) => write!(f, "{b}"),
            Self::String(s) => write!(f, "\"{s}\""),
            Self::Date(d) => write!(f, "{}", d.format(PRINTED_DATE_FORMAT)),
            Self::Mask(m) => write!(f, "/{}/", m.as_str()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<Amount> for Value {
    fn from(value: Amount) -> Self {
        Self::Amount(value)
    }
}

impl From<Balance> for Value {
    fn from(value: Balance) -> Self {
        Self::Balance(value).simplified()
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::CommodityPool;

    #[test]
    fn test_mixed_commodity_sum_becomes_balance() {
        let pool = CommodityPool::new();
        let usd = Value::Amount(Amount::parse("$10.00", &pool).unwrap());
        let eur = Value::Amount(Amount::parse("5 EUR", &pool).unwrap());
        let sum = usd.add(&eur).unwrap();
        assert!(matches!(sum, Value::Balance(_)));

        let back = sum.sub(&eur).unwrap();
        assert_eq!(back.to_string(), "$10.00");
    }

    #[test]
    fn test_integer_promotes_to_amount() {
        let pool = CommodityPool::new();
        let usd = Value::Amount(Amount::parse("$10.00", &pool).unwrap());
        assert_eq!(usd.mul(&Value::Integer(3)).unwrap().to_string(), "$30.00");
        assert_eq!(
            usd.compare(&Value::Integer(5)).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_true().unwrap());
        assert!(Value::Integer(2).is_true().unwrap());
        assert!(!Value::String(String::new()).is_true().unwrap());
        assert!(!Value::Amount(Amount::from_i64(0)).is_true().unwrap());
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = Value::Boolean(true)
            .mul(&Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
            .unwrap_err();
        assert_eq!(err.to_string(), "Cannot multiply a boolean and a date");
    }

    #[test]
    fn test_date_arithmetic() {
        let d = Value::Date(NaiveDate::from_ymd_opt(2024, 1, 30).unwrap());
        let later = d.add(&Value::Integer(3)).unwrap();
        assert_eq!(later.to_string(), "2024/02/02");
        assert_eq!(later.sub(&d).unwrap().to_string(), "3");
    }

    #[test]
    fn test_equality() {
        let pool = CommodityPool::new();
        let a = Value::Amount(Amount::parse("$1", &pool).unwrap());
        let b = Value::Amount(Amount::parse("1 EUR", &pool).unwrap());
        assert!(!a.equals(&b).unwrap());
        assert!(a.equals(&a.clone()).unwrap());
        assert!(Value::String("x".into()).equals(&Value::from("x")).unwrap());
        assert!(!Value::Null.equals(&Value::Integer(0)).unwrap());
    }
}
