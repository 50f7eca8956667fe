//! Exact rational quantities with display precision tracking.
//!
//! A [`Quantity`] stores its value as an arbitrary-precision rational, so no
//! arithmetic ever loses information. Alongside the value it records a
//! *precision*: the number of fractional digits the value is known to, which
//! drives how many digits get printed. Precision never changes the value;
//! only explicit rounding operations do.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{AmountError, AmountResult};

/// Largest precision considered valid.
pub const MAX_PRECISION: u32 = 1024;

/// An exact signed rational number with an associated display precision.
#[derive(Clone)]
pub struct Quantity {
    value: BigRational,
    precision: u32,
    keep_precision: bool,
}

impl Quantity {
    /// The value zero at precision zero.
    #[must_use]
    pub fn zero() -> Self {
        Self::from_rational(BigRational::zero(), 0)
    }

    /// The value one at precision zero.
    #[must_use]
    pub fn one() -> Self {
        Self::from_rational(BigRational::one(), 0)
    }

    /// Wrap a rational with the given precision.
    #[must_use]
    pub const fn from_rational(value: BigRational, precision: u32) -> Self {
        Self {
            value,
            precision,
            keep_precision: false,
        }
    }

    /// Convert an integer; the precision is zero.
    #[must_use]
    pub fn from_i64(value: i64) -> Self {
        Self::from_rational(BigRational::from_integer(BigInt::from(value)), 0)
    }

    /// Convert a binary float using its shortest round-tripping decimal form.
    ///
    /// Returns `None` for NaN and infinities.
    #[must_use]
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let text = format!("{value}");
        Self::parse_decimal(&text).ok()
    }

    /// Convert a decimal, keeping its scale as precision.
    #[must_use]
    pub fn from_decimal(value: Decimal) -> Self {
        let scale = value.scale();
        let mantissa = BigInt::from(value.mantissa());
        let denom = pow10(scale);
        Self::from_rational(BigRational::new(mantissa, denom), scale)
    }

    /// Parse plain digits with an optional leading `-` and at most one `.`.
    ///
    /// The precision becomes the number of digits after the period.
    pub fn parse_decimal(text: &str) -> AmountResult<Self> {
        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        let valid = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty()) || !valid(int_part) || !valid(frac_part)
        {
            return Err(AmountError::InvalidQuantity(text.to_string()));
        }
        let digits = format!("{int_part}{frac_part}");
        let mut numer = BigInt::from_str(&digits)
            .map_err(|_| AmountError::InvalidQuantity(text.to_string()))?;
        if negative {
            numer = -numer;
        }
        let precision = frac_part.len() as u32;
        Ok(Self::from_rational(
            BigRational::new(numer, pow10(precision)),
            precision,
        ))
    }

    /// The exact value.
    #[must_use]
    pub const fn value(&self) -> &BigRational {
        &self.value
    }

    /// The recorded precision.
    #[must_use]
    pub const fn precision(&self) -> u32 {
        self.precision
    }

    /// Whether display rounding to the commodity precision is suppressed.
    #[must_use]
    pub const fn keep_precision(&self) -> bool {
        self.keep_precision
    }

    /// Return a copy with a different precision; the value is untouched.
    #[must_use]
    pub fn with_precision(&self, precision: u32) -> Self {
        Self {
            precision,
            ..self.clone()
        }
    }

    /// Return a copy with the keep-precision flag set as given.
    #[must_use]
    pub fn with_keep_precision(&self, keep: bool) -> Self {
        Self {
            keep_precision: keep,
            ..self.clone()
        }
    }

    /// Whether the precision is within bounds.
    #[must_use]
    pub const fn valid(&self) -> bool {
        self.precision <= MAX_PRECISION
    }

    /// -1, 0 or 1.
    #[must_use]
    pub fn sign(&self) -> i32 {
        if self.value.is_zero() {
            0
        } else if self.value.is_negative() {
            -1
        } else {
            1
        }
    }

    /// Exact zero test.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Whether the value rounds to zero at `places` fractional digits.
    #[must_use]
    pub fn is_zero_in_precision(&self, places: u32) -> bool {
        round_half_even(&self.value, places).is_zero()
    }

    /// Sum; the result keeps the left precision.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self {
            value: &self.value + &other.value,
            ..self.clone()
        }
    }

    /// Difference; the result keeps the left precision.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        Self {
            value: &self.value - &other.value,
            ..self.clone()
        }
    }

    /// Product; precisions add.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        Self {
            value: &self.value * &other.value,
            precision: self.precision.saturating_add(other.precision),
            keep_precision: self.keep_precision,
        }
    }

    /// Quotient; precisions add. The divisor must not be zero.
    pub fn div(&self, other: &Self) -> AmountResult<Self> {
        if other.value.is_zero() {
            return Err(AmountError::DivideByZero);
        }
        Ok(Self {
            value: &self.value / &other.value,
            precision: self.precision.saturating_add(other.precision),
            keep_precision: self.keep_precision,
        })
    }

    /// Negated copy.
    #[must_use]
    pub fn negated(&self) -> Self {
        Self {
            value: -&self.value,
            ..self.clone()
        }
    }

    /// Absolute value.
    #[must_use]
    pub fn abs(&self) -> Self {
        Self {
            value: self.value.abs(),
            ..self.clone()
        }
    }

    /// Largest integer not above the value.
    #[must_use]
    pub fn floor(&self) -> Self {
        Self {
            value: self.value.floor(),
            ..self.clone()
        }
    }

    /// Smallest integer not below the value.
    #[must_use]
    pub fn ceil(&self) -> Self {
        Self {
            value: self.value.ceil(),
            ..self.clone()
        }
    }

    /// Round to `places` fractional digits, ties to even.
    #[must_use]
    pub fn round_to(&self, places: u32) -> Self {
        Self {
            value: round_half_even(&self.value, places),
            ..self.clone()
        }
    }

    /// Multiplicative inverse, or zero for zero.
    #[must_use]
    pub fn inverted(&self) -> Self {
        if self.value.is_zero() {
            return self.clone();
        }
        Self {
            value: self.value.recip(),
            ..self.clone()
        }
    }

    /// Whether the value, rounded to an integer, fits in an `i64`.
    #[must_use]
    pub fn fits_in_i64(&self) -> bool {
        round_half_even(&self.value, 0).to_integer().to_i64().is_some()
    }

    /// Round to the nearest integer (ties to even).
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        round_half_even(&self.value, 0).to_integer().to_i64()
    }

    /// Nearest binary float.
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        self.value.to_f64().unwrap_or(f64::NAN)
    }

    /// Nearest decimal, rounded to the decimal's 28-digit capacity.
    #[must_use]
    pub fn to_decimal(&self) -> Option<Decimal> {
        let places = self.precision.min(28);
        let rounded = round_half_even(&self.value, places);
        let scaled = (rounded * BigRational::from_integer(pow10(places))).to_integer();
        let mantissa = scaled.to_i128()?;
        Decimal::try_from_i128_with_scale(mantissa, places).ok()
    }

    /// Exact comparison of values.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Quantity {}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl fmt::Debug for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Quantity({} @{}{})",
            crate::format::format_rational(&self.value, self.precision.max(6)),
            self.precision,
            if self.keep_precision { " keep" } else { "" }
        )
    }
}

impl From<i64> for Quantity {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Self::from_decimal(value)
    }
}

/// `10^exp` as a big integer.
#[must_use]
pub fn pow10(exp: u32) -> BigInt {
    num_traits::pow(BigInt::from(10), exp as usize)
}

/// Round a rational to `places` fractional digits, ties to even.
#[must_use]
pub fn round_half_even(value: &BigRational, places: u32) -> BigRational {
    let scale = BigRational::from_integer(pow10(places));
    let scaled = value * &scale;
    let floor = scaled.floor();
    let fraction = &scaled - &floor;
    let half = BigRational::new(BigInt::from(1), BigInt::from(2));
    let floor_int = floor.to_integer();
    let rounded = match fraction.cmp(&half) {
        Ordering::Less => floor_int,
        Ordering::Greater => floor_int + 1,
        Ordering::Equal => {
            if (&floor_int % 2u8).is_zero() {
                floor_int
            } else {
                floor_int + 1
            }
        }
    };
    BigRational::from_integer(rounded) / scale
}
