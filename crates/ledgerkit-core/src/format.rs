//! Number rendering.
//!
//! Quantities are printed by rounding to a display precision, then trimming
//! optional trailing zeros down to a number of mandatory fraction digits.
//! Commodities pick the decimal mark and an optional thousands separator.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, Zero};

use crate::quantity::{pow10, round_half_even};

/// Punctuation used when printing a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberStyle {
    /// Separator inserted between groups of three integer digits, if any.
    pub thousands: Option<char>,
    /// Character between the integer and fractional parts.
    pub decimal_mark: char,
}

impl Default for NumberStyle {
    fn default() -> Self {
        Self {
            thousands: None,
            decimal_mark: '.',
        }
    }
}

impl NumberStyle {
    /// Plain `1234.5` style.
    pub const PLAIN: Self = Self {
        thousands: None,
        decimal_mark: '.',
    };
}

/// Render `value` rounded to `precision` fraction digits.
///
/// At least `mandatory_zeros` fraction digits are kept even when they are
/// zero; any further trailing zeros are dropped.
#[must_use]
pub fn format_number(
    value: &BigRational,
    precision: u32,
    mandatory_zeros: u32,
    style: NumberStyle,
) -> String {
    let rounded = round_half_even(value, precision);
    let scaled = (&rounded * BigRational::from_integer(pow10(precision))).to_integer();
    let negative = scaled.is_negative();
    let digits = scaled.abs().to_string();

    let width = precision as usize + 1;
    let digits = if digits.len() < width {
        format!("{}{digits}", "0".repeat(width - digits.len()))
    } else {
        digits
    };
    let (int_part, frac_part) = digits.split_at(digits.len() - precision as usize);

    let keep = mandatory_zeros.min(precision) as usize;
    let mut frac = frac_part.trim_end_matches('0');
    if frac.len() < keep {
        frac = &frac_part[..keep];
    }

    let mut out = String::with_capacity(digits.len() + 4);
    if negative && !scaled.is_zero() {
        out.push('-');
    }
    match style.thousands {
        Some(sep) => out.push_str(&group_thousands(int_part, sep)),
        None => out.push_str(int_part),
    }
    if !frac.is_empty() {
        out.push(style.decimal_mark);
        out.push_str(frac);
    }
    out
}

/// Render `value` with exactly `places` fraction digits and no grouping.
#[must_use]
pub fn format_rational(value: &BigRational, places: u32) -> String {
    format_number(value, places, places, NumberStyle::PLAIN)
}

/// Render an integer with no grouping.
#[must_use]
pub fn format_integer(value: &BigInt) -> String {
    value.to_string()
}

fn group_thousands(digits: &str, sep: char) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(ch);
    }
    out
}
