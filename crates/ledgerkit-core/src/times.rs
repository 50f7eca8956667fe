//! Date parsing and period expressions.
//!
//! Dates in journals are written `Y/M/D`, `Y-M-D`, `Y.M.D`, `Y/M` or, with
//! the year left out, `M/D`. A missing year comes from the current epoch
//! (set by `apply year`), falling back to today; if that would put the date
//! in a later month than the epoch, the previous year is used.

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use thiserror::Error;

/// Format used when dates are printed in annotations and diagnostics.
pub const PRINTED_DATE_FORMAT: &str = "%Y/%m/%d";

/// Errors from date and period parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    /// Text that is not a date.
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    /// Text that is not a date and time.
    #[error("Invalid date/time: {0}")]
    InvalidDateTime(String),
    /// A year directive argument that is not a year.
    #[error("Invalid year")]
    InvalidYear,
    /// A period expression that could not be understood.
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),
}

/// Session-wide date state shared by the amount and journal parsers.
#[derive(Debug)]
pub struct DateContext {
    epoch: Cell<Option<NaiveDateTime>>,
    today: Cell<NaiveDate>,
    input_format: RefCell<Option<String>>,
}

impl Default for DateContext {
    fn default() -> Self {
        Self::new(chrono::Local::now().date_naive())
    }
}

impl DateContext {
    /// A context whose "today" is `today`.
    #[must_use]
    pub fn new(today: NaiveDate) -> Self {
        Self {
            epoch: Cell::new(None),
            today: Cell::new(today),
            input_format: RefCell::new(None),
        }
    }

    /// The epoch, if one was set.
    pub fn epoch(&self) -> Option<NaiveDateTime> {
        self.epoch.get()
    }

    /// Replace the epoch, returning the previous one.
    pub fn set_epoch(&self, epoch: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
        self.epoch.replace(epoch)
    }

    /// Override today's date.
    pub fn set_today(&self, today: NaiveDate) {
        self.today.set(today);
    }

    /// The epoch date, or today.
    pub fn current_date(&self) -> NaiveDate {
        self.epoch.get().map_or_else(|| self.today.get(), |e| e.date())
    }

    /// The epoch, or the start of today.
    pub fn current_time(&self) -> NaiveDateTime {
        self.epoch
            .get()
            .unwrap_or_else(|| self.today.get().and_time(NaiveTime::MIN))
    }

    /// A strftime format tried before the built-in date forms.
    pub fn input_format(&self) -> Option<String> {
        self.input_format.borrow().clone()
    }

    /// Set or clear the input date format.
    pub fn set_input_format(&self, format: Option<String>) {
        self.input_format.replace(format);
    }

    /// Forget the epoch and the input format.
    pub fn reset(&self) {
        self.epoch.set(None);
        self.input_format.replace(None);
    }
}

/// Dec 31 of `year`, the epoch installed by `apply year`.
pub fn year_end(year: i32) -> Result<NaiveDateTime, DateError> {
    NaiveDate::from_ymd_opt(year, 12, 31)
        .map(|d| d.and_time(NaiveTime::MIN))
        .ok_or(DateError::InvalidYear)
}

/// Parse a journal date.
pub fn parse_date(text: &str, ctx: &DateContext) -> Result<NaiveDate, DateError> {
    let invalid = || DateError::InvalidDate(text.to_string());
    if text.is_empty() || text.len() > 127 {
        return Err(invalid());
    }
    if let Some(format) = ctx.input_format.borrow().as_deref() {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Ok(date);
        }
    }

    let normalized: String = text
        .chars()
        .map(|c| if c == '.' || c == '-' { '/' } else { c })
        .collect();
    let parts: Vec<&str> = normalized.split('/').collect();
    if parts
        .iter()
        .any(|p| p.is_empty() || p.len() > 4 || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return Err(invalid());
    }
    let num = |s: &str| s.parse::<u32>().map_err(|_| invalid());

    let date = match parts.as_slice() {
        [m, d] if m.len() <= 2 => {
            let (month, day) = (num(m)?, num(d)?);
            let current = ctx.current_date();
            let mut year = current.year();
            if month > current.month() {
                year -= 1;
            }
            NaiveDate::from_ymd_opt(year, month, day)
        }
        [y, m] if y.len() == 4 => NaiveDate::from_ymd_opt(num(y)? as i32, num(m)?, 1),
        [y, m, d] if y.len() == 4 && m.len() <= 2 && d.len() <= 2 => {
            NaiveDate::from_ymd_opt(num(y)? as i32, num(m)?, num(d)?)
        }
        [y, m, d] if y.len() == 2 && m.len() <= 2 && d.len() <= 2 => {
            let short = num(y)? as i32;
            let year = if short < 69 { 2000 + short } else { 1900 + short };
            NaiveDate::from_ymd_opt(year, num(m)?, num(d)?)
        }
        _ => None,
    };
    date.ok_or_else(invalid)
}

/// Parse `DATE HH:MM[:SS]`, in journal or timelog (`M/D/Y`) order.
pub fn parse_datetime(text: &str, ctx: &DateContext) -> Result<NaiveDateTime, DateError> {
    let invalid = || DateError::InvalidDateTime(text.to_string());
    if text.len() > 127 {
        return Err(invalid());
    }
    let mut fields = text.split_whitespace();
    let date_text = fields.next().ok_or_else(invalid)?;
    let time_text = fields.next();
    if fields.next().is_some() {
        return Err(invalid());
    }

    let time = match time_text {
        Some(t) => NaiveTime::parse_from_str(t, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
            .map_err(|_| invalid())?,
        None => NaiveTime::MIN,
    };

    let normalized = date_text.replace(['.', '-'], "/");
    let date = NaiveDate::parse_from_str(&normalized, "%Y/%m/%d")
        .or_else(|_| NaiveDate::parse_from_str(&normalized, "%m/%d/%Y"))
        .or_else(|_| parse_date(date_text, ctx))
        .map_err(|_| invalid())?;
    Ok(date.and_time(time))
}

/// Unit of a recurring period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantum {
    /// Calendar days.
    Days,
    /// Seven-day weeks.
    Weeks,
    /// Calendar months.
    Months,
    /// Three-month quarters.
    Quarters,
    /// Calendar years.
    Years,
}

/// A step of `length` quanta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    /// The unit.
    pub quantum: Quantum,
    /// How many units.
    pub length: u32,
}

impl Duration {
    /// Advance `date` by this duration.
    pub fn add_to(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.quantum {
            Quantum::Days => date.checked_add_days(chrono::Days::new(u64::from(self.length))),
            Quantum::Weeks => {
                date.checked_add_days(chrono::Days::new(7 * u64::from(self.length)))
            }
            Quantum::Months => date.checked_add_months(Months::new(self.length)),
            Quantum::Quarters => date.checked_add_months(Months::new(self.length.checked_mul(3)?)),
            Quantum::Years => date.checked_add_months(Months::new(self.length.checked_mul(12)?)),
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.quantum {
            Quantum::Days => "day",
            Quantum::Weeks => "week",
            Quantum::Months => "month",
            Quantum::Quarters => "quarter",
            Quantum::Years => "year",
        };
        if self.length == 1 {
            write!(f, "every {unit}")
        } else {
            write!(f, "every {} {unit}s", self.length)
        }
    }
}

/// A parsed period expression: an optional range and an optional step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateInterval {
    /// First date covered.
    pub start: Option<NaiveDate>,
    /// First date no longer covered.
    pub end: Option<NaiveDate>,
    /// Recurrence step.
    pub duration: Option<Duration>,
}

impl DateInterval {
    /// Parse a period such as `monthly from 2024/01/01` or
    /// `every 2 weeks until 2024/06`.
    pub fn parse(text: &str, ctx: &DateContext) -> Result<Self, DateError> {
        let invalid = || DateError::InvalidPeriod(text.to_string());
        let lowered = text.to_ascii_lowercase();
        let words: Vec<&str> = lowered.split_whitespace().collect();
        let mut interval = Self::default();
        let mut i = 0;

        let step = |quantum, length| Some(Duration { quantum, length });

        while i < words.len() {
            let word = words[i];
            i += 1;
            match word {
                "daily" => interval.duration = step(Quantum::Days, 1),
                "weekly" => interval.duration = step(Quantum::Weeks, 1),
                "biweekly" => interval.duration = step(Quantum::Weeks, 2),
                "monthly" => interval.duration = step(Quantum::Months, 1),
                "bimonthly" => interval.duration = step(Quantum::Months, 2),
                "quarterly" => interval.duration = step(Quantum::Quarters, 1),
                "yearly" | "annually" => interval.duration = step(Quantum::Years, 1),
                "every" => {
                    let mut length = 1;
                    let mut unit = words.get(i).copied().ok_or_else(invalid)?;
                    if let Ok(n) = unit.parse::<u32>() {
                        length = n;
                        i += 1;
                        unit = words.get(i).copied().ok_or_else(invalid)?;
                    }
                    i += 1;
                    let quantum = match unit.trim_end_matches('s') {
                        "day" => Quantum::Days,
                        "week" => Quantum::Weeks,
                        "month" => Quantum::Months,
                        "quarter" => Quantum::Quarters,
                        "year" => Quantum::Years,
                        _ => return Err(invalid()),
                    };
                    interval.duration = step(quantum, length);
                }
                "from" | "since" => {
                    let date = words.get(i).ok_or_else(invalid)?;
                    i += 1;
                    interval.start = Some(parse_date(date, ctx).map_err(|_| invalid())?);
                }
                "to" | "until" => {
                    let date = words.get(i).ok_or_else(invalid)?;
                    i += 1;
                    interval.end = Some(parse_date(date, ctx).map_err(|_| invalid())?);
                }
                "in" => {
                    let date = words.get(i).ok_or_else(invalid)?;
                    i += 1;
                    let (start, end) = whole_period(date, ctx).ok_or_else(invalid)?;
                    interval.start = Some(start);
                    interval.end = Some(end);
                }
                other => {
                    let (start, end) = whole_period(other, ctx).ok_or_else(invalid)?;
                    interval.start = Some(start);
                    interval.end = Some(end);
                }
            }
        }

        if interval.start.is_none() && interval.end.is_none() && interval.duration.is_none() {
            return Err(invalid());
        }
        Ok(interval)
    }

    /// Occurrence dates from `start` up to (excluding) `end`, at most
    /// `limit` of them.
    pub fn occurrences(&self, limit: usize) -> Vec<NaiveDate> {
        let (Some(start), Some(step)) = (self.start, self.duration) else {
            return self.start.into_iter().collect();
        };
        let mut out = Vec::new();
        let mut current = Some(start);
        while let Some(date) = current {
            if out.len() >= limit || self.end.is_some_and(|end| date >= end) {
                break;
            }
            out.push(date);
            current = step.add_to(date);
        }
        out
    }
}

/// A bare year or year/month as a half-open range.
fn whole_period(text: &str, ctx: &DateContext) -> Option<(NaiveDate, NaiveDate)> {
    if text.len() == 4 && text.bytes().all(|b| b.is_ascii_digit()) {
        let year: i32 = text.parse().ok()?;
        return Some((
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
        ));
    }
    let date = parse_date(text, ctx).ok()?;
    let parts = text.split(['/', '-', '.']).count();
    if parts == 2 && text.split(['/', '-', '.']).next().is_some_and(|y| y.len() == 4) {
        let next = date.checked_add_months(Months::new(1))?;
        return Some((date, next));
    }
    Some((date, date.succ_opt()?))
}
