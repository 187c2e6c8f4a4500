//! Calendar utilities: month windows and the injectable clock.
//!
//! Everything in the engine works on whole days (`NaiveDate`). The clock is a
//! trait so tests and the CLI's `--today` flag can pin "today".

use crate::{Error, Result};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated (year, month) pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Build a month, rejecting anything chrono cannot represent
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(Error::validation(format!(
                "invalid month {:04}-{:02}",
                year, month
            )));
        }
        Ok(Self { year, month })
    }

    /// The month containing `date`
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // Validated on construction.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next()
            .first_day()
            .pred_opt()
            .unwrap_or(NaiveDate::MAX)
    }

    /// Number of days in this month (28..=31)
    pub fn len_days(&self) -> u32 {
        self.last_day().day()
    }

    /// The following month
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = Error;

    /// Parses `YYYY-MM`
    fn from_str(s: &str) -> Result<Self> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| Error::validation(format!("expected YYYY-MM, got '{}'", s)))?;
        let year = year
            .parse::<i32>()
            .map_err(|_| Error::validation(format!("invalid year in '{}'", s)))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| Error::validation(format!("invalid month in '{}'", s)))?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<YearMonth> for String {
    fn from(month: YearMonth) -> Self {
        month.to_string()
    }
}

/// Ordered list of every date in the month
pub fn days_in_month(month: YearMonth) -> Vec<NaiveDate> {
    month
        .first_day()
        .iter_days()
        .take(month.len_days() as usize)
        .collect()
}

/// Inclusive day iterator, empty when `from > to`
pub fn date_range(from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = NaiveDate> + Clone {
    from.iter_days().take_while(move |d| *d <= to)
}

/// Parse a `YYYY-MM-DD` date with a validation error on failure
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| Error::validation(format!("invalid date '{}': {}", s, e)))
}

/// Source of "today" for the engine
pub trait Clock {
    fn today(&self) -> NaiveDate;
}

/// Wall clock in the local timezone
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to one date; the date can be moved forward by tests
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub NaiveDate);

impl FixedClock {
    pub fn advance(&mut self, days: u64) {
        self.0 = self
            .0
            .checked_add_days(chrono::Days::new(days))
            .unwrap_or(self.0);
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
