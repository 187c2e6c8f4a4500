//! Recurrence rules and the pure functions evaluated on them.
//!
//! A `Frequency` never looks at a ledger. It answers two questions for a
//! given anchor (the habit's creation date):
//! - is a habit due on a specific date (`is_due_on`)
//! - how many completions a month should hold (`monthly_goal`)
//!
//! The strength engine additionally asks `evaluation_on`, which exposes the
//! window convention for aggregate rules:
//! - weekly rules use ISO weeks (Monday start) and close on Sunday
//! - monthly rules close on the last day of the month
//! - "N times in M days" windows are anchored at the creation date
//!
//! Windows that began before the anchor are clipped to it, and the expected
//! count is clamped to the number of active days in the clipped window.

use crate::calendar::{days_in_month, YearMonth};
use crate::{Error, Result};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAX_PER_WEEK: u32 = 7;
const MAX_PER_MONTH: u32 = 31;

/// How often a habit is expected to be performed
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frequency {
    /// Every day
    Daily,
    /// Every `period` days counted from the creation date
    EveryNDays { period: u32 },
    /// `count` completions in each Monday-start week
    TimesPerWeek { count: u32 },
    /// `count` completions in each calendar month
    TimesPerMonth { count: u32 },
    /// `count` completions in each `period`-day window
    TimesInDays { count: u32, period: u32 },
    /// On the listed weekdays
    DaysOfWeek { days: Vec<Weekday> },
}

/// How the strength engine should score one date
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Evaluation {
    /// The date is individually due: completed or not
    Due,
    /// An aggregate window ends on this date
    WindowClose { start: NaiveDate, expected: u32 },
    /// Nothing is judged on this date
    NotEvaluated,
}

impl Frequency {
    /// Check caller input, clamping where a sane maximum exists
    ///
    /// Returns the (possibly clamped) frequency to store.
    pub fn validate(&self) -> Result<Frequency> {
        let validated = match self {
            Frequency::Daily => Frequency::Daily,
            Frequency::EveryNDays { period } => {
                require_positive("period", *period)?;
                Frequency::EveryNDays { period: *period }
            }
            Frequency::TimesPerWeek { count } => {
                require_positive("count", *count)?;
                Frequency::TimesPerWeek {
                    count: (*count).min(MAX_PER_WEEK),
                }
            }
            Frequency::TimesPerMonth { count } => {
                require_positive("count", *count)?;
                Frequency::TimesPerMonth {
                    count: (*count).min(MAX_PER_MONTH),
                }
            }
            Frequency::TimesInDays { count, period } => {
                require_positive("count", *count)?;
                require_positive("period", *period)?;
                Frequency::TimesInDays {
                    count: (*count).min(*period),
                    period: *period,
                }
            }
            Frequency::DaysOfWeek { days } => {
                if days.is_empty() {
                    return Err(Error::validation("at least one weekday is required"));
                }
                let mut days = days.clone();
                days.sort_by_key(|d| d.num_days_from_monday());
                days.dedup();
                Frequency::DaysOfWeek { days }
            }
        };

        if &validated != self {
            tracing::info!("Normalized frequency {} to {}", self, validated);
        }
        Ok(validated)
    }
}

fn require_positive(field: &str, value: u32) -> Result<()> {
    if value == 0 {
        return Err(Error::validation(format!("{} must be greater than zero", field)));
    }
    Ok(())
}

/// Days from `anchor` to `date` (negative before the anchor)
fn offset(anchor: NaiveDate, date: NaiveDate) -> i64 {
    (date - anchor).num_days()
}

/// Whether the habit is due on `date`
///
/// Aggregate rules are never due on an individual date. Dates before the
/// anchor are never due.
pub fn is_due_on(frequency: &Frequency, anchor: NaiveDate, date: NaiveDate) -> bool {
    matches!(evaluation_on(frequency, anchor, date), Evaluation::Due)
}

/// How `date` contributes to strength for this frequency
pub fn evaluation_on(frequency: &Frequency, anchor: NaiveDate, date: NaiveDate) -> Evaluation {
    if date < anchor {
        return Evaluation::NotEvaluated;
    }

    match frequency {
        Frequency::Daily => Evaluation::Due,
        Frequency::DaysOfWeek { days } => {
            if days.contains(&date.weekday()) {
                Evaluation::Due
            } else {
                Evaluation::NotEvaluated
            }
        }
        Frequency::EveryNDays { period } => {
            if offset(anchor, date) % i64::from((*period).max(1)) == 0 {
                Evaluation::Due
            } else {
                Evaluation::NotEvaluated
            }
        }
        Frequency::TimesPerWeek { count } => {
            if date.weekday() != Weekday::Sun {
                return Evaluation::NotEvaluated;
            }
            let week_start = date - chrono::Duration::days(6);
            window_close(anchor, week_start, date, *count)
        }
        Frequency::TimesPerMonth { count } => {
            let month = YearMonth::of(date);
            if date != month.last_day() {
                return Evaluation::NotEvaluated;
            }
            window_close(anchor, month.first_day(), date, *count)
        }
        Frequency::TimesInDays { count, period } => {
            let period = i64::from((*period).max(1));
            if (offset(anchor, date) + 1) % period != 0 {
                return Evaluation::NotEvaluated;
            }
            let window_start = date - chrono::Duration::days(period - 1);
            window_close(anchor, window_start, date, *count)
        }
    }
}

fn window_close(anchor: NaiveDate, start: NaiveDate, end: NaiveDate, count: u32) -> Evaluation {
    let start = start.max(anchor);
    let active_days = (offset(start, end) + 1).max(1) as u32;
    Evaluation::WindowClose {
        start,
        expected: count.max(1).min(active_days),
    }
}

/// Number of Monday-start weeks that overlap `month`, partial weeks included
pub fn weeks_overlapping(month: YearMonth) -> u32 {
    let lead = month.first_day().weekday().num_days_from_monday();
    (lead + month.len_days() + 6) / 7
}

/// Total completions expected within `month`
pub fn monthly_goal(frequency: &Frequency, anchor: NaiveDate, month: YearMonth) -> u32 {
    let days = month.len_days();
    match frequency {
        Frequency::Daily => days,
        Frequency::DaysOfWeek { days: weekdays } => days_in_month(month)
            .into_iter()
            .filter(|d| weekdays.contains(&d.weekday()))
            .count() as u32,
        Frequency::TimesPerWeek { count } => count * weeks_overlapping(month),
        Frequency::TimesPerMonth { count } => (*count).min(days),
        Frequency::EveryNDays { .. } => days_in_month(month)
            .into_iter()
            .filter(|d| is_due_on(frequency, anchor, *d))
            .count() as u32,
        Frequency::TimesInDays { count, period } => {
            let period = (*period).max(1);
            let full_windows = days / period;
            let remainder = days % period;
            let partial = (f64::from(*count) * f64::from(remainder) / f64::from(period)).round()
                as u32;
            count * full_windows + partial.min(*count)
        }
    }
}

// ============================================================================
// Text Form
// ============================================================================

fn weekday_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::EveryNDays { period } => write!(f, "every:{}", period),
            Frequency::TimesPerWeek { count } => write!(f, "weekly:{}", count),
            Frequency::TimesPerMonth { count } => write!(f, "monthly:{}", count),
            Frequency::TimesInDays { count, period } => write!(f, "window:{}/{}", count, period),
            Frequency::DaysOfWeek { days } => {
                let tokens: Vec<_> = days.iter().map(|d| weekday_token(*d)).collect();
                write!(f, "days:{}", tokens.join(","))
            }
        }
    }
}

fn parse_number(field: &str, raw: &str) -> Result<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| Error::validation(format!("{} must be a whole number, got '{}'", field, raw)))
}

impl FromStr for Frequency {
    type Err = Error;

    /// Parses `daily`, `every:N`, `weekly:N`, `monthly:N`, `window:N/M`
    /// and `days:mon,wed,fri`. The result is not yet validated.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s.as_str(), None),
        };

        let frequency = match (kind, arg) {
            ("daily", None) => Frequency::Daily,
            ("every", Some(n)) => Frequency::EveryNDays {
                period: parse_number("period", n)?,
            },
            ("weekly", Some(n)) => Frequency::TimesPerWeek {
                count: parse_number("count", n)?,
            },
            ("monthly", Some(n)) => Frequency::TimesPerMonth {
                count: parse_number("count", n)?,
            },
            ("window", Some(rest)) => {
                let (count, period) = rest.split_once('/').ok_or_else(|| {
                    Error::validation(format!("expected window:COUNT/DAYS, got '{}'", s))
                })?;
                Frequency::TimesInDays {
                    count: parse_number("count", count)?,
                    period: parse_number("period", period)?,
                }
            }
            ("days", Some(list)) => {
                let days = list
                    .split(',')
                    .filter(|t| !t.trim().is_empty())
                    .map(|t| {
                        t.trim()
                            .parse::<Weekday>()
                            .map_err(|_| Error::validation(format!("unknown weekday '{}'", t)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Frequency::DaysOfWeek { days }
            }
            _ => {
                return Err(Error::validation(format!(
                    "unknown frequency '{}' (try daily, every:N, weekly:N, monthly:N, window:N/M, days:mon,wed)",
                    s
                )))
            }
        };
        Ok(frequency)
    }
}
