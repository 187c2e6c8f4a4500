//! Completion ledger: the per-habit record of what happened on each date.
//!
//! Two sparse maps keyed by date hold the record. Every date is in exactly
//! one of three states:
//!
//! | state   | completions[date]   | skipped[date] |
//! |---------|---------------------|---------------|
//! | EMPTY   | absent              | absent        |
//! | DONE    | `true` or an amount | absent        |
//! | SKIPPED | `false`             | `true`        |
//!
//! Any other combination is an invariant violation. Reads interpret a
//! violation with the skip key as authoritative; `heal` rewrites the maps.

use crate::{CompletionValue, DayState};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sparse date -> value map plus the parallel skip map
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Ledger {
    #[serde(default)]
    pub completions: BTreeMap<NaiveDate, CompletionValue>,
    #[serde(default)]
    pub skipped: BTreeMap<NaiveDate, bool>,
}

/// A date whose keys do not form one of the three legal states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Violation {
    /// skipped=true but the completion is missing or not `false`
    SkipWithoutFalse(NaiveDate),
    /// skipped=false is never written
    FalseSkipKey(NaiveDate),
    /// completion=false with no skip key
    OrphanFalse(NaiveDate),
}

impl Violation {
    pub fn date(&self) -> NaiveDate {
        match self {
            Violation::SkipWithoutFalse(d) | Violation::FalseSkipKey(d) | Violation::OrphanFalse(d) => {
                *d
            }
        }
    }
}

impl Ledger {
    pub fn is_empty(&self) -> bool {
        self.completions.is_empty() && self.skipped.is_empty()
    }

    pub fn is_skipped(&self, date: NaiveDate) -> bool {
        self.skipped.get(&date).copied().unwrap_or(false)
    }

    /// Stored completion value, ignoring skip state
    pub fn value(&self, date: NaiveDate) -> Option<CompletionValue> {
        self.completions.get(&date).copied()
    }

    /// Tri-state status of `date`
    pub fn state(&self, date: NaiveDate) -> DayState {
        if self.is_skipped(date) {
            return DayState::Skipped;
        }
        match self.completions.get(&date) {
            None | Some(CompletionValue::Flag(false)) => DayState::Empty,
            Some(CompletionValue::Flag(true)) | Some(CompletionValue::Amount(_)) => {
                DayState::Done
            }
        }
    }

    /// Advance a binary day through EMPTY -> DONE -> SKIPPED -> EMPTY
    ///
    /// Returns the new state.
    pub fn toggle(&mut self, date: NaiveDate) -> DayState {
        match self.state(date) {
            DayState::Empty => {
                self.skipped.remove(&date);
                self.completions.insert(date, CompletionValue::Flag(true));
                DayState::Done
            }
            DayState::Done => {
                self.skip(date);
                DayState::Skipped
            }
            DayState::Skipped => {
                self.clear(date);
                DayState::Empty
            }
        }
    }

    /// Record a measured amount (DONE)
    pub fn set_amount(&mut self, date: NaiveDate, amount: f64) {
        self.skipped.remove(&date);
        self.completions.insert(date, CompletionValue::Amount(amount));
    }

    /// Freeze the date as an explicit non-completion
    pub fn skip(&mut self, date: NaiveDate) {
        self.completions.insert(date, CompletionValue::Flag(false));
        self.skipped.insert(date, true);
    }

    /// Remove both keys; returns whether anything was there
    pub fn clear(&mut self, date: NaiveDate) -> bool {
        let had_value = self.completions.remove(&date).is_some();
        let had_skip = self.skipped.remove(&date).is_some();
        had_value || had_skip
    }

    /// Copy of the entries within `[start, end]`
    pub fn slice(&self, start: NaiveDate, end: NaiveDate) -> Ledger {
        Ledger {
            completions: self
                .completions
                .range(start..=end)
                .map(|(d, v)| (*d, *v))
                .collect(),
            skipped: self
                .skipped
                .range(start..=end)
                .map(|(d, v)| (*d, *v))
                .collect(),
        }
    }

    /// Remove every entry within `[start, end]` in one pass
    ///
    /// Returns the removed entries.
    pub fn take_range(&mut self, start: NaiveDate, end: NaiveDate) -> Ledger {
        let removed = self.slice(start, end);
        self.completions.retain(|d, _| *d < start || *d > end);
        self.skipped.retain(|d, _| *d < start || *d > end);
        removed
    }

    /// Replace everything within `[start, end]` with `entries`
    pub fn restore_range(&mut self, start: NaiveDate, end: NaiveDate, entries: &Ledger) {
        self.take_range(start, end);
        self.completions.extend(
            entries
                .completions
                .range(start..=end)
                .map(|(d, v)| (*d, *v)),
        );
        self.skipped
            .extend(entries.skipped.range(start..=end).map(|(d, v)| (*d, *v)));
    }

    /// Non-skipped stored values within `[start, end]`
    pub fn values_in(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Iterator<Item = (NaiveDate, CompletionValue)> + '_ {
        self.completions
            .range(start..=end)
            .filter(move |(d, _)| !self.is_skipped(**d))
            .map(|(d, v)| (*d, *v))
    }

    /// Number of SKIPPED dates within `[start, end]`
    pub fn skipped_in(&self, start: NaiveDate, end: NaiveDate) -> usize {
        self.skipped.range(start..=end).filter(|(_, s)| **s).count()
    }

    /// Earliest date carrying any key
    pub fn earliest_date(&self) -> Option<NaiveDate> {
        let first_value = self.completions.keys().next().copied();
        let first_skip = self.skipped.keys().next().copied();
        match (first_value, first_skip) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Every date whose keys break the three-state invariant
    pub fn violations(&self) -> Vec<Violation> {
        let mut found = Vec::new();
        for (date, skipped) in &self.skipped {
            if !*skipped {
                found.push(Violation::FalseSkipKey(*date));
            } else if self.completions.get(date) != Some(&CompletionValue::Flag(false)) {
                found.push(Violation::SkipWithoutFalse(*date));
            }
        }
        for (date, value) in &self.completions {
            if *value == CompletionValue::Flag(false) && !self.skipped.contains_key(date) {
                found.push(Violation::OrphanFalse(*date));
            }
        }
        found.sort_by_key(|v| v.date());
        found
    }

    /// Rewrite violating dates into legal states, skip key authoritative
    ///
    /// Returns the number of dates repaired.
    pub fn heal(&mut self) -> usize {
        let violations = self.violations();
        for violation in &violations {
            match *violation {
                Violation::SkipWithoutFalse(date) => {
                    tracing::error!(
                        "Ledger invariant violated on {}: skip without false completion",
                        date
                    );
                    self.completions.insert(date, CompletionValue::Flag(false));
                }
                Violation::FalseSkipKey(date) => {
                    tracing::error!("Ledger invariant violated on {}: skipped=false key", date);
                    self.skipped.remove(&date);
                    // A bare `false` left behind is an orphan too.
                    if self.completions.get(&date) == Some(&CompletionValue::Flag(false)) {
                        self.completions.remove(&date);
                    }
                }
                Violation::OrphanFalse(date) => {
                    tracing::error!(
                        "Ledger invariant violated on {}: false completion without skip",
                        date
                    );
                    self.completions.remove(&date);
                }
            }
        }
        violations.len()
    }
}
