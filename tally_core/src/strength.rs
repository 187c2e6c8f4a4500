//! Habit strength: an exponentially smoothed 0-100 consistency score.
//!
//! Strength is a day-indexed fold over the ledger:
//!
//! ```text
//! strength[d] = clamp(round(A * signal(d) + (1 - A) * strength[d-1]), 0, 100)
//! ```
//!
//! where `signal(d)` is 100 for a completed due day, 0 for a missed one,
//! the completed fraction of the window on the day an aggregate window
//! closes, and `strength[d-1]` (frozen) for skipped or unevaluated days.
//!
//! The habit caches the fold's value at `last_strength_update` as its
//! baseline. `recalculate_strength` resumes from that baseline when the
//! change lies after it and refolds from the start otherwise. Both paths and
//! `strength_history` run the same `StrengthReplay` iterator, so they cannot
//! disagree on the constant or the window convention.

use crate::frequency::{evaluation_on, Evaluation};
use crate::{Habit, StrengthPoint};
use chrono::NaiveDate;

/// Smoothing factor: a completion's influence halves after one week
/// (`1 - 0.5^(1/7)`)
pub const SMOOTHING: f64 = 0.094_276_335_736_093_29;

/// Strength of a habit before anything was recorded
pub const INITIAL_STRENGTH: u8 = 0;

/// One smoothing step
pub fn step(previous: u8, signal: f64) -> u8 {
    let next = SMOOTHING * signal + (1.0 - SMOOTHING) * f64::from(previous);
    next.round().clamp(0.0, 100.0) as u8
}

/// Signal for `date`, or `None` when the day is frozen
fn signal_on(habit: &Habit, date: NaiveDate) -> Option<f64> {
    if habit.ledger.is_skipped(date) {
        return None;
    }

    match evaluation_on(&habit.frequency, habit.created_at, date) {
        Evaluation::Due => Some(if habit.is_completed(date) { 100.0 } else { 0.0 }),
        Evaluation::WindowClose { start, expected } => {
            let done = habit
                .ledger
                .values_in(start, date)
                .filter(|(_, value)| habit.meets_target(*value))
                .count() as u32;
            Some(100.0 * f64::from(done.min(expected)) / f64::from(expected.max(1)))
        }
        Evaluation::NotEvaluated => None,
    }
}

/// First day of the full replay: creation, or the earliest entry if later
pub fn history_start(habit: &Habit) -> NaiveDate {
    habit
        .ledger
        .earliest_date()
        .map_or(habit.created_at, |earliest| earliest.max(habit.created_at))
}

/// Lazy day-by-day strength fold over a habit's ledger
///
/// Finite and restartable: a clone replays from wherever the original was.
#[derive(Clone, Debug)]
pub struct StrengthReplay<'a> {
    habit: &'a Habit,
    next: Option<NaiveDate>,
    end: NaiveDate,
    current: u8,
}

impl<'a> StrengthReplay<'a> {
    /// Fold `[from, to]` starting from `seed` as the value of the day before `from`
    pub fn new(habit: &'a Habit, from: NaiveDate, seed: u8, to: NaiveDate) -> Self {
        Self {
            habit,
            next: Some(from),
            end: to,
            current: seed.min(100),
        }
    }

    /// Fold the whole history up to and including `today`
    pub fn full(habit: &'a Habit, today: NaiveDate) -> Self {
        Self::new(habit, history_start(habit), INITIAL_STRENGTH, today)
    }

    /// Value of the last folded day (the seed if nothing was folded yet)
    pub fn current(&self) -> u8 {
        self.current
    }
}

impl Iterator for StrengthReplay<'_> {
    type Item = StrengthPoint;

    fn next(&mut self) -> Option<StrengthPoint> {
        let date = self.next.filter(|d| *d <= self.end)?;
        if let Some(signal) = signal_on(self.habit, date) {
            self.current = step(self.current, signal);
        }
        self.next = date.succ_opt();
        Some(StrengthPoint {
            date,
            strength: self.current,
        })
    }
}

/// Full per-day strength series up to `today`; never mutates the habit
pub fn strength_history(habit: &Habit, today: NaiveDate) -> StrengthReplay<'_> {
    StrengthReplay::full(habit, today)
}

/// Whether the cached strength matches a replay of the ledger
///
/// Holds when `strength` equals the baseline, the cache date is not before
/// creation, and folding the history up to the cache date lands on the
/// baseline.
pub fn cache_is_consistent(habit: &Habit) -> bool {
    if habit.strength != habit.strength_baseline || habit.last_strength_update < habit.created_at {
        return false;
    }
    let replayed = StrengthReplay::full(habit, habit.last_strength_update)
        .last()
        .map_or(INITIAL_STRENGTH, |p| p.strength);
    replayed == habit.strength_baseline
}

/// What `recalculate_strength` had to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recalculation {
    /// Already current, or the changed date lies in the future
    NoOp,
    /// Resumed from the cached baseline
    Incremental { days: usize },
    /// Cached baseline was stale; folded from the start
    FullReplay { days: usize },
}

/// Bring `habit.strength` up to date after a ledger change on `changed`
///
/// `changed = None` is the new-day catch-up. Running it twice on the same
/// day is a no-op.
pub fn recalculate_strength(
    habit: &mut Habit,
    changed: Option<NaiveDate>,
    today: NaiveDate,
) -> Recalculation {
    if let Some(date) = changed {
        if date > today {
            tracing::debug!("Ignoring strength recalculation for future date {}", date);
            return Recalculation::NoOp;
        }
    }

    let cached = habit.last_strength_update;
    let stale = cached > today || changed.is_some_and(|date| date <= cached);

    let (strength, result) = if stale {
        let mut replay = StrengthReplay::full(habit, today);
        let days = replay.by_ref().count();
        (replay.current(), Recalculation::FullReplay { days })
    } else {
        let (from, seed) = if cached < habit.created_at {
            (habit.created_at, INITIAL_STRENGTH)
        } else {
            match cached.succ_opt() {
                Some(next) => (next, habit.strength_baseline),
                None => return Recalculation::NoOp,
            }
        };
        if from > today {
            return Recalculation::NoOp;
        }
        let mut replay = StrengthReplay::new(habit, from, seed, today);
        let days = replay.by_ref().count();
        (replay.current(), Recalculation::Incremental { days })
    };

    tracing::debug!(
        "Strength for {} {} -> {} ({:?})",
        habit.id,
        habit.strength,
        strength,
        result
    );

    habit.strength = strength;
    habit.strength_baseline = strength;
    habit.last_strength_update = today;
    result
}
