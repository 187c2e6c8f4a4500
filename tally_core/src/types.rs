//! Core domain types for the habit progress engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Habits and their kinds (binary or measurable)
//! - Per-day completion values and tri-state day status
//! - Strength history points and monthly statistics

use crate::frequency::Frequency;
use crate::ledger::Ledger;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type HabitId = Uuid;

// ============================================================================
// Habit Kinds
// ============================================================================

/// Direction of a measurable target
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Value must reach at least the target (e.g. steps)
    Min,
    /// Value must stay at or below the target (e.g. cigarettes)
    Max,
}

/// Whether a habit is a yes/no check or a tracked quantity
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HabitKind {
    Binary,
    Measurable {
        unit: String,
        target_value: f64,
        target_type: TargetType,
    },
}

impl HabitKind {
    pub fn is_measurable(&self) -> bool {
        matches!(self, HabitKind::Measurable { .. })
    }
}

// ============================================================================
// Ledger Values
// ============================================================================

/// Value stored in the completions map for one date
///
/// Binary habits store `true` (done) or `false` (skipped, paired with a skip
/// key). Measurable habits store the entered amount, or `false` when skipped.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CompletionValue {
    Flag(bool),
    Amount(f64),
}

/// The three legal states of a (habit, date) pair
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DayState {
    Empty,
    Done,
    Skipped,
}

// ============================================================================
// Habit Record
// ============================================================================

/// A habit together with its ledger and cached strength
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Habit {
    pub id: HabitId,
    pub name: String,
    pub kind: HabitKind,
    pub created_at: NaiveDate,
    pub frequency: Frequency,
    #[serde(flatten)]
    pub ledger: Ledger,
    pub strength: u8,
    pub last_strength_update: NaiveDate,
    pub strength_baseline: u8,
}

impl Habit {
    /// Whether a stored value counts as a completion for this habit
    ///
    /// Measurable values are judged against the target; a binary flag on a
    /// measurable habit (legacy data) counts as done when `true`.
    pub fn meets_target(&self, value: CompletionValue) -> bool {
        match (&self.kind, value) {
            (_, CompletionValue::Flag(done)) => done,
            (HabitKind::Binary, CompletionValue::Amount(v)) => v > 0.0,
            (
                HabitKind::Measurable {
                    target_value,
                    target_type,
                    ..
                },
                CompletionValue::Amount(v),
            ) => match target_type {
                TargetType::Min => v >= *target_value,
                TargetType::Max => v <= *target_value,
            },
        }
    }

    /// DONE and meeting the target (skipped days never count)
    pub fn is_completed(&self, date: NaiveDate) -> bool {
        if self.ledger.is_skipped(date) {
            return false;
        }
        self.ledger
            .value(date)
            .is_some_and(|value| self.meets_target(value))
    }

    /// Tri-state status of a date
    pub fn day_state(&self, date: NaiveDate) -> DayState {
        self.ledger.state(date)
    }

    /// Repair a record loaded from untrusted data
    ///
    /// Clamps cached strength, drops entries dated before creation and heals
    /// the ledger. Returns whether anything changed; the cached strength is
    /// stale in that case.
    pub fn sanitize(&mut self) -> bool {
        let mut changed = false;
        if self.strength > 100 || self.strength_baseline > 100 {
            tracing::warn!(
                "Habit {} had out-of-range strength ({}, baseline {}), clamping",
                self.id,
                self.strength,
                self.strength_baseline
            );
            self.strength = self.strength.min(100);
            self.strength_baseline = self.strength_baseline.min(100);
            changed = true;
        }

        let early = self
            .ledger
            .earliest_date()
            .filter(|first| *first < self.created_at);
        if let (Some(first), Some(end)) = (early, self.created_at.pred_opt()) {
            let removed = self.ledger.take_range(first, end);
            tracing::warn!(
                "Habit {}: dropped {} entries dated before creation ({})",
                self.id,
                removed.completions.len().max(removed.skipped.len()),
                self.created_at
            );
            changed = true;
        }

        let healed = self.ledger.heal();
        if healed > 0 {
            tracing::error!("Habit {}: repaired {} ledger entries", self.id, healed);
            changed = true;
        }
        changed
    }
}

/// Input for creating a habit
#[derive(Clone, Debug)]
pub struct NewHabit {
    pub name: String,
    pub kind: HabitKind,
    pub frequency: Frequency,
    /// Defaults to today
    pub created_at: Option<NaiveDate>,
}

// ============================================================================
// Derived Views
// ============================================================================

/// One day of the strength series
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrengthPoint {
    pub date: NaiveDate,
    pub strength: u8,
}

/// Completions within one month against the frequency's goal
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonthProgress {
    pub goal: u32,
    pub completed: u32,
    pub skipped: u32,
}

impl MonthProgress {
    /// Percentage of the goal reached, capped at 100
    pub fn percent(&self) -> u8 {
        if self.goal == 0 {
            return 0;
        }
        let pct = (self.completed.min(self.goal) as f64 / self.goal as f64) * 100.0;
        pct.round() as u8
    }
}

/// Everything the front end shows for a habit
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HabitStats {
    pub strength: u8,
    pub current_streak: u32,
    pub best_streak: u32,
    pub month: MonthProgress,
}
