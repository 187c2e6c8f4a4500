//! Habit engine: the state handle the front end talks to.
//!
//! The engine owns the habit arena, an id index, the clock and the pending
//! month-clear undo snapshots. Every ledger mutation goes through here so
//! that exactly one strength recalculation follows it:
//! - single-day mutations recalculate for the affected date
//! - `clear_all_for_month` and `undo_clear_all` recalculate once per batch
//! - `catch_up` runs the new-day recalculation before reads

use crate::calendar::{Clock, SystemClock, YearMonth};
use crate::frequency::monthly_goal;
use crate::state::EngineState;
use crate::strength::{self, recalculate_strength, Recalculation};
use crate::streak::{best_streak, current_streak, DEFAULT_MAX_SCAN_DAYS};
use crate::{
    Config, DayState, Error, Habit, HabitId, HabitKind, HabitStats, Ledger, MonthProgress,
    NewHabit, Result, StrengthPoint,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Engine knobs taken from the config file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub undo_window: u32,
    pub max_streak_scan_days: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            undo_window: config.ledger.undo_window.max(1),
            max_streak_scan_days: if config.streak.max_scan_days == 0 {
                DEFAULT_MAX_SCAN_DAYS
            } else {
                config.streak.max_scan_days
            },
        }
    }
}

/// Pre-clear contents of a month, kept for `undo_clear_all`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClearSnapshot {
    pub month: YearMonth,
    pub entries: Ledger,
    pub strength_before: u8,
    /// Mutations left before the snapshot is discarded
    pub remaining: u32,
}

/// Result of a single-day mutation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The day moved to this state and strength was recalculated
    Changed(DayState),
    /// Nothing to do (future date, clearing an empty day)
    NoOp,
    /// Measurable habits need a value: call `set_value` or `skip`
    ValueRequired,
}

/// Owner of all habits and the entry point for every engine operation
pub struct HabitEngine<C: Clock = SystemClock> {
    habits: Vec<Habit>,
    index: HashMap<HabitId, usize>,
    pending_undo: HashMap<HabitId, ClearSnapshot>,
    clock: C,
    settings: EngineSettings,
    caught_up_on: Option<NaiveDate>,
}

impl<C: Clock> HabitEngine<C> {
    /// Empty engine
    pub fn new(clock: C, settings: EngineSettings) -> Self {
        Self::from_state(EngineState::default(), clock, settings)
    }

    /// Engine over previously persisted habits
    ///
    /// Records are sanitized; duplicates of an id already seen are dropped.
    pub fn from_state(state: EngineState, clock: C, settings: EngineSettings) -> Self {
        let mut engine = Self {
            habits: Vec::with_capacity(state.habits.len()),
            index: HashMap::new(),
            pending_undo: HashMap::new(),
            clock,
            settings,
            caught_up_on: None,
        };

        let today = engine.today();
        for mut habit in state.habits {
            if engine.index.contains_key(&habit.id) {
                tracing::warn!("Dropping duplicate habit record {}", habit.id);
                continue;
            }
            let repaired = habit.sanitize();
            if repaired || !strength::cache_is_consistent(&habit) {
                if !repaired {
                    tracing::warn!(
                        "Habit {}: cached strength {} disagrees with its ledger, refolding",
                        habit.id,
                        habit.strength
                    );
                }
                let from = habit.created_at.min(habit.last_strength_update).min(today);
                recalculate_strength(&mut habit, Some(from), today);
            }
            engine.index.insert(habit.id, engine.habits.len());
            engine.habits.push(habit);
        }

        for (id, snapshot) in state.pending_undo {
            if engine.index.contains_key(&id) {
                engine.pending_undo.insert(id, snapshot);
            }
        }

        engine
    }

    /// Snapshot of everything that needs persisting
    pub fn to_state(&self) -> EngineState {
        EngineState {
            habits: self.habits.clone(),
            pending_undo: self
                .pending_undo
                .iter()
                .map(|(id, snapshot)| (*id, snapshot.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// All habits in creation order; strength may lag until `catch_up`
    pub fn habits(&self) -> &[Habit] {
        &self.habits
    }

    fn index_of(&self, id: HabitId) -> Result<usize> {
        self.index.get(&id).copied().ok_or(Error::HabitNotFound(id))
    }

    /// A habit with its strength brought up to today
    pub fn habit(&mut self, id: HabitId) -> Result<&Habit> {
        self.catch_up();
        let idx = self.index_of(id)?;
        Ok(&self.habits[idx])
    }

    /// Resolve a front-end reference: full id, id prefix, or name
    pub fn find(&self, query: &str) -> Result<HabitId> {
        let query = query.trim();
        if let Ok(id) = Uuid::parse_str(query) {
            return self.index_of(id).map(|_| id);
        }

        if let Some(habit) = self
            .habits
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(query))
        {
            return Ok(habit.id);
        }

        let lowered = query.to_lowercase();
        let matches: Vec<_> = self
            .habits
            .iter()
            .filter(|h| !lowered.is_empty() && h.id.to_string().starts_with(&lowered))
            .collect();
        match matches.as_slice() {
            [one] => Ok(one.id),
            [] => Err(Error::validation(format!("no habit matches '{}'", query))),
            _ => Err(Error::validation(format!(
                "'{}' matches {} habits, use more of the id",
                query,
                matches.len()
            ))),
        }
    }

    // ========================================================================
    // Habit lifecycle
    // ========================================================================

    /// Validate and store a new habit
    ///
    /// The frequency may come back clamped (e.g. 9 times a week becomes 7).
    pub fn create_habit(&mut self, new: NewHabit) -> Result<&Habit> {
        let today = self.today();

        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::validation("habit name must not be empty"));
        }
        if self
            .habits
            .iter()
            .any(|h| h.name.eq_ignore_ascii_case(&name))
        {
            return Err(Error::validation(format!("a habit named '{}' already exists", name)));
        }

        if let HabitKind::Measurable { target_value, .. } = &new.kind {
            if !target_value.is_finite() || *target_value < 0.0 {
                return Err(Error::validation(format!(
                    "target value must be a finite, non-negative number, got {}",
                    target_value
                )));
            }
        }

        let frequency = new.frequency.validate()?;

        let created_at = new.created_at.unwrap_or(today);
        if created_at > today {
            return Err(Error::validation(format!(
                "creation date {} is after today ({})",
                created_at, today
            )));
        }

        let mut habit = Habit {
            id: Uuid::new_v4(),
            name,
            kind: new.kind,
            created_at,
            frequency,
            ledger: Ledger::default(),
            strength: strength::INITIAL_STRENGTH,
            last_strength_update: created_at,
            strength_baseline: strength::INITIAL_STRENGTH,
        };
        // Backdated habits are brought current right away.
        recalculate_strength(&mut habit, None, today);

        tracing::info!(
            "Created habit {} '{}' ({})",
            habit.id,
            habit.name,
            habit.frequency
        );

        let idx = self.habits.len();
        self.index.insert(habit.id, idx);
        self.habits.push(habit);
        Ok(&self.habits[idx])
    }

    /// Remove a habit and everything attached to it
    pub fn delete_habit(&mut self, id: HabitId) -> Result<Habit> {
        let idx = self.index_of(id)?;
        let habit = self.habits.remove(idx);
        self.pending_undo.remove(&id);
        self.index = self
            .habits
            .iter()
            .enumerate()
            .map(|(i, h)| (h.id, i))
            .collect();
        tracing::info!("Deleted habit {} '{}'", habit.id, habit.name);
        Ok(habit)
    }

    // ========================================================================
    // Ledger mutations
    // ========================================================================

    /// Shared path for single-day mutations
    fn mutate<F>(&mut self, id: HabitId, date: NaiveDate, apply: F) -> Result<Outcome>
    where
        F: FnOnce(&mut Habit) -> Result<Outcome>,
    {
        self.catch_up();
        let idx = self.index_of(id)?;
        let today = self.today();

        if date > today {
            tracing::debug!("Ignoring mutation of {} on future date {}", id, date);
            return Ok(Outcome::NoOp);
        }

        let habit = &mut self.habits[idx];
        if date < habit.created_at {
            return Err(Error::validation(format!(
                "{} is before '{}' was created ({})",
                date, habit.name, habit.created_at
            )));
        }

        let outcome = apply(habit)?;
        if let Outcome::Changed(state) = outcome {
            tracing::debug!("Habit {} on {} is now {:?}", id, date, state);
            recalculate_strength(habit, Some(date), today);
            self.note_mutation(id);
        }
        Ok(outcome)
    }

    /// Count a mutation against a pending month-clear snapshot
    fn note_mutation(&mut self, id: HabitId) {
        if let Some(snapshot) = self.pending_undo.get_mut(&id) {
            snapshot.remaining = snapshot.remaining.saturating_sub(1);
            if snapshot.remaining == 0 {
                tracing::debug!("Undo for {} {} expired", id, snapshot.month);
                self.pending_undo.remove(&id);
            }
        }
    }

    /// Cycle a binary day EMPTY -> DONE -> SKIPPED -> EMPTY
    ///
    /// Measurable habits answer `ValueRequired` without changing anything.
    pub fn toggle(&mut self, id: HabitId, date: NaiveDate) -> Result<Outcome> {
        self.mutate(id, date, |habit| match habit.kind {
            HabitKind::Binary => Ok(Outcome::Changed(habit.ledger.toggle(date))),
            HabitKind::Measurable { .. } => Ok(Outcome::ValueRequired),
        })
    }

    /// Record the measured amount for a measurable habit
    pub fn set_value(&mut self, id: HabitId, date: NaiveDate, value: f64) -> Result<Outcome> {
        if !value.is_finite() || value < 0.0 {
            return Err(Error::validation(format!(
                "value must be a finite, non-negative number, got {}",
                value
            )));
        }

        self.mutate(id, date, |habit| {
            if !habit.kind.is_measurable() {
                return Err(Error::validation(format!(
                    "'{}' is not measurable; use toggle",
                    habit.name
                )));
            }
            habit.ledger.set_amount(date, value);
            Ok(Outcome::Changed(DayState::Done))
        })
    }

    /// Freeze a day: no reward, no penalty, streak kept
    pub fn skip(&mut self, id: HabitId, date: NaiveDate) -> Result<Outcome> {
        self.mutate(id, date, |habit| {
            if habit.ledger.state(date) == DayState::Skipped {
                return Ok(Outcome::NoOp);
            }
            habit.ledger.skip(date);
            Ok(Outcome::Changed(DayState::Skipped))
        })
    }

    /// Return a day to EMPTY
    pub fn clear(&mut self, id: HabitId, date: NaiveDate) -> Result<Outcome> {
        self.mutate(id, date, |habit| {
            Ok(if habit.ledger.clear(date) {
                Outcome::Changed(DayState::Empty)
            } else {
                Outcome::NoOp
            })
        })
    }

    /// Empty a whole month in one batch, keeping a snapshot for undo
    ///
    /// Returns the number of dates cleared. A newer clear replaces an older
    /// snapshot; nothing cleared leaves any existing snapshot alone.
    pub fn clear_all_for_month(&mut self, id: HabitId, month: YearMonth) -> Result<usize> {
        self.catch_up();
        let idx = self.index_of(id)?;
        let today = self.today();
        let (start, end) = (month.first_day(), month.last_day());

        if start > today {
            tracing::debug!("Ignoring clear of future month {} for {}", month, id);
            return Ok(0);
        }

        let habit = &mut self.habits[idx];
        let strength_before = habit.strength;
        let removed = habit.ledger.take_range(start, end);
        let cleared = distinct_dates(&removed);
        if cleared == 0 {
            return Ok(0);
        }

        recalculate_strength(habit, Some(start), today);
        tracing::info!(
            "Cleared {} days of '{}' in {} (strength {} -> {})",
            cleared,
            habit.name,
            month,
            strength_before,
            habit.strength
        );

        self.pending_undo.insert(
            id,
            ClearSnapshot {
                month,
                entries: removed,
                strength_before,
                remaining: self.settings.undo_window,
            },
        );
        Ok(cleared)
    }

    /// Whether `undo_clear_all` would succeed
    pub fn can_undo(&self, id: HabitId) -> bool {
        self.pending_undo.contains_key(&id)
    }

    /// Put back the month removed by the last `clear_all_for_month`
    ///
    /// Returns the number of dates restored.
    pub fn undo_clear_all(&mut self, id: HabitId) -> Result<usize> {
        self.catch_up();
        let idx = self.index_of(id)?;
        let snapshot = self
            .pending_undo
            .remove(&id)
            .ok_or(Error::NothingToUndo(id))?;
        let today = self.today();
        let (start, end) = (snapshot.month.first_day(), snapshot.month.last_day());

        let habit = &mut self.habits[idx];
        habit.ledger.restore_range(start, end, &snapshot.entries);
        recalculate_strength(habit, Some(start.min(today)), today);

        if habit.strength != snapshot.strength_before {
            tracing::debug!(
                "Undo for '{}' restored strength {} (was {} before the clear)",
                habit.name,
                habit.strength,
                snapshot.strength_before
            );
        }
        tracing::info!("Restored {} of '{}'", snapshot.month, habit.name);
        Ok(distinct_dates(&snapshot.entries))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// New-day recalculation for every habit that is behind
    ///
    /// Cheap to call repeatedly: the scan runs once per day.
    pub fn catch_up(&mut self) -> usize {
        let today = self.today();
        if self.caught_up_on == Some(today) {
            return 0;
        }

        let mut updated = 0;
        for habit in &mut self.habits {
            if habit.last_strength_update == today {
                continue;
            }
            if recalculate_strength(habit, None, today) != Recalculation::NoOp {
                updated += 1;
            }
        }

        self.caught_up_on = Some(today);
        if updated > 0 {
            tracing::info!("Caught up strength for {} habits on {}", updated, today);
        }
        updated
    }

    pub fn current_streak(&mut self, id: HabitId) -> Result<u32> {
        let today = self.today();
        let max_scan = self.settings.max_streak_scan_days;
        let habit = self.habit(id)?;
        Ok(current_streak(habit, today, max_scan))
    }

    pub fn best_streak(&mut self, id: HabitId) -> Result<u32> {
        let today = self.today();
        let habit = self.habit(id)?;
        Ok(best_streak(habit, today))
    }

    /// Per-day strength series, recomputed on every call
    pub fn strength_history(&mut self, id: HabitId) -> Result<Vec<StrengthPoint>> {
        let today = self.today();
        let habit = self.habit(id)?;
        Ok(strength::strength_history(habit, today).collect())
    }

    /// Completed and skipped days in `month` against the monthly goal
    pub fn month_progress(&mut self, id: HabitId, month: YearMonth) -> Result<MonthProgress> {
        let habit = self.habit(id)?;
        Ok(month_progress(habit, month))
    }

    /// Strength, streaks and month progress in one call
    pub fn stats(&mut self, id: HabitId, month: YearMonth) -> Result<HabitStats> {
        let today = self.today();
        let max_scan = self.settings.max_streak_scan_days;
        let habit = self.habit(id)?;
        Ok(HabitStats {
            strength: habit.strength,
            current_streak: current_streak(habit, today, max_scan),
            best_streak: best_streak(habit, today),
            month: month_progress(habit, month),
        })
    }
}

impl HabitEngine<SystemClock> {
    /// Engine on the wall clock with settings from `config`
    pub fn with_config(state: EngineState, config: &Config) -> Self {
        Self::from_state(state, SystemClock, EngineSettings::from(config))
    }
}

fn distinct_dates(ledger: &Ledger) -> usize {
    ledger
        .completions
        .keys()
        .chain(ledger.skipped.keys())
        .collect::<std::collections::BTreeSet<_>>()
        .len()
}

/// Month progress for a single habit
pub fn month_progress(habit: &Habit, month: YearMonth) -> MonthProgress {
    let (start, end) = (month.first_day(), month.last_day());
    let completed = habit
        .ledger
        .values_in(start, end)
        .filter(|(_, value)| habit.meets_target(*value))
        .count() as u32;
    MonthProgress {
        goal: monthly_goal(&habit.frequency, habit.created_at, month),
        completed,
        skipped: habit.ledger.skipped_in(start, end) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::FixedClock;
    use crate::{Frequency, TargetType};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn engine_on(today: NaiveDate) -> HabitEngine<FixedClock> {
        crate::logging::init_test();
        HabitEngine::new(FixedClock(today), EngineSettings::default())
    }

    fn binary(name: &str, frequency: Frequency, created_at: NaiveDate) -> NewHabit {
        NewHabit {
            name: name.into(),
            kind: HabitKind::Binary,
            frequency,
            created_at: Some(created_at),
        }
    }

    fn add_daily(engine: &mut HabitEngine<FixedClock>, created_at: NaiveDate) -> HabitId {
        engine
            .create_habit(binary("read", Frequency::Daily, created_at))
            .unwrap()
            .id
    }

    fn assert_consistent(engine: &mut HabitEngine<FixedClock>, id: HabitId) {
        let strength = engine.habit(id).unwrap().strength;
        let history = engine.strength_history(id).unwrap();
        let last = history.last().map_or(strength::INITIAL_STRENGTH, |p| p.strength);
        assert_eq!(last, strength);
        assert!(strength <= 100);
    }

    #[test]
    fn test_create_habit_defaults() {
        let today = date(2025, 1, 10);
        let mut engine = engine_on(today);
        let habit = engine
            .create_habit(NewHabit {
                name: "  stretch ".into(),
                kind: HabitKind::Binary,
                frequency: Frequency::Daily,
                created_at: None,
            })
            .unwrap();
        assert_eq!(habit.name, "stretch");
        assert_eq!(habit.created_at, today);
        assert_eq!(habit.strength, 0);
        assert_eq!(habit.strength_baseline, 0);
        assert_eq!(habit.last_strength_update, today);
        assert!(habit.ledger.is_empty());
    }

    #[test]
    fn test_create_habit_validation() {
        let today = date(2025, 1, 10);
        let mut engine = engine_on(today);

        let err = engine
            .create_habit(binary("x", Frequency::TimesPerWeek { count: 0 }, today))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert!(engine
            .create_habit(binary(" ", Frequency::Daily, today))
            .is_err());
        assert!(engine
            .create_habit(binary("late", Frequency::Daily, date(2025, 1, 11)))
            .is_err());
        assert!(engine
            .create_habit(NewHabit {
                name: "water".into(),
                kind: HabitKind::Measurable {
                    unit: "ml".into(),
                    target_value: f64::NAN,
                    target_type: TargetType::Min,
                },
                frequency: Frequency::Daily,
                created_at: None,
            })
            .is_err());

        engine
            .create_habit(binary("read", Frequency::Daily, today))
            .unwrap();
        assert!(engine
            .create_habit(binary("READ", Frequency::Daily, today))
            .is_err());
        assert_eq!(engine.habits().len(), 1);
    }

    #[test]
    fn test_create_habit_returns_clamped_frequency() {
        let today = date(2025, 1, 10);
        let mut engine = engine_on(today);
        let habit = engine
            .create_habit(binary("gym", Frequency::TimesPerWeek { count: 12 }, today))
            .unwrap();
        assert_eq!(habit.frequency, Frequency::TimesPerWeek { count: 7 });
    }

    #[test]
    fn test_toggle_three_times_returns_to_empty() {
        let today = date(2025, 1, 10);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, date(2025, 1, 1));
        engine.toggle(id, date(2025, 1, 3)).unwrap();
        let before = engine.habit(id).unwrap().clone();

        let d = date(2025, 1, 8);
        assert_eq!(engine.toggle(id, d).unwrap(), Outcome::Changed(DayState::Done));
        assert_eq!(
            engine.toggle(id, d).unwrap(),
            Outcome::Changed(DayState::Skipped)
        );
        assert_eq!(engine.toggle(id, d).unwrap(), Outcome::Changed(DayState::Empty));

        assert_eq!(engine.habit(id).unwrap(), &before);
    }

    #[test]
    fn test_future_and_pre_creation_dates() {
        let today = date(2025, 1, 10);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, date(2025, 1, 5));
        let before = engine.habit(id).unwrap().clone();

        assert_eq!(engine.toggle(id, date(2025, 1, 11)).unwrap(), Outcome::NoOp);
        assert_eq!(engine.skip(id, date(2025, 2, 1)).unwrap(), Outcome::NoOp);
        assert_eq!(engine.habit(id).unwrap(), &before);

        let err = engine.toggle(id, date(2025, 1, 4)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_unknown_habit() {
        let mut engine = engine_on(date(2025, 1, 10));
        let id = Uuid::new_v4();
        assert!(matches!(
            engine.toggle(id, date(2025, 1, 10)),
            Err(Error::HabitNotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn test_streak_scenario() {
        let mut engine = engine_on(date(2025, 1, 7));
        let id = add_daily(&mut engine, date(2025, 1, 1));
        for d in 1..=5 {
            engine.toggle(id, date(2025, 1, d)).unwrap();
        }
        engine.skip(id, date(2025, 1, 6)).unwrap();

        assert_eq!(engine.habit(id).unwrap().day_state(date(2025, 1, 7)), DayState::Empty);
        assert_eq!(engine.current_streak(id).unwrap(), 0);
        assert_eq!(engine.best_streak(id).unwrap(), 6);
        assert_eq!(engine.habit(id).unwrap().strength, 35);
        assert_consistent(&mut engine, id);
    }

    #[test]
    fn test_measurable_set_value() {
        let today = date(2025, 3, 3);
        let mut engine = engine_on(today);
        let id = engine
            .create_habit(NewHabit {
                name: "water".into(),
                kind: HabitKind::Measurable {
                    unit: "ml".into(),
                    target_value: 2000.0,
                    target_type: TargetType::Min,
                },
                frequency: Frequency::Daily,
                created_at: Some(date(2025, 3, 1)),
            })
            .unwrap()
            .id;

        assert_eq!(engine.toggle(id, today).unwrap(), Outcome::ValueRequired);
        assert_eq!(
            engine.set_value(id, today, 2500.0).unwrap(),
            Outcome::Changed(DayState::Done)
        );
        let habit = engine.habit(id).unwrap();
        assert!(habit.is_completed(today));
        assert_eq!(habit.strength, 9);

        assert!(engine.set_value(id, today, -1.0).is_err());
        assert!(engine.set_value(id, today, f64::INFINITY).is_err());
        assert_consistent(&mut engine, id);
    }

    #[test]
    fn test_set_value_rejected_for_binary() {
        let today = date(2025, 3, 3);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, today);
        assert!(matches!(
            engine.set_value(id, today, 1.0),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_rejected_set_value_still_catches_up() {
        let mut engine = engine_on(date(2025, 3, 3));
        let id = add_daily(&mut engine, date(2025, 3, 1));
        engine.clock_mut().advance(1);

        assert!(engine.set_value(id, date(2025, 3, 4), 1.0).is_err());
        // Read without the accessor's own catch-up.
        let habit = &engine.habits()[0];
        assert_eq!(habit.last_strength_update, date(2025, 3, 4));
        assert_eq!(habit.ledger.state(date(2025, 3, 4)), DayState::Empty);
    }

    #[test]
    fn test_skip_and_clear_noops() {
        let today = date(2025, 3, 3);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, today);

        assert_eq!(engine.clear(id, today).unwrap(), Outcome::NoOp);
        assert_eq!(
            engine.skip(id, today).unwrap(),
            Outcome::Changed(DayState::Skipped)
        );
        assert_eq!(engine.skip(id, today).unwrap(), Outcome::NoOp);
        assert_eq!(
            engine.clear(id, today).unwrap(),
            Outcome::Changed(DayState::Empty)
        );
    }

    #[test]
    fn test_clear_month_then_undo_restores_everything() {
        let today = date(2025, 2, 20);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, date(2025, 1, 1));
        for d in [3, 4, 5, 9, 10] {
            engine.toggle(id, date(2025, 1, d)).unwrap();
        }
        for d in 1..=18 {
            engine.toggle(id, date(2025, 2, d)).unwrap();
        }
        engine.skip(id, date(2025, 2, 19)).unwrap();

        let before = engine.habit(id).unwrap().clone();
        assert!(before.strength > 0);

        let feb = YearMonth::new(2025, 2).unwrap();
        assert_eq!(engine.clear_all_for_month(id, feb).unwrap(), 19);
        {
            let cleared = engine.habit(id).unwrap();
            assert!(cleared.ledger.slice(feb.first_day(), feb.last_day()).is_empty());
            assert_eq!(cleared.ledger.completions.len(), 5);
            assert!(cleared.strength < before.strength);
        }
        assert_consistent(&mut engine, id);
        assert!(engine.can_undo(id));

        assert_eq!(engine.undo_clear_all(id).unwrap(), 19);
        let restored = engine.habit(id).unwrap();
        assert_eq!(restored.ledger, before.ledger);
        assert_eq!(restored.strength, before.strength);
        assert!(!engine.can_undo(id));
        assert!(matches!(
            engine.undo_clear_all(id),
            Err(Error::NothingToUndo(_))
        ));
    }

    #[test]
    fn test_clear_month_recalculates_once() {
        let today = date(2025, 2, 20);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, date(2025, 2, 1));
        for d in 1..=10 {
            engine.toggle(id, date(2025, 2, d)).unwrap();
        }
        let feb = YearMonth::new(2025, 2).unwrap();
        engine.clear_all_for_month(id, feb).unwrap();
        // The whole batch is one mutation: the fresh snapshot has its full window.
        let state = engine.to_state();
        assert_eq!(state.pending_undo[&id].remaining, 5);
        assert_eq!(state.pending_undo[&id].entries.completions.len(), 10);
    }

    #[test]
    fn test_undo_expires_after_window() {
        let today = date(2025, 2, 20);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, date(2025, 2, 1));
        engine.toggle(id, date(2025, 2, 2)).unwrap();
        let feb = YearMonth::new(2025, 2).unwrap();
        engine.clear_all_for_month(id, feb).unwrap();

        for d in 10..14 {
            engine.toggle(id, date(2025, 2, d)).unwrap();
        }
        assert!(engine.can_undo(id));
        // A no-op does not count.
        engine.clear(id, date(2025, 2, 15)).unwrap();
        assert!(engine.can_undo(id));
        engine.toggle(id, date(2025, 2, 14)).unwrap();
        assert!(!engine.can_undo(id));
    }

    #[test]
    fn test_undo_replaces_later_writes_in_month() {
        let today = date(2025, 2, 20);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, date(2025, 2, 1));
        engine.toggle(id, date(2025, 2, 2)).unwrap();
        let before = engine.habit(id).unwrap().clone();

        let feb = YearMonth::new(2025, 2).unwrap();
        engine.clear_all_for_month(id, feb).unwrap();
        engine.toggle(id, date(2025, 2, 9)).unwrap();
        engine.undo_clear_all(id).unwrap();

        let habit = engine.habit(id).unwrap();
        assert_eq!(habit.ledger, before.ledger);
        assert_eq!(habit.strength, before.strength);
    }

    #[test]
    fn test_clear_empty_or_future_month_is_noop() {
        let today = date(2025, 2, 20);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, date(2025, 1, 1));
        engine.toggle(id, date(2025, 2, 2)).unwrap();
        engine
            .clear_all_for_month(id, YearMonth::new(2025, 2).unwrap())
            .unwrap();

        assert_eq!(
            engine
                .clear_all_for_month(id, YearMonth::new(2025, 1).unwrap())
                .unwrap(),
            0
        );
        assert_eq!(
            engine
                .clear_all_for_month(id, YearMonth::new(2025, 3).unwrap())
                .unwrap(),
            0
        );
        // The February snapshot survives both no-ops.
        assert!(engine.can_undo(id));
    }

    #[test]
    fn test_catch_up_on_new_day() {
        let mut engine = engine_on(date(2025, 1, 5));
        let id = add_daily(&mut engine, date(2025, 1, 1));
        for d in 1..=5 {
            engine.toggle(id, date(2025, 1, d)).unwrap();
        }
        assert_eq!(engine.habit(id).unwrap().strength, 39);

        engine.clock_mut().advance(2);
        assert_eq!(engine.catch_up(), 1);
        assert_eq!(engine.catch_up(), 0);

        let habit = engine.habit(id).unwrap();
        assert_eq!(habit.last_strength_update, date(2025, 1, 7));
        assert_eq!(habit.strength_baseline, habit.strength);
        // Two missed days: 39 -> 35 -> 32
        assert_eq!(habit.strength, 32);
        assert_consistent(&mut engine, id);
    }

    #[test]
    fn test_reads_catch_up_first() {
        let mut engine = engine_on(date(2025, 1, 5));
        let id = add_daily(&mut engine, date(2025, 1, 1));
        engine.toggle(id, date(2025, 1, 5)).unwrap();
        engine.clock_mut().advance(1);

        let stats = engine
            .stats(id, YearMonth::new(2025, 1).unwrap())
            .unwrap();
        assert_eq!(stats.strength, 8);
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.best_streak, 1);
        assert_eq!(
            stats.month,
            MonthProgress {
                goal: 31,
                completed: 1,
                skipped: 0
            }
        );
    }

    #[test]
    fn test_backdated_habit_is_current_at_creation() {
        let mut engine = engine_on(date(2025, 1, 20));
        let habit = engine
            .create_habit(binary("walk", Frequency::Daily, date(2025, 1, 1)))
            .unwrap();
        assert_eq!(habit.last_strength_update, date(2025, 1, 20));
    }

    #[test]
    fn test_consistency_under_mixed_operations() {
        let start = date(2025, 1, 1);
        let mut engine = engine_on(start);
        let daily = add_daily(&mut engine, start);
        let weekly = engine
            .create_habit(binary("gym", Frequency::TimesPerWeek { count: 3 }, start))
            .unwrap()
            .id;

        let mut seed: u32 = 3;
        for _ in 0..150 {
            let today = engine.today();
            for id in [daily, weekly] {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                let back = u64::from((seed >> 8) % 20);
                let day = today
                    .checked_sub_days(chrono::Days::new(back))
                    .unwrap()
                    .max(start);
                match (seed >> 16) % 7 {
                    0 | 1 | 2 => {
                        engine.toggle(id, day).unwrap();
                    }
                    3 => {
                        engine.skip(id, day).unwrap();
                    }
                    4 => {
                        engine.clear(id, day).unwrap();
                    }
                    5 => {
                        engine.clear_all_for_month(id, YearMonth::of(day)).unwrap();
                    }
                    _ => {
                        let _ = engine.undo_clear_all(id);
                    }
                }
                assert_consistent(&mut engine, id);
                let habit = engine.habit(id).unwrap();
                assert!(habit.ledger.violations().is_empty());
                assert!(engine.current_streak(id).unwrap() <= engine.best_streak(id).unwrap());
            }
            engine.clock_mut().advance(1);
        }
    }

    #[test]
    fn test_delete_habit_is_total() {
        let today = date(2025, 2, 20);
        let mut engine = engine_on(today);
        let a = add_daily(&mut engine, today);
        let b = engine
            .create_habit(binary("walk", Frequency::Daily, today))
            .unwrap()
            .id;
        engine.toggle(a, today).unwrap();
        engine
            .clear_all_for_month(a, YearMonth::of(today))
            .unwrap();

        let removed = engine.delete_habit(a).unwrap();
        assert_eq!(removed.id, a);
        assert!(engine.habit(a).is_err());
        assert!(!engine.can_undo(a));
        assert_eq!(engine.habit(b).unwrap().name, "walk");
        assert!(engine.to_state().pending_undo.is_empty());
    }

    #[test]
    fn test_find_by_name_and_prefix() {
        let today = date(2025, 2, 20);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, today);

        assert_eq!(engine.find("READ").unwrap(), id);
        assert_eq!(engine.find(&id.to_string()).unwrap(), id);
        assert_eq!(engine.find(&id.to_string()[..8]).unwrap(), id);
        assert!(engine.find("nope").is_err());
    }

    #[test]
    fn test_from_state_sanitizes_records() {
        let today = date(2025, 2, 20);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, date(2025, 2, 1));
        engine.toggle(id, date(2025, 2, 3)).unwrap();

        let mut state = engine.to_state();
        let habit = &mut state.habits[0];
        habit.strength = 180;
        habit
            .ledger
            .completions
            .insert(date(2025, 2, 4), crate::CompletionValue::Flag(true));
        habit.ledger.skipped.insert(date(2025, 2, 4), true);
        let duplicate = state.habits[0].clone();
        state.habits.push(duplicate);

        let mut reloaded = HabitEngine::from_state(state, FixedClock(today), EngineSettings::default());
        assert_eq!(reloaded.habits().len(), 1);
        let habit = reloaded.habit(id).unwrap();
        assert!(habit.ledger.violations().is_empty());
        assert_eq!(habit.day_state(date(2025, 2, 4)), DayState::Skipped);
        // Repaired records are refolded, not just clamped.
        assert_consistent(&mut reloaded, id);
    }

    #[test]
    fn test_from_state_refolds_stale_in_range_strength() {
        let today = date(2025, 2, 20);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, today);

        let mut state = engine.to_state();
        state.habits[0].strength = 50;
        state.habits[0].strength_baseline = 50;

        let mut reloaded =
            HabitEngine::from_state(state, FixedClock(today), EngineSettings::default());
        assert_eq!(reloaded.habit(id).unwrap().strength, 0);
        assert_consistent(&mut reloaded, id);
    }

    #[test]
    fn test_from_state_refolds_split_cache() {
        let today = date(2025, 2, 20);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, date(2025, 2, 1));
        for d in 1..=10 {
            engine.toggle(id, date(2025, 2, d)).unwrap();
        }
        let expected = engine.habit(id).unwrap().strength;

        let mut state = engine.to_state();
        state.habits[0].strength = expected.saturating_sub(3);

        let mut reloaded =
            HabitEngine::from_state(state, FixedClock(today), EngineSettings::default());
        assert_eq!(reloaded.habit(id).unwrap().strength, expected);
        assert_consistent(&mut reloaded, id);
    }

    #[test]
    fn test_from_state_drops_entries_before_creation() {
        let today = date(2025, 2, 20);
        let mut engine = engine_on(today);
        let id = add_daily(&mut engine, date(2025, 2, 10));
        engine.toggle(id, date(2025, 2, 12)).unwrap();

        let mut state = engine.to_state();
        state.habits[0].ledger.toggle(date(2025, 2, 1));
        state.habits[0].ledger.skip(date(2025, 2, 2));

        let mut reloaded =
            HabitEngine::from_state(state, FixedClock(today), EngineSettings::default());
        let habit = reloaded.habit(id).unwrap();
        assert_eq!(habit.ledger.earliest_date(), Some(date(2025, 2, 12)));
        assert_consistent(&mut reloaded, id);
    }
}
