//! Current and best streaks, derived from the ledger alone.
//!
//! A day extends a streak when it is DONE (meeting the target, for
//! measurable habits) or SKIPPED. Any other day ends it.

use crate::calendar::date_range;
use crate::Habit;
use chrono::NaiveDate;

/// Default bound on the backward scan of `current_streak`
pub const DEFAULT_MAX_SCAN_DAYS: u32 = 365;

fn extends_streak(habit: &Habit, date: NaiveDate) -> bool {
    habit.ledger.is_skipped(date) || habit.is_completed(date)
}

/// Length of the run ending on `today`, scanning back at most `max_scan_days`
pub fn current_streak(habit: &Habit, today: NaiveDate, max_scan_days: u32) -> u32 {
    let mut streak = 0;
    let mut date = Some(today);

    while let Some(day) = date {
        if streak >= max_scan_days {
            tracing::debug!(
                "Current streak for {} reached the {}-day scan bound",
                habit.id,
                max_scan_days
            );
            break;
        }
        if day < habit.created_at || !extends_streak(habit, day) {
            break;
        }
        streak += 1;
        date = day.pred_opt();
    }

    streak
}

/// Longest run between the earliest ledger entry and `today`
pub fn best_streak(habit: &Habit, today: NaiveDate) -> u32 {
    let Some(start) = habit.ledger.earliest_date() else {
        return 0;
    };

    let mut best = 0;
    let mut run = 0;
    for day in date_range(start, today) {
        if extends_streak(habit, day) {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}
