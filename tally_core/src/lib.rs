#![forbid(unsafe_code)]

//! Core domain model and business logic for Tally, a habit progress engine.
//!
//! This crate provides:
//! - Domain types (habits, frequencies, the completion ledger)
//! - Strength scoring and streaks
//! - The `HabitEngine` state handle
//! - Persistence (state file, CSV export) and configuration

pub mod types;
pub mod error;
pub mod calendar;
pub mod frequency;
pub mod ledger;
pub mod strength;
pub mod streak;
pub mod config;
pub mod logging;
pub mod state;
pub mod export;
pub mod engine;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use calendar::{days_in_month, Clock, FixedClock, SystemClock, YearMonth};
pub use frequency::{is_due_on, monthly_goal, Frequency};
pub use ledger::Ledger;
pub use config::Config;
pub use state::EngineState;
pub use strength::strength_history;
pub use streak::{best_streak, current_streak};
pub use engine::{ClearSnapshot, EngineSettings, HabitEngine, Outcome};
