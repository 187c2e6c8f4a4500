//! Error types for the tally_core library.

use crate::HabitId;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tally_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-supplied input was rejected before anything was stored
    #[error("Invalid input: {0}")]
    Validation(String),

    /// No habit with this id exists in the engine
    #[error("Habit not found: {0}")]
    HabitNotFound(HabitId),

    /// Undo requested but no bulk-clear snapshot is pending
    #[error("Nothing to undo for habit {0}")]
    NothingToUndo(HabitId),

    /// State management error
    #[error("State error: {0}")]
    State(String),
}

impl Error {
    /// Shorthand for building a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}
