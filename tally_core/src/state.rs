//! Engine state persistence with file locking.
//!
//! The whole engine (habits plus pending month-clear undos) is stored as one
//! JSON document. Loads are tolerant: an unreadable file yields an empty
//! state, and a malformed habit record is skipped without losing the rest.

use crate::engine::ClearSnapshot;
use crate::{Error, Habit, HabitId, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Everything the engine needs to resume
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineState {
    #[serde(default)]
    pub habits: Vec<Habit>,
    #[serde(default)]
    pub pending_undo: BTreeMap<HabitId, ClearSnapshot>,
}

/// Loose shape used to salvage what parses from a damaged document
#[derive(Deserialize)]
struct RawState {
    #[serde(default)]
    habits: Vec<serde_json::Value>,
    #[serde(default)]
    pending_undo: BTreeMap<String, serde_json::Value>,
}

/// Advisory lock on the `.lock` file next to a state file
///
/// The state file itself is replaced by rename on every save, so it cannot
/// carry the lock. Released on drop.
struct StateLock {
    file: File,
}

impl StateLock {
    fn open(path: &Path) -> Result<File> {
        let lock_path = path.with_extension("lock");
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    fn shared(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_shared()?;
        Ok(Self { file })
    }

    fn exclusive(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::debug!("Failed to release state lock: {}", e);
        }
    }
}

impl EngineState {
    /// Load state from a file with shared locking
    ///
    /// Returns an empty state if the file doesn't exist or can't be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No state file found at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let _lock = match StateLock::shared(path) {
            Ok(lock) => Some(lock),
            Err(e) => {
                tracing::warn!("Unable to lock state file {:?}: {}. Reading unlocked.", path, e);
                None
            }
        };
        Ok(Self::read_from(path))
    }

    /// Tolerant read with no locking of its own
    fn read_from(path: &Path) -> Self {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No state file found at {:?}, starting empty", path);
                return Self::default();
            }
            Err(e) => {
                tracing::warn!("Unable to open state file {:?}: {}. Starting empty.", path, e);
                return Self::default();
            }
        };

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            tracing::warn!("Failed to read state file {:?}: {}. Starting empty.", path, e);
            return Self::default();
        }

        match Self::parse(&contents) {
            Ok(state) => {
                tracing::debug!(
                    "Loaded {} habits from {:?}",
                    state.habits.len(),
                    path
                );
                state
            }
            Err(e) => {
                tracing::warn!("Failed to parse state file {:?}: {}. Starting empty.", path, e);
                Self::default()
            }
        }
    }

    /// Parse a state document record by record
    ///
    /// Only a document that is not a JSON object at all is an error.
    pub fn parse(contents: &str) -> Result<Self> {
        let raw: RawState = serde_json::from_str(contents)?;

        let mut habits = Vec::with_capacity(raw.habits.len());
        for (i, value) in raw.habits.into_iter().enumerate() {
            match serde_json::from_value::<Habit>(value) {
                Ok(habit) => habits.push(habit),
                Err(e) => tracing::warn!("Skipping malformed habit record #{}: {}", i, e),
            }
        }

        let mut pending_undo = BTreeMap::new();
        for (key, value) in raw.pending_undo {
            let parsed = HabitId::parse_str(&key)
                .map_err(|e| Error::State(e.to_string()))
                .and_then(|id| Ok((id, serde_json::from_value::<ClearSnapshot>(value)?)));
            match parsed {
                Ok((id, snapshot)) => {
                    pending_undo.insert(id, snapshot);
                }
                Err(e) => tracing::warn!("Dropping unreadable undo snapshot {}: {}", key, e),
            }
        }

        Ok(Self {
            habits,
            pending_undo,
        })
    }

    /// Save state to a file atomically
    ///
    /// Writes a temp file in the same directory, syncs it, then renames it
    /// over the original. Callers racing other writers go through `update`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string_pretty(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved {} habits to {:?}", self.habits.len(), path);
        Ok(())
    }

    /// Load state, modify it, and save it back under one exclusive lock
    ///
    /// Concurrent updates of the same path run one after another, so none
    /// of them is lost. Nothing is written if `f` fails.
    pub fn update<F>(path: &Path, f: F) -> Result<Self>
    where
        F: FnOnce(&mut EngineState) -> Result<()>,
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let _lock = StateLock::exclusive(path)?;

        let mut state = Self::read_from(path);
        f(&mut state)?;
        state.save(path)?;
        Ok(state)
    }
}
