//! Durable session flag
//!
//! A single boolean, `is_session_connected`, survives process restarts so
//! the controller can tell whether the previous run ended with a tunnel up.

use crate::error::PersistenceError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// File name of the persisted document inside the state directory
pub const STATE_FILE_NAME: &str = "defyx_vpn_prefs.json";

/// Storage for the last-known connected flag
///
/// Calls may block; the controller runs them on the blocking pool under a
/// timeout and only logs failures.
pub trait PersistenceStore: Send + Sync + 'static {
    /// Read the flag; a store that was never written reports `false`
    fn load(&self) -> Result<bool, PersistenceError>;

    /// Overwrite the flag
    fn store(&self, connected: bool) -> Result<(), PersistenceError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    is_session_connected: bool,
}

/// JSON document in a state directory
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store under `dir`, which is created on first write
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILE_NAME),
        }
    }

    /// Location of the state document
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceStore for FileStore {
    fn load(&self) -> Result<bool, PersistenceError> {
        if !self.path.exists() {
            return Ok(false);
        }
        let bytes = fs::read(&self.path)?;
        let state: PersistedState = serde_json::from_slice(&bytes)?;
        Ok(state.is_session_connected)
    }

    fn store(&self, connected: bool) -> Result<(), PersistenceError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let body = serde_json::to_vec_pretty(&PersistedState {
            is_session_connected: connected,
        })?;

        // Write to temp file first, then rename over the old document
        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&body)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &self.path)?;

        debug!(
            "Persisted is_session_connected={} to {}",
            connected,
            self.path.display()
        );
        Ok(())
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    connected: AtomicBool,
}

impl MemoryStore {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    /// Current value without going through the trait
    pub fn get(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl PersistenceStore for MemoryStore {
    fn load(&self) -> Result<bool, PersistenceError> {
        Ok(self.get())
    }

    fn store(&self, connected: bool) -> Result<(), PersistenceError> {
        self.connected.store(connected, Ordering::SeqCst);
        Ok(())
    }
}
