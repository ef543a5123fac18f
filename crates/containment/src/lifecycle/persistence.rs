//! Pluggable persistence for state snapshots
//!
//! Backends store a plain serialisable map; keys and value types are chosen
//! by the state machine, never by the backend. Failures are reported as
//! booleans so a missing or broken store degrades to a fresh state rather
//! than aborting the chain.

use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde_json::Value;

/// Storage contract for state snapshots.
pub trait PersistenceBackend: Send + Sync {
    /// Save state data. Returns true on success.
    fn save(&self, data: &Value) -> bool;

    /// Load state data, or `None` if no state exists.
    fn load(&self) -> Option<Value>;

    /// Create a backup of the current state (optional).
    fn backup(&self) -> bool {
        false
    }
}

/// JSON file backend with atomic writes (tempfile + rename).
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl PersistenceBackend for JsonFileBackend {
    fn save(&self, data: &Value) -> bool {
        let json = match serde_json::to_string_pretty(data) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("state serialization failed: {}", e);
                return false;
            }
        };
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if let Err(e) = std::fs::create_dir_all(&parent) {
            tracing::error!("state directory creation failed: {}", e);
            return false;
        }
        let result = (|| -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
            tmp.write_all(json.as_bytes())?;
            tmp.flush()?;
            tmp.persist(&self.path)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "state saved");
                true
            }
            Err(e) => {
                tracing::error!("state save failed: {}", e);
                false
            }
        }
    }

    fn load(&self) -> Option<Value> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "no state file, starting fresh");
            return None;
        }
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::error!("state parse failed: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::error!("state read failed: {}", e);
                None
            }
        }
    }

    fn backup(&self) -> bool {
        if !self.path.exists() {
            return false;
        }
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup_path = self.path.with_extension(format!("backup_{}.json", stamp));
        match std::fs::copy(&self.path, &backup_path) {
            Ok(_) => {
                tracing::info!(path = %backup_path.display(), "state backup created");
                true
            }
            Err(e) => {
                tracing::error!("state backup failed: {}", e);
                false
            }
        }
    }
}

/// In-memory backend for tests; nothing survives the process.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<Option<Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceBackend for MemoryBackend {
    fn save(&self, data: &Value) -> bool {
        *self.data.lock() = Some(data.clone());
        true
    }

    fn load(&self) -> Option<Value> {
        self.data.lock().clone()
    }
}
