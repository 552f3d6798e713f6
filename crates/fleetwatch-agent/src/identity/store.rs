//! Device identifier storage backends

use crate::error::AgentResult;
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Trait for device identifier storage backends
pub trait IdentityStore: Send + Sync {
    /// Load the identifier; `None` when absent or empty
    fn load(&self) -> AgentResult<Option<String>>;

    /// Persist the identifier, replacing any previous one
    fn save(&self, device_id: &str) -> AgentResult<()>;
}

/// File-backed identifier store
///
/// Holds the identifier as plain text. Writes go through a temp file and a rename
/// so a crash never leaves a truncated identifier behind.
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> AgentResult<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        let id = content.trim();
        if id.is_empty() {
            debug!("Identifier file {:?} is empty", self.path);
            return Ok(None);
        }
        Ok(Some(id.to_string()))
    }

    fn save(&self, device_id: &str) -> AgentResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, device_id)?;
        fs::rename(&temp_path, &self.path)?;

        debug!("Saved device identifier to {:?}", self.path);
        Ok(())
    }
}

/// In-memory identifier store
#[derive(Default)]
pub struct MemoryIdentityStore {
    value: Mutex<Option<String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with an identifier
    pub fn with_id(device_id: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(device_id.into())),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> AgentResult<Option<String>> {
        Ok(self.value.lock().clone().filter(|v| !v.trim().is_empty()))
    }

    fn save(&self, device_id: &str) -> AgentResult<()> {
        *self.value.lock() = Some(device_id.to_string());
        Ok(())
    }
}
