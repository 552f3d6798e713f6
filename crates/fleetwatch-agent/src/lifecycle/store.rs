//! Lifecycle record storage backends

use super::state::LifecycleState;
use crate::error::AgentResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Transitions kept in [`LifecycleRecord::history`]
pub const HISTORY_LIMIT: usize = 32;

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub at: i64,
    pub reason: String,
}

/// Everything the lifecycle manager persists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleRecord {
    pub current: LifecycleState,

    /// Unix seconds of the last transition
    pub updated_at: i64,

    pub reinit_count: u32,

    pub last_reinit_at: Option<i64>,

    pub last_reactivation_at: Option<i64>,

    /// Set after a voluntary deletion notice; cleared by reinitialization
    pub pending_deletion_at: Option<i64>,

    pub history: VecDeque<Transition>,
}

impl LifecycleRecord {
    pub(crate) fn push_history(&mut self, entry: Transition) {
        self.history.push_back(entry);
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }
}

/// Trait for lifecycle record storage backends
pub trait LifecycleStore: Send + Sync {
    /// Load the record; `None` when nothing was saved yet
    fn load(&self) -> AgentResult<Option<LifecycleRecord>>;

    /// Persist the record atomically
    fn save(&self, record: &LifecycleRecord) -> AgentResult<()>;
}

/// JSON-file lifecycle store
pub struct FileLifecycleStore {
    path: PathBuf,
}

impl FileLifecycleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LifecycleStore for FileLifecycleStore {
    fn load(&self) -> AgentResult<Option<LifecycleRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path)?;
        let record: LifecycleRecord = serde_json::from_str(&json)?;
        Ok(Some(record))
    }

    fn save(&self, record: &LifecycleRecord) -> AgentResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(record)?;

        // Write atomically using temp file
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, &self.path)?;

        debug!("Saved lifecycle record to {:?}", self.path);
        Ok(())
    }
}

/// In-memory lifecycle store
#[derive(Default)]
pub struct MemoryLifecycleStore {
    record: Mutex<Option<LifecycleRecord>>,
    fail_saves: Mutex<bool>,
}

impl MemoryLifecycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a record
    pub fn with_record(record: LifecycleRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            fail_saves: Mutex::new(false),
        }
    }

    /// Make subsequent saves fail with an IO error
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock() = fail;
    }

    /// Last successfully saved record
    pub fn snapshot(&self) -> Option<LifecycleRecord> {
        self.record.lock().clone()
    }
}

impl LifecycleStore for MemoryLifecycleStore {
    fn load(&self) -> AgentResult<Option<LifecycleRecord>> {
        Ok(self.record.lock().clone())
    }

    fn save(&self, record: &LifecycleRecord) -> AgentResult<()> {
        if *self.fail_saves.lock() {
            return Err(std::io::Error::other("lifecycle store unavailable").into());
        }
        *self.record.lock() = Some(record.clone());
        Ok(())
    }
}
