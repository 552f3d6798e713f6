//! Durable local queue
//!
//! Uses SQLite for persistent storage of collected samples until the collection
//! service acknowledges them. Records are never un-sent; they leave the queue only
//! through age-based pruning.

use crate::clock::Clock;
use crate::error::AgentResult;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp INTEGER NOT NULL,
        data TEXT NOT NULL,
        sent INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_metrics_sent_id ON metrics(sent, id);
    CREATE INDEX IF NOT EXISTS idx_metrics_timestamp ON metrics(timestamp);
";

/// One queued sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueRecord {
    /// Insertion-ordered id
    pub id: i64,

    /// Save time (Unix seconds)
    pub timestamp: i64,

    /// Original sample
    pub payload: serde_json::Value,

    pub sent: bool,
}

/// Durable queue of collected samples
pub struct DurableQueue {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl DurableQueue {
    /// Open (or create) the queue database at `path`
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> AgentResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.execute_batch(SCHEMA)?;

        info!("Durable queue initialized at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    /// Create an in-memory queue (for testing)
    pub fn in_memory(clock: Arc<dyn Clock>) -> AgentResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    /// Append an unsent record stamped with the current time
    pub fn save(&self, payload: &serde_json::Value) -> AgentResult<i64> {
        let json = serde_json::to_string(payload)?;
        let timestamp = self.clock.unix_now();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO metrics (timestamp, data, sent) VALUES (?1, ?2, 0)",
            params![timestamp, json],
        )?;
        let id = conn.last_insert_rowid();

        debug!(record_id = id, "Saved sample to durable queue");
        Ok(id)
    }

    /// Up to `limit` oldest unsent records, ascending by id
    ///
    /// Rows whose payload no longer parses are deleted.
    pub fn get_unsent(&self, limit: usize) -> AgentResult<Vec<QueueRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, data FROM metrics
             WHERE sent = 0 ORDER BY id ASC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp: i64 = row.get(1)?;
            let json: String = row.get(2)?;
            Ok((id, timestamp, json))
        })?;

        let mut records = Vec::new();
        let mut corrupt = Vec::new();

        for row in rows {
            let (id, timestamp, json) = row?;
            match serde_json::from_str(&json) {
                Ok(payload) => records.push(QueueRecord {
                    id,
                    timestamp,
                    payload,
                    sent: false,
                }),
                Err(e) => {
                    warn!(record_id = id, "Failed to deserialize queued sample: {}", e);
                    corrupt.push(id);
                }
            }
        }
        drop(stmt);

        for id in corrupt {
            conn.execute("DELETE FROM metrics WHERE id = ?1", params![id])?;
        }

        Ok(records)
    }

    /// Flag exactly `ids` as sent, in one transaction
    pub fn mark_sent(&self, ids: &[i64]) -> AgentResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE metrics SET sent = 1 WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;

        debug!("Marked {} records as sent", ids.len());
        Ok(())
    }

    /// Delete every record older than `max_age_secs`, sent or not
    ///
    /// Unsent records past the threshold are lost.
    pub fn prune(&self, max_age_secs: u64) -> AgentResult<usize> {
        let cutoff = self.clock.unix_now() - max_age_secs as i64;
        let conn = self.conn.lock();

        let unsent: i64 = conn.query_row(
            "SELECT COUNT(*) FROM metrics WHERE timestamp < ?1 AND sent = 0",
            params![cutoff],
            |row| row.get(0),
        )?;
        let deleted = conn.execute("DELETE FROM metrics WHERE timestamp < ?1", params![cutoff])?;

        if unsent > 0 {
            warn!(
                dropped_unsent = unsent,
                "Pruned samples that were never delivered"
            );
        }
        if deleted > 0 {
            info!("Pruned {} old records from durable queue", deleted);
        }

        Ok(deleted)
    }

    /// Number of unsent records
    pub fn pending_count(&self) -> AgentResult<usize> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM metrics WHERE sent = 0", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    /// Get queue statistics
    pub fn stats(&self) -> AgentResult<QueueStats> {
        let conn = self.conn.lock();

        let (total, pending, oldest, newest) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(sent = 0), 0), MIN(timestamp), MAX(timestamp)
             FROM metrics",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            },
        )?;

        Ok(QueueStats {
            pending_count: pending as usize,
            total_count: total as usize,
            oldest_timestamp: oldest,
            newest_timestamp: newest,
        })
    }
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Number of unsent records
    pub pending_count: usize,

    /// Number of records, sent or not
    pub total_count: usize,

    /// Oldest record timestamp (Unix seconds)
    pub oldest_timestamp: Option<i64>,

    /// Newest record timestamp (Unix seconds)
    pub newest_timestamp: Option<i64>,
}
