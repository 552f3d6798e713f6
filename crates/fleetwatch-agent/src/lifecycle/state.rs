use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Registration lifecycle of this device
///
/// Error bookkeeping lives inside the `Error` variant, so it disappears as soon as
/// the state leaves `Error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Unregistered,
    Registering,
    Registered,
    Error {
        /// Unix seconds when the state was first entered
        started_at: i64,
        /// Failures recorded while already in `Error`
        retry_count: u32,
    },
    Deleted,
    Reinitialized,
    SleepRetry {
        /// Zero-based re-registration attempt
        attempt: u32,
    },
}

impl LifecycleState {
    /// Upper-case state name used in logs and status output
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Unregistered => "UNREGISTERED",
            LifecycleState::Registering => "REGISTERING",
            LifecycleState::Registered => "REGISTERED",
            LifecycleState::Error { .. } => "ERROR",
            LifecycleState::Deleted => "DELETED",
            LifecycleState::Reinitialized => "REINITIALIZED",
            LifecycleState::SleepRetry { .. } => "SLEEP_RETRY",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LifecycleState::Error { .. })
    }

    /// Whether the device is in the post-deletion re-registration path
    pub fn is_deletion_path(&self) -> bool {
        matches!(
            self,
            LifecycleState::Deleted | LifecycleState::Reinitialized | LifecycleState::SleepRetry { .. }
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wait before sleep-retry attempt `attempt`
///
/// Fixed table: 0s, 60s, 120s, then 300s for every later attempt.
pub fn sleep_retry_delay(attempt: u32) -> Duration {
    let secs = match attempt {
        0 => 0,
        1 => 60,
        2 => 120,
        _ => 300,
    };
    Duration::from_secs(secs)
}
