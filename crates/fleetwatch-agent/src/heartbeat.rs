//! Heartbeat decisions and payloads
//!
//! A tick sends a heartbeat instead of metrics when the server has marked the
//! device inactive, when every metric family is disabled, or when the instant falls
//! outside the monitoring window. Heartbeats always bypass the durable queue.

use crate::monitor_window::WindowStatus;
use crate::runtime::RuntimeConfig;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// Why a tick produced a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatReason {
    ServerInactive,
    MonitoringDisabled,
    OutsideWindow,
    /// No successful communication for longer than the silence threshold
    Silence,
}

impl fmt::Display for HeartbeatReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HeartbeatReason::ServerInactive => "server inactive",
            HeartbeatReason::MonitoringDisabled => "all monitor items disabled",
            HeartbeatReason::OutsideWindow => "outside monitoring window",
            HeartbeatReason::Silence => "prolonged silence",
        };
        f.write_str(text)
    }
}

impl Serialize for HeartbeatReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Full heartbeat payload
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub timestamp: i64,
    pub client_id: String,
    pub hostname: String,
    pub heartbeat: bool,
    pub heartbeat_sequence: u64,
    pub reason: HeartbeatReason,
    pub monitor_status: WindowStatus,
    pub server_active: bool,
    pub monitoring_enabled: bool,
    /// Unix seconds of the previous successful heartbeat, 0 if none
    pub last_heartbeat_time: i64,
}

/// Minimal heartbeat payload, used by the silence guard
#[derive(Debug, Clone, Serialize)]
pub struct MinimalHeartbeat {
    pub timestamp: i64,
    pub client_id: String,
    pub hostname: String,
    pub heartbeat: bool,
    pub reason: HeartbeatReason,
    pub minimal: bool,
}

impl MinimalHeartbeat {
    pub fn new(
        reason: HeartbeatReason,
        client_id: impl Into<String>,
        hostname: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp: now.timestamp(),
            client_id: client_id.into(),
            hostname: hostname.into(),
            heartbeat: true,
            reason,
            minimal: true,
        }
    }
}

/// Heartbeat statistics
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatStats {
    pub total_heartbeats: u64,
    pub last_heartbeat_time: i64,
    pub current_time: i64,
    pub time_since_last_heartbeat: i64,
}

/// Heartbeat decision unit
#[derive(Debug, Default)]
pub struct HeartbeatManager {
    sequence: u64,
    last_heartbeat_at: Option<i64>,
}

impl HeartbeatManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this tick should heartbeat instead of report, and why
    ///
    /// Checks, in priority order: server active flag, enabled metric families,
    /// monitoring window.
    pub fn should_send_heartbeat<Tz: TimeZone>(
        &self,
        runtime: &RuntimeConfig,
        now: &DateTime<Tz>,
    ) -> Option<HeartbeatReason> {
        if !runtime.is_active() {
            return Some(HeartbeatReason::ServerInactive);
        }
        if !runtime.monitoring_enabled() {
            return Some(HeartbeatReason::MonitoringDisabled);
        }
        if !runtime.monitor_mode().is_active_at(now) {
            return Some(HeartbeatReason::OutsideWindow);
        }
        None
    }

    /// Build the next heartbeat; advances the sequence number
    pub fn build_heartbeat<Tz: TimeZone>(
        &mut self,
        reason: HeartbeatReason,
        client_id: impl Into<String>,
        hostname: impl Into<String>,
        runtime: &RuntimeConfig,
        now: &DateTime<Tz>,
    ) -> Heartbeat {
        self.sequence += 1;
        debug!(sequence = self.sequence, %reason, "Building heartbeat");

        Heartbeat {
            timestamp: now.timestamp(),
            client_id: client_id.into(),
            hostname: hostname.into(),
            heartbeat: true,
            heartbeat_sequence: self.sequence,
            reason,
            monitor_status: runtime
                .monitor_mode()
                .status_at(now, runtime.mode_updated_at()),
            server_active: runtime.is_active(),
            monitoring_enabled: runtime.monitoring_enabled(),
            last_heartbeat_time: self.last_heartbeat_at.unwrap_or(0),
        }
    }

    /// Record that heartbeat `sequence` was delivered at `at`
    pub fn record_success(&mut self, sequence: u64, at: i64) {
        self.last_heartbeat_at = Some(at);
        info!(sequence, "Heartbeat delivered");
    }

    pub fn stats(&self, now: i64) -> HeartbeatStats {
        let last = self.last_heartbeat_at.unwrap_or(0);
        HeartbeatStats {
            total_heartbeats: self.sequence,
            last_heartbeat_time: last,
            current_time: now,
            time_since_last_heartbeat: if last > 0 { now - last } else { 0 },
        }
    }
}

/// Whether the silence guard should force a heartbeat
pub fn should_force_heartbeat(last_activity: i64, now: i64, threshold_secs: u64) -> bool {
    let silence = now - last_activity;
    if silence >= threshold_secs as i64 {
        info!(silence_secs = silence, "No successful communication for too long");
        return true;
    }
    false
}
