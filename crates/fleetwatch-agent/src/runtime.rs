//! Server-pushed runtime configuration
//!
//! [`RuntimeConfig`] starts from built-in defaults and is overwritten piecewise by
//! every registration and report response. It changes only through
//! [`RuntimeConfig::apply_update`] and [`RuntimeConfig::clear_device_auth`], so the
//! immediate and batch send paths cannot drift apart.

use crate::config::AgentConfig;
use crate::identity::Credential;
use crate::monitor_window::MonitorModeConfig;
use crate::types::ServerResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Metric families every registration response must describe
pub const REQUIRED_MONITOR_ITEMS: [&str; 4] = ["cpu", "memory", "disk", "gpu"];

/// Per-family collection flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorItem {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_temp: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_power: Option<bool>,

    /// Mount points to sample (disk only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,

    /// Fields this agent does not interpret but keeps
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MonitorItem {
    fn enabled_with_extras(collect_temp: bool, collect_power: bool) -> Self {
        Self {
            enabled: true,
            collect_temp: Some(collect_temp),
            collect_power: Some(collect_power),
            ..Default::default()
        }
    }

    /// Whether temperature should be sampled (defaults to on)
    pub fn collect_temp(&self) -> bool {
        self.collect_temp.unwrap_or(true)
    }

    /// Whether power draw should be sampled (defaults to on)
    pub fn collect_power(&self) -> bool {
        self.collect_power.unwrap_or(true)
    }

    fn merge(&mut self, patch: &MonitorItemPatch) -> bool {
        let before = self.clone();
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(v) = patch.collect_temp {
            self.collect_temp = Some(v);
        }
        if let Some(v) = patch.collect_power {
            self.collect_power = Some(v);
        }
        if let Some(paths) = &patch.paths {
            self.paths = Some(paths.clone());
        }
        for (k, v) in &patch.extra {
            self.extra.insert(k.clone(), v.clone());
        }
        *self != before
    }
}

/// Partial update for one monitor item; absent fields keep their prior value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_temp: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_power: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MonitorItemPatch {
    /// Patch that only toggles `enabled`
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }
}

/// Mount points sampled when the server does not name any
pub fn default_disk_paths() -> Vec<String> {
    if cfg!(windows) {
        vec!["C:\\".to_string()]
    } else {
        vec!["/".to_string()]
    }
}

/// What an [`RuntimeConfig::apply_update`] call changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigChanges {
    pub report_url: bool,
    pub report_interval: bool,
    pub monitor_items: Vec<String>,
    pub monitor_mode: bool,
    pub is_active: bool,
    pub server_id: bool,
    pub auth_token: bool,
}

impl ConfigChanges {
    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        !self.report_url
            && !self.report_interval
            && self.monitor_items.is_empty()
            && !self.monitor_mode
            && !self.is_active
            && !self.server_id
            && !self.auth_token
    }
}

/// Process-wide mutable configuration pushed by the collection service
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    report_url: Option<String>,
    report_interval_secs: u64,
    monitor_items: BTreeMap<String, MonitorItem>,
    monitor_mode: MonitorModeConfig,
    mode_updated_at: Option<DateTime<Utc>>,
    is_active: bool,
    server_id: Option<serde_json::Value>,
    #[serde(skip)]
    auth_token: Option<String>,
}

impl RuntimeConfig {
    /// Built-in defaults
    pub fn new(default_report_url: impl Into<String>, default_interval_secs: u64) -> Self {
        let mut monitor_items = BTreeMap::new();
        monitor_items.insert("cpu".to_string(), MonitorItem::enabled_with_extras(true, true));
        monitor_items.insert(
            "memory".to_string(),
            MonitorItem {
                enabled: true,
                ..Default::default()
            },
        );
        monitor_items.insert(
            "disk".to_string(),
            MonitorItem {
                enabled: true,
                paths: Some(Vec::new()),
                ..Default::default()
            },
        );
        monitor_items.insert("gpu".to_string(), MonitorItem::enabled_with_extras(true, true));

        Self {
            report_url: Some(default_report_url.into()),
            report_interval_secs: default_interval_secs,
            monitor_items,
            monitor_mode: MonitorModeConfig::default(),
            mode_updated_at: None,
            is_active: true,
            server_id: None,
            auth_token: None,
        }
    }

    /// Defaults derived from the static configuration
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.server.report_url(),
            config.timing.default_report_interval_secs,
        )
    }

    pub fn report_url(&self) -> Option<&str> {
        self.report_url.as_deref().filter(|u| !u.is_empty())
    }

    pub fn report_interval_secs(&self) -> u64 {
        self.report_interval_secs
    }

    pub fn monitor_items(&self) -> &BTreeMap<String, MonitorItem> {
        &self.monitor_items
    }

    pub fn monitor_item(&self, name: &str) -> Option<&MonitorItem> {
        self.monitor_items.get(name)
    }

    /// Whether the given family is enabled
    pub fn is_item_enabled(&self, name: &str) -> bool {
        self.monitor_items.get(name).is_some_and(|i| i.enabled)
    }

    /// Whether any family is enabled
    pub fn monitoring_enabled(&self) -> bool {
        self.monitor_items.values().any(|i| i.enabled)
    }

    /// Disk mount points to sample; empty means every major partition
    pub fn disk_paths(&self) -> Vec<String> {
        self.monitor_items
            .get("disk")
            .and_then(|d| d.paths.clone())
            .unwrap_or_else(default_disk_paths)
    }

    pub fn monitor_mode(&self) -> &MonitorModeConfig {
        &self.monitor_mode
    }

    /// When the monitoring mode was last pushed
    pub fn mode_updated_at(&self) -> Option<DateTime<Utc>> {
        self.mode_updated_at
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn server_id(&self) -> Option<&serde_json::Value> {
        self.server_id.as_ref()
    }

    /// Credential confirmed by the server, if any
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Merge a server response into the runtime configuration
    ///
    /// Monitor items are merged per item; the monitoring mode is replaced wholesale.
    /// A server credential that differs from `local` is never adopted.
    pub fn apply_update(
        &mut self,
        update: &ServerResponse,
        local: &Credential,
        now: DateTime<Utc>,
    ) -> ConfigChanges {
        let mut changes = ConfigChanges::default();

        if let Some(url) = update.report_url.as_deref().filter(|u| !u.is_empty()) {
            if self.report_url.as_deref() != Some(url) {
                info!(report_url = %url, "Report URL updated");
                self.report_url = Some(url.to_string());
                changes.report_url = true;
            }
        }

        match update.report_interval {
            Some(0) => warn!("Ignoring report_interval of 0"),
            Some(interval) if interval != self.report_interval_secs => {
                info!(
                    "Report interval updated: {} -> {} seconds",
                    self.report_interval_secs, interval
                );
                self.report_interval_secs = interval;
                changes.report_interval = true;
            }
            _ => {}
        }

        if let Some(items) = &update.monitor_items {
            for (name, patch) in items {
                let item = self.monitor_items.entry(name.clone()).or_default();
                let mut changed = item.merge(patch);

                if name == "disk" && item.paths.is_none() {
                    item.paths = Some(default_disk_paths());
                    debug!(paths = ?item.paths, "Disk paths not provided, using platform default");
                    changed = true;
                }

                if changed {
                    info!(item = %name, enabled = item.enabled, "Monitor item updated");
                    changes.monitor_items.push(name.clone());
                }
            }
        }

        if let Some(mode) = &update.monitor_config {
            if *mode != self.monitor_mode {
                info!(mode = ?mode.mode, "Monitoring mode updated");
                changes.monitor_mode = true;
            }
            self.monitor_mode = mode.clone();
            self.mode_updated_at = Some(now);
        }

        if let Some(active) = update.is_active {
            if active != self.is_active {
                info!(is_active = active, "Server active flag changed");
                self.is_active = active;
                changes.is_active = true;
            }
        }

        if let Some(id) = update.server_id.as_ref().filter(|v| !v.is_null()) {
            if self.server_id.as_ref() != Some(id) {
                info!(server_id = %id, "Server id assigned");
                self.server_id = Some(id.clone());
                changes.server_id = true;
            }
        }

        if let Some(token) = update.auth_token.as_deref() {
            if local.matches(token) {
                if self.auth_token.as_deref() != Some(local.as_str()) {
                    changes.auth_token = true;
                }
                self.auth_token = Some(local.as_str().to_string());
            } else {
                warn!(
                    server = %Credential::fingerprint_of(token),
                    local = %local.fingerprint(),
                    "Server credential does not match the local one; keeping local credential"
                );
            }
        }

        changes
    }

    /// Drop everything derived from the current device identity
    ///
    /// Monitoring preferences (items, mode, interval) are kept.
    pub fn clear_device_auth(&mut self) {
        self.auth_token = None;
        self.server_id = None;
        self.report_url = None;
        info!("Cleared device credential, server id and report URL");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor_window::MonitorMode;
    use serde_json::json;

    fn runtime() -> RuntimeConfig {
        RuntimeConfig::new("http://localhost:8045/api/agent/report", 30)
    }

    fn response(value: serde_json::Value) -> ServerResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults() {
        let rt = runtime();
        assert_eq!(rt.report_url(), Some("http://localhost:8045/api/agent/report"));
        assert_eq!(rt.report_interval_secs(), 30);
        assert!(rt.is_active());
        assert!(rt.monitoring_enabled());
        for item in REQUIRED_MONITOR_ITEMS {
            assert!(rt.is_item_enabled(item));
        }
        assert!(rt.monitor_item("cpu").unwrap().collect_temp());
        assert_eq!(rt.monitor_mode().mode, MonitorMode::Continuous);
        assert!(rt.auth_token().is_none());
    }

    #[test]
    fn test_monitor_items_merge_per_item() {
        let mut rt = runtime();
        let credential = Credential::from_token("tok");
        let update = response(json!({
            "status": "accepted",
            "monitor_items": {
                "cpu": {"collect_temp": false},
                "gpu": {"enabled": false},
                "disk": {"enabled": true}
            }
        }));

        let changes = rt.apply_update(&update, &credential, Utc::now());

        let cpu = rt.monitor_item("cpu").unwrap();
        assert!(cpu.enabled, "unspecified sub-field keeps prior value");
        assert!(!cpu.collect_temp());
        assert!(cpu.collect_power());
        assert!(!rt.is_item_enabled("gpu"));
        assert!(rt.is_item_enabled("memory"));
        // Default disk config carries an empty list which stays as-is
        assert_eq!(rt.disk_paths(), Vec::<String>::new());
        assert!(changes.monitor_items.contains(&"cpu".to_string()));
        assert!(changes.monitor_items.contains(&"gpu".to_string()));
    }

    #[test]
    fn test_disk_paths_default_when_missing() {
        let mut rt = runtime();
        let credential = Credential::from_token("tok");
        let update = response(json!({
            "status": "accepted",
            "monitor_items": {"fan": {"enabled": true}, "disk": {"enabled": true}}
        }));
        rt.apply_update(&update, &credential, Utc::now());
        assert!(rt.is_item_enabled("fan"));

        let mut fresh = runtime();
        fresh.monitor_items.get_mut("disk").unwrap().paths = None;
        fresh.apply_update(&update, &credential, Utc::now());
        assert_eq!(fresh.disk_paths(), default_disk_paths());
    }

    #[test]
    fn test_mode_replaced_wholesale() {
        let mut rt = runtime();
        let credential = Credential::from_token("tok");
        let scheduled = response(json!({
            "status": "accepted",
            "monitor_config": {
                "mode": "SCHEDULED",
                "schedule": {"days": ["1", "2"], "start_time": "09:00", "end_time": "18:00"}
            }
        }));
        rt.apply_update(&scheduled, &credential, Utc::now());
        assert_eq!(rt.monitor_mode().mode, MonitorMode::Scheduled);
        assert!(rt.mode_updated_at().is_some());

        let countdown = response(json!({
            "status": "accepted",
            "monitor_config": {"mode": "COUNTDOWN", "countdown": {"end_time": "2030-01-01T00:00:00Z"}}
        }));
        rt.apply_update(&countdown, &credential, Utc::now());
        assert_eq!(rt.monitor_mode().mode, MonitorMode::Countdown);
        assert!(rt.monitor_mode().schedule.days.is_empty());
    }

    #[test]
    fn test_scalar_fields_and_credential() {
        let mut rt = runtime();
        let credential = Credential::from_token("tok");
        let update = response(json!({
            "status": "accepted",
            "server_id": 7,
            "auth_token": "tok",
            "report_url": "http://collector/api/agent/report",
            "report_interval": 45,
            "is_active": false
        }));
        let changes = rt.apply_update(&update, &credential, Utc::now());

        assert_eq!(rt.report_interval_secs(), 45);
        assert_eq!(rt.report_url(), Some("http://collector/api/agent/report"));
        assert_eq!(rt.server_id(), Some(&json!(7)));
        assert_eq!(rt.auth_token(), Some("tok"));
        assert!(!rt.is_active());
        assert!(changes.report_interval && changes.auth_token && changes.is_active);

        // Mismatched credential is never adopted
        let mut other = runtime();
        let bad = response(json!({"status": "accepted", "auth_token": "forged"}));
        other.apply_update(&bad, &credential, Utc::now());
        assert!(other.auth_token().is_none());
    }

    #[test]
    fn test_zero_interval_ignored() {
        let mut rt = runtime();
        let update = response(json!({"status": "accepted", "report_interval": 0}));
        let changes = rt.apply_update(&update, &Credential::from_token("t"), Utc::now());
        assert_eq!(rt.report_interval_secs(), 30);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_clear_device_auth_keeps_preferences() {
        let mut rt = runtime();
        let credential = Credential::from_token("tok");
        let update = response(json!({
            "status": "accepted",
            "server_id": "srv-1",
            "auth_token": "tok",
            "report_interval": 60,
            "monitor_items": {"gpu": {"enabled": false}}
        }));
        rt.apply_update(&update, &credential, Utc::now());

        rt.clear_device_auth();
        assert!(rt.auth_token().is_none());
        assert!(rt.server_id().is_none());
        assert!(rt.report_url().is_none());
        assert_eq!(rt.report_interval_secs(), 60);
        assert!(!rt.is_item_enabled("gpu"));
    }
}
