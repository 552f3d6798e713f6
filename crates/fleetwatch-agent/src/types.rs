//! Wire types for the collection service protocol

use crate::monitor_window::MonitorModeConfig;
use crate::runtime::MonitorItemPatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error code carried by a 403 when the device record no longer exists
pub const DEVICE_DELETED_CODE: &str = "DEVICE_DELETED";

/// Host description sent with registration and deletion requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Hostname
    pub hostname: String,

    /// Human-readable operating system description
    pub os: String,
}

impl DeviceInfo {
    /// Describe the current host
    pub fn detect() -> Self {
        Self {
            hostname: local_hostname(),
            os: os_description(),
        }
    }
}

/// `POST /register` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub client_id: String,
    pub hostname: String,
    pub os: String,
}

impl RegisterRequest {
    pub fn new(client_id: impl Into<String>, info: &DeviceInfo) -> Self {
        Self {
            client_id: client_id.into(),
            hostname: info.hostname.clone(),
            os: info.os.clone(),
        }
    }
}

/// `POST /delete` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub client_id: String,
    pub hostname: String,
    pub os: String,
    pub action: String,
    /// Unix seconds
    pub timestamp: i64,
}

impl DeleteRequest {
    pub fn new(client_id: impl Into<String>, info: &DeviceInfo, timestamp: i64) -> Self {
        Self {
            client_id: client_id.into(),
            hostname: info.hostname.clone(),
            os: info.os.clone(),
            action: "delete".to_string(),
            timestamp,
        }
    }
}

/// Response status reported by the collection service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    Pending,
    Accepted,
    Rejected,
    Deleted,
    /// Missing or unrecognized status
    Unknown(String),
}

impl ResponseStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("pending") => ResponseStatus::Pending,
            Some("accepted") => ResponseStatus::Accepted,
            Some("rejected") => ResponseStatus::Rejected,
            Some("deleted") => ResponseStatus::Deleted,
            Some(other) => ResponseStatus::Unknown(other.to_string()),
            None => ResponseStatus::Unknown(String::new()),
        }
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseStatus::Pending => write!(f, "pending"),
            ResponseStatus::Accepted => write!(f, "accepted"),
            ResponseStatus::Rejected => write!(f, "rejected"),
            ResponseStatus::Deleted => write!(f, "deleted"),
            ResponseStatus::Unknown(s) if s.is_empty() => write!(f, "<missing>"),
            ResponseStatus::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Body of a register or report response
///
/// Both endpoints share the config-push fields. Every field is optional on the
/// wire; registration validates presence separately.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerResponse {
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    /// Server-assigned device id (integer or string)
    #[serde(default)]
    pub server_id: Option<serde_json::Value>,

    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub report_url: Option<String>,

    #[serde(default)]
    pub report_interval: Option<u64>,

    #[serde(default)]
    pub monitor_items: Option<BTreeMap<String, MonitorItemPatch>>,

    #[serde(default)]
    pub monitor_config: Option<MonitorModeConfig>,

    #[serde(default)]
    pub is_active: Option<bool>,

    #[serde(default)]
    pub error_code: Option<String>,
}

impl ServerResponse {
    /// Parsed status
    pub fn status(&self) -> ResponseStatus {
        ResponseStatus::parse(self.status.as_deref())
    }

    /// Whether this response signals that the device record is gone
    pub fn is_device_deleted(&self) -> bool {
        self.status() == ResponseStatus::Deleted
            || self.error_code.as_deref() == Some(DEVICE_DELETED_CODE)
    }

    /// Synthesized response for a 403 carrying the device-deleted error code
    pub fn deleted_signal(message: Option<String>) -> Self {
        Self {
            status: Some("deleted".to_string()),
            message,
            error_code: Some(DEVICE_DELETED_CODE.to_string()),
            ..Default::default()
        }
    }

    /// Names of the fields an accepted registration must carry but does not
    pub fn missing_registration_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.server_id.as_ref().is_none_or(|v| v.is_null()) {
            missing.push("server_id");
        }
        if self.auth_token.is_none() {
            missing.push("auth_token");
        }
        if self.report_url.is_none() {
            missing.push("report_url");
        }
        if self.report_interval.is_none() {
            missing.push("report_interval");
        }
        if self.monitor_items.is_none() {
            missing.push("monitor_items");
        }
        if self.is_active.is_none() {
            missing.push("is_active");
        }
        missing
    }

    /// Required metric families absent from `monitor_items`
    pub fn missing_monitor_items(&self) -> Vec<&'static str> {
        let Some(items) = &self.monitor_items else {
            return crate::runtime::REQUIRED_MONITOR_ITEMS.to_vec();
        };
        crate::runtime::REQUIRED_MONITOR_ITEMS
            .into_iter()
            .filter(|name| !items.contains_key(*name))
            .collect()
    }
}

/// Error body of a non-2xx response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub error_code: Option<String>,

    #[serde(default, alias = "detail")]
    pub message: Option<String>,
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn os_description() -> String {
    #[cfg(target_os = "macos")]
    {
        let field = |flag: &str| {
            std::process::Command::new("sw_vers")
                .arg(flag)
                .output()
                .ok()
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        match (field("-productName"), field("-productVersion")) {
            (Some(name), Some(version)) => format!("{} {}", name, version),
            (None, Some(version)) => format!("macOS {}", version),
            _ => "macOS".to_string(),
        }
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| pretty_name(&content))
            .unwrap_or_else(|| "Linux".to_string())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let os = std::env::consts::OS;
        let mut chars = os.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => "unknown".to_string(),
        }
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find(|l| l.starts_with("PRETTY_NAME="))
        .map(|l| l.trim_start_matches("PRETTY_NAME=").trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
}
