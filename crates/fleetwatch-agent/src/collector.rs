//! Host metric collection
//!
//! The agent only depends on [`MetricsCollector`]; [`SysinfoCollector`] is the
//! default implementation. Collectors return the metric families only; the agent
//! stamps timestamp, hostname and client id onto the sample.

use crate::runtime::RuntimeConfig;
use serde_json::{json, Map, Value};
use sysinfo::{Components, Disks, System};
use tracing::{debug, info};

/// Source of metric samples
pub trait MetricsCollector: Send {
    /// Collect the enabled metric families
    ///
    /// Returns `None` when every family is disabled.
    fn collect(&mut self, runtime: &RuntimeConfig) -> Option<Value>;
}

/// Collector backed by `sysinfo`
///
/// GPUs are reported as an empty list; sysinfo has no GPU support.
pub struct SysinfoCollector {
    system: System,
}

impl SysinfoCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is computed between two refreshes
        system.refresh_cpu();
        Self { system }
    }

    fn collect_cpu(&mut self, collect_temp: bool, collect_power: bool) -> Value {
        self.system.refresh_cpu();
        let cpus = self.system.cpus();
        let name = cpus
            .first()
            .map(|c| c.brand().trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        let frequency = cpus.first().map(|c| c.frequency());

        let mut cpu = Map::new();
        cpu.insert("name".to_string(), json!(name));
        cpu.insert("threads".to_string(), json!(cpus.len()));
        cpu.insert(
            "usage_percent".to_string(),
            json!(round1(self.system.global_cpu_info().cpu_usage() as f64)),
        );
        cpu.insert("frequency_mhz".to_string(), json!(frequency));
        if collect_temp {
            cpu.insert("temperature_c".to_string(), json!(cpu_temperature()));
        }
        if collect_power {
            // No portable power source
            cpu.insert("power_w".to_string(), Value::Null);
        }
        Value::Object(cpu)
    }

    fn collect_memory(&mut self) -> Value {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let used = self.system.used_memory();
        json!({
            "total": total,
            "used": used,
            "available": self.system.available_memory(),
            "percent": percent(used, total),
        })
    }
}

impl Default for SysinfoCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for SysinfoCollector {
    fn collect(&mut self, runtime: &RuntimeConfig) -> Option<Value> {
        let mut sample = Map::new();

        if let Some(item) = runtime.monitor_item("cpu").filter(|i| i.enabled) {
            let cpu = self.collect_cpu(item.collect_temp(), item.collect_power());
            sample.insert("cpu".to_string(), cpu);
        }

        if runtime.is_item_enabled("memory") {
            sample.insert("memory".to_string(), self.collect_memory());
        }

        if runtime.is_item_enabled("disk") {
            let disks = select_disks(all_disks(), &runtime.disk_paths());
            sample.insert("disk".to_string(), Value::Array(disks));
        }

        if runtime.is_item_enabled("gpu") {
            sample.insert("gpus".to_string(), Value::Array(Vec::new()));
        }

        if sample.is_empty() {
            info!("All monitor items disabled, nothing collected");
            return None;
        }

        debug!(families = sample.len(), "Collected sample");
        Some(Value::Object(sample))
    }
}

fn all_disks() -> Vec<Value> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| !d.file_system().is_empty())
        .map(|d| {
            let total = d.total_space();
            let free = d.available_space();
            let used = total.saturating_sub(free);
            json!({
                "device": d.name().to_string_lossy(),
                "mountpoint": d.mount_point().to_string_lossy(),
                "fstype": d.file_system().to_string_lossy(),
                "total": total,
                "used": used,
                "free": free,
                "percent": percent(used, total),
            })
        })
        .collect()
}

/// Keep the configured mount points, or every disk if the paths are unusable here
fn select_disks(disks: Vec<Value>, paths: &[String]) -> Vec<Value> {
    if paths.is_empty() || paths.iter().any(|p| !is_local_path(p)) {
        debug!(paths = ?paths, count = disks.len(), "Reporting all disks");
        return disks;
    }

    disks
        .into_iter()
        .filter(|d| {
            d.get("mountpoint")
                .and_then(Value::as_str)
                .is_some_and(|m| paths.iter().any(|p| p == m))
        })
        .collect()
}

/// Whether `path` looks like a mount point on this platform
fn is_local_path(path: &str) -> bool {
    if path.is_empty() || path.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    if cfg!(windows) {
        path.as_bytes().get(1) == Some(&b':')
    } else {
        path.starts_with('/')
    }
}

fn cpu_temperature() -> Option<f64> {
    let components = Components::new_with_refreshed_list();
    components
        .list()
        .iter()
        .filter(|c| {
            let label = c.label().to_lowercase();
            label.contains("cpu") || label.contains("core") || label.contains("package")
        })
        .map(|c| c.temperature() as f64)
        .filter(|t| t.is_finite() && *t > 0.0)
        .reduce(f64::max)
        .map(round1)
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(part as f64 / total as f64 * 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
