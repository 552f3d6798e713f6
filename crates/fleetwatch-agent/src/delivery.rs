//! Delivery engine
//!
//! Sends samples to the report endpoint, either immediately (first sample after
//! registration, heartbeats) or by draining the durable queue in batches. Every
//! accepted response is merged into the runtime config; a deletion signal is handed
//! to the [`DeletionHandler`].

use crate::client::CollectorClient;
use crate::clock::Clock;
use crate::error::{AgentError, AgentResult};
use crate::identity::{Credential, IdentityProvider};
use crate::lifecycle::DeletionHandler;
use crate::queue::{DurableQueue, QueueRecord};
use crate::runtime::RuntimeConfig;
use crate::types::{ResponseStatus, ServerResponse};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// GPU fields the service requires to be numeric
const GPU_NUMERIC_FIELDS: [&str; 5] = [
    "memory_total",
    "memory_used",
    "memory_util_percent",
    "util_percent",
    "frequency_mhz",
];

/// Result of one send
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Accepted by the service
    Delivered { records: usize },
    /// The service reported this device as deleted
    Deleted,
    /// The service answered with a status other than `accepted`
    Rejected { status: String, message: Option<String> },
    /// The request failed; queued records stay unsent
    Failed(AgentError),
    /// Nothing to send, or no report URL configured
    Skipped,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Delivery statistics
#[derive(Debug, Clone, Default)]
pub struct DeliveryStats {
    pub records_delivered: u64,
    pub batches_sent: u64,
    pub sends_failed: u64,
}

/// Report sender
pub struct Sender {
    client: Arc<CollectorClient>,
    identity: IdentityProvider,
    queue: Arc<DurableQueue>,
    clock: Arc<dyn Clock>,
    batch_size: usize,

    records_delivered: AtomicU64,
    batches_sent: AtomicU64,
    sends_failed: AtomicU64,
}

impl Sender {
    pub fn new(
        client: Arc<CollectorClient>,
        identity: IdentityProvider,
        queue: Arc<DurableQueue>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            identity,
            queue,
            clock,
            batch_size: batch_size.max(1),
            records_delivered: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            sends_failed: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            sends_failed: self.sends_failed.load(Ordering::Relaxed),
        }
    }

    /// Send one payload, bypassing the queue
    ///
    /// On failure the caller decides whether to fall back to the queue.
    pub async fn send_immediate(
        &self,
        mut payload: Value,
        runtime: &mut RuntimeConfig,
        handler: &mut dyn DeletionHandler,
    ) -> DeliveryOutcome {
        let Some(url) = runtime.report_url().map(str::to_string) else {
            debug!("No report URL configured, skipping immediate send");
            return DeliveryOutcome::Skipped;
        };

        let (device_id, credential) = match self.fresh_identity() {
            Ok(identity) => identity,
            Err(e) => return self.failed(e),
        };
        set_client_id(&mut payload, &device_id);

        let result = self.client.report(&url, &credential, &payload).await;
        let outcome = self.handle_response(result, &credential, 1, runtime, handler);
        match &outcome {
            DeliveryOutcome::Delivered { .. } => {
                debug!(endpoint = %url, "Immediate send delivered");
            }
            DeliveryOutcome::Failed(e) => {
                warn!(endpoint = %url, "Immediate send failed: {}", e);
            }
            _ => {}
        }
        outcome
    }

    /// Drain up to one batch of unsent queue records
    pub async fn send_batch(
        &self,
        runtime: &mut RuntimeConfig,
        handler: &mut dyn DeletionHandler,
    ) -> DeliveryOutcome {
        let Some(url) = runtime.report_url().map(str::to_string) else {
            debug!("No report URL configured, skipping batch send");
            return DeliveryOutcome::Skipped;
        };

        let records = match self.queue.get_unsent(self.batch_size) {
            Ok(records) if records.is_empty() => return DeliveryOutcome::Skipped,
            Ok(records) => records,
            Err(e) => {
                error!("Failed to read queue: {}", e);
                return self.failed(e);
            }
        };

        let (device_id, credential) = match self.fresh_identity() {
            Ok(identity) => identity,
            Err(e) => return self.failed(e),
        };

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let payload = prepare_batch(&records, &device_id);
        info!(endpoint = %url, count = payload.len(), "Sending queued samples");

        let result = self.client.report(&url, &credential, &payload).await;
        let outcome = self.handle_response(result, &credential, records.len(), runtime, handler);

        match &outcome {
            DeliveryOutcome::Delivered { .. } => {
                if let Err(e) = self.queue.mark_sent(&ids) {
                    // The records will be sent again next tick
                    error!(count = ids.len(), "Failed to mark records as sent: {}", e);
                }
                self.batches_sent.fetch_add(1, Ordering::Relaxed);
                for record in &payload {
                    info!(summary = %summarize(record), "Delivered sample");
                }
                for record in &records {
                    debug!(record_id = record.id, timestamp = record.timestamp, "Marked sent");
                }
            }
            DeliveryOutcome::Failed(e) => {
                warn!(
                    endpoint = %url,
                    count = ids.len(),
                    "Batch send failed, records stay queued: {}", e
                );
            }
            _ => {}
        }
        outcome
    }

    fn handle_response(
        &self,
        result: AgentResult<ServerResponse>,
        credential: &Credential,
        records: usize,
        runtime: &mut RuntimeConfig,
        handler: &mut dyn DeletionHandler,
    ) -> DeliveryOutcome {
        let response = match result {
            Ok(response) => response,
            Err(e) => return self.failed(e),
        };

        if response.is_device_deleted() {
            warn!("Report answered with a deletion signal");
            self.sends_failed.fetch_add(1, Ordering::Relaxed);
            handler.on_device_deleted(runtime);
            return DeliveryOutcome::Deleted;
        }

        match response.status() {
            ResponseStatus::Accepted => {
                let changes = runtime.apply_update(&response, credential, self.clock.now());
                if !changes.is_empty() {
                    info!(?changes, "Applied configuration from report response");
                }
                if !runtime.is_active() {
                    info!("Service has monitoring disabled, switching to heartbeats");
                }
                self.records_delivered
                    .fetch_add(records as u64, Ordering::Relaxed);
                DeliveryOutcome::Delivered { records }
            }
            status => {
                warn!(%status, message = ?response.message, "Report not accepted");
                self.sends_failed.fetch_add(1, Ordering::Relaxed);
                DeliveryOutcome::Rejected {
                    status: status.to_string(),
                    message: response.message,
                }
            }
        }
    }

    /// Identifier and credential, derived at send time so a rotation is honored immediately
    fn fresh_identity(&self) -> AgentResult<(String, Credential)> {
        let (device_id, credential) = self.identity.current()?;
        if !credential.is_valid() {
            return Err(AgentError::Config("shared secret is not set".to_string()));
        }
        Ok((device_id, credential))
    }

    fn failed(&self, e: AgentError) -> DeliveryOutcome {
        self.sends_failed.fetch_add(1, Ordering::Relaxed);
        if e.is_transport() {
            warn!("Collection service unreachable: {}", e);
        } else {
            error!("Delivery failed: {}", e);
        }
        DeliveryOutcome::Failed(e)
    }
}

fn set_client_id(payload: &mut Value, device_id: &str) {
    if let Some(object) = payload.as_object_mut() {
        object.insert("client_id".to_string(), Value::String(device_id.to_string()));
    }
}

/// Rewrite queued samples for the current identity and the service's GPU schema
fn prepare_batch(records: &[QueueRecord], device_id: &str) -> Vec<Value> {
    records
        .iter()
        .map(|record| {
            let mut payload = record.payload.clone();
            set_client_id(&mut payload, device_id);
            if let Some(gpus) = payload.get_mut("gpus").and_then(Value::as_array_mut) {
                for gpu in gpus.iter_mut().filter_map(Value::as_object_mut) {
                    for key in GPU_NUMERIC_FIELDS {
                        if gpu.get(key).is_none_or(Value::is_null) {
                            gpu.insert(key.to_string(), Value::from(0));
                        }
                    }
                }
            }
            payload
        })
        .collect()
}

/// One-line description of a sample for the delivery log
fn summarize(sample: &Value) -> String {
    let mut parts = Vec::new();
    if let Some(ts) = sample.get("timestamp").and_then(Value::as_i64) {
        parts.push(format!("ts={}", ts));
    }
    if let Some(cpu) = sample.get("cpu") {
        let usage = cpu.get("usage_percent").and_then(Value::as_f64).unwrap_or(0.0);
        parts.push(format!("cpu={:.1}%", usage));
    }
    if let Some(memory) = sample.get("memory") {
        let percent = memory.get("percent").and_then(Value::as_f64).unwrap_or(0.0);
        parts.push(format!("mem={:.1}%", percent));
    }
    if let Some(disks) = sample.get("disk").and_then(Value::as_array) {
        parts.push(format!("disks={}", disks.len()));
    }
    if let Some(gpus) = sample.get("gpus").and_then(Value::as_array) {
        parts.push(format!("gpus={}", gpus.len()));
    }
    parts.join(" ")
}
