//! Orchestration loop
//!
//! [`Agent::step`] performs one unit of work for the current lifecycle state and
//! returns how long to wait before the next one. [`Agent::run`] is the only place
//! that sleeps.

use crate::client::CollectorClient;
use crate::clock::{Clock, SystemClock};
use crate::collector::{MetricsCollector, SysinfoCollector};
use crate::config::AgentConfig;
use crate::delivery::{DeliveryStats, Sender};
use crate::error::{AgentError, AgentResult};
use crate::heartbeat::{
    should_force_heartbeat, HeartbeatManager, HeartbeatReason, HeartbeatStats, MinimalHeartbeat,
};
use crate::identity::{FileIdentityStore, IdentityProvider, IdentityStore};
use crate::lifecycle::{
    sleep_retry_delay, ErrorInfo, FileLifecycleStore, LifecycleManager, LifecycleRecord,
    LifecycleState, LifecycleStore, RegistrationOutcome,
};
use crate::queue::{DurableQueue, QueueStats};
use crate::runtime::RuntimeConfig;
use crate::shutdown::Shutdown;
use crate::types::DeviceInfo;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Builder for [`Agent`]
///
/// Anything not supplied is created from the config: file stores under the data
/// directory, the system clock, the detected host and the sysinfo collector.
pub struct AgentBuilder {
    config: AgentConfig,
    clock: Option<Arc<dyn Clock>>,
    identity_store: Option<Arc<dyn IdentityStore>>,
    lifecycle_store: Option<Arc<dyn LifecycleStore>>,
    queue: Option<Arc<DurableQueue>>,
    collector: Option<Box<dyn MetricsCollector>>,
    device: Option<DeviceInfo>,
    inspect: bool,
}

impl AgentBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            clock: None,
            identity_store: None,
            lifecycle_store: None,
            queue: None,
            collector: None,
            device: None,
            inspect: false,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identity_store = Some(store);
        self
    }

    pub fn lifecycle_store(mut self, store: Arc<dyn LifecycleStore>) -> Self {
        self.lifecycle_store = Some(store);
        self
    }

    pub fn queue(mut self, queue: Arc<DurableQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn collector(mut self, collector: Box<dyn MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn device(mut self, device: DeviceInfo) -> Self {
        self.device = Some(device);
        self
    }

    /// Skip the startup reset so the persisted state is seen as-is
    ///
    /// For one-shot commands run next to a live agent.
    pub fn inspect(mut self) -> Self {
        self.inspect = true;
        self
    }

    pub fn build(self) -> AgentResult<Agent> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let identity_store = self
            .identity_store
            .unwrap_or_else(|| Arc::new(FileIdentityStore::new(config.identity_path())));
        let identity = IdentityProvider::new(identity_store, &config.server.shared_secret);

        let lifecycle_store = self
            .lifecycle_store
            .unwrap_or_else(|| Arc::new(FileLifecycleStore::new(config.lifecycle_path())));
        let lifecycle = if self.inspect {
            LifecycleManager::inspect(
                lifecycle_store,
                identity.clone(),
                clock.clone(),
                config.lifecycle.clone(),
            )
        } else {
            LifecycleManager::load(
                lifecycle_store,
                identity.clone(),
                clock.clone(),
                config.lifecycle.clone(),
            )
        };

        let queue = match self.queue {
            Some(queue) => queue,
            None => Arc::new(DurableQueue::open(&config.queue_path(), clock.clone())?),
        };

        let device = self.device.unwrap_or_else(DeviceInfo::detect);
        let client = Arc::new(CollectorClient::new(&config.server, device)?);
        let sender = Sender::new(
            client.clone(),
            identity.clone(),
            queue.clone(),
            clock.clone(),
            config.queue.batch_size,
        );

        let collector = self
            .collector
            .unwrap_or_else(|| Box::new(SysinfoCollector::new()));

        Ok(Agent {
            runtime: RuntimeConfig::from_config(&config),
            config,
            lifecycle,
            client,
            sender,
            queue,
            heartbeat: HeartbeatManager::new(),
            collector,
            identity,
            last_activity: clock.unix_now(),
            clock,
            started: false,
        })
    }
}

/// Status snapshot for the CLI
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub device_id: Option<String>,
    pub secret_fingerprint: String,
    pub lifecycle: LifecycleRecord,
    pub error: ErrorInfo,
    pub queue: Option<QueueStats>,
    pub heartbeat: HeartbeatStats,
    pub report_url: Option<String>,
    pub report_interval_secs: u64,
}

/// The telemetry agent
pub struct Agent {
    config: AgentConfig,
    runtime: RuntimeConfig,
    lifecycle: LifecycleManager,
    client: Arc<CollectorClient>,
    sender: Sender,
    queue: Arc<DurableQueue>,
    heartbeat: HeartbeatManager,
    collector: Box<dyn MetricsCollector>,
    identity: IdentityProvider,
    clock: Arc<dyn Clock>,
    /// Unix seconds of the last successful exchange with the service
    last_activity: i64,
    started: bool,
}

impl Agent {
    /// Agent with every collaborator created from `config`
    pub fn from_config(config: AgentConfig) -> AgentResult<Self> {
        AgentBuilder::new(config).build()
    }

    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    /// Agent over the persisted state, for status and maintenance commands
    pub fn inspect(config: AgentConfig) -> AgentResult<Self> {
        AgentBuilder::new(config).inspect().build()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    pub fn delivery_stats(&self) -> DeliveryStats {
        self.sender.stats()
    }

    pub fn status(&self) -> AgentStatus {
        let queue = match self.queue.stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Failed to read queue stats: {}", e);
                None
            }
        };

        AgentStatus {
            device_id: self.identity.stored_id().ok().flatten(),
            secret_fingerprint: self.identity.secret_fingerprint(),
            lifecycle: self.lifecycle.record().clone(),
            error: self.lifecycle.error_info(),
            queue,
            heartbeat: self.heartbeat.stats(self.clock.unix_now()),
            report_url: self.runtime.report_url().map(str::to_string),
            report_interval_secs: self.runtime.report_interval_secs(),
        }
    }

    /// Voluntarily leave the fleet
    pub async fn deregister(&mut self) -> AgentResult<()> {
        self.lifecycle.request_deletion(&self.client).await
    }

    /// Manually clear the ERROR state
    pub fn reset_error(&mut self) -> bool {
        self.lifecycle.force_reset_error()
    }

    /// Run until shutdown is requested
    pub async fn run(&mut self, mut shutdown: Shutdown) -> AgentResult<()> {
        info!(
            version = crate::VERSION,
            server = %self.config.server.url,
            "Agent starting"
        );

        while !shutdown.is_cancelled() {
            let delay = self.step().await;
            debug!(state = %self.state(), delay_secs = delay.as_secs(), "Next step scheduled");
            match shutdown.sleep(delay).await {
                Ok(()) => {}
                Err(AgentError::Cancelled) => break,
                Err(e) => return Err(e),
            }
        }

        info!("Agent stopped");
        Ok(())
    }

    /// One unit of work; returns the delay before the next step
    pub async fn step(&mut self) -> Duration {
        if !self.started {
            self.startup();
        }

        match self.lifecycle.state() {
            LifecycleState::Error { .. } => {
                if self.lifecycle.try_recover_from_error(&mut self.runtime) {
                    Duration::ZERO
                } else {
                    secs(self.config.timing.error_state_retry_secs)
                }
            }
            LifecycleState::Deleted | LifecycleState::Reinitialized => {
                self.lifecycle.enter_sleep_retry();
                sleep_retry_delay(0)
            }
            LifecycleState::Unregistered
            | LifecycleState::Registering
            | LifecycleState::SleepRetry { .. } => self.register().await,
            LifecycleState::Registered => self.tick().await,
        }
    }

    fn startup(&mut self) {
        self.started = true;
        self.last_activity = self.clock.unix_now();

        if self.lifecycle.has_pending_deletion() {
            info!("Pending deletion found at startup, reinitializing");
            self.lifecycle.reinitialize(&mut self.runtime);
        } else if self.lifecycle.state() == LifecycleState::Registered {
            // Refresh the runtime config from the server
            self.lifecycle.begin_registration();
        }
    }

    async fn register(&mut self) -> Duration {
        let timing = self.config.timing.clone();
        self.lifecycle.begin_registration();

        let result = match self.identity.device_id() {
            Ok(device_id) => {
                info!(device_id = %device_id, state = %self.state(), "Registering");
                self.client.register(&device_id).await
            }
            Err(e) => Err(e),
        };

        let outcome = self.lifecycle.handle_registration(result, &mut self.runtime);

        if let LifecycleState::SleepRetry { attempt } = self.state() {
            return sleep_retry_delay(attempt);
        }

        match outcome {
            RegistrationOutcome::Registered => {
                self.last_activity = self.clock.unix_now();
                self.first_report().await;
                if self.state() != LifecycleState::Registered {
                    return Duration::ZERO;
                }
                self.next_tick_delay()
            }
            RegistrationOutcome::Pending => secs(timing.register_retry_secs),
            RegistrationOutcome::Rejected { .. } => secs(timing.register_rejected_retry_secs),
            RegistrationOutcome::Reinitialized => Duration::ZERO,
            RegistrationOutcome::Inactive => secs(timing.server_inactive_retry_secs),
            RegistrationOutcome::ConfigIncomplete => secs(timing.config_incomplete_retry_secs),
            RegistrationOutcome::Failed(_) => secs(timing.register_retry_secs),
        }
    }

    /// Send the first sample right after registration; queue it if that fails
    async fn first_report(&mut self) {
        let Some(sample) = self.collect_sample() else {
            return;
        };

        let outcome = self
            .sender
            .send_immediate(sample.clone(), &mut self.runtime, &mut self.lifecycle)
            .await;
        if outcome.is_success() {
            info!("First report delivered");
            self.last_activity = self.clock.unix_now();
        } else {
            warn!(outcome = ?outcome, "First report not delivered, queueing");
            self.save_to_queue(&sample);
        }
    }

    /// One REGISTERED tick
    async fn tick(&mut self) -> Duration {
        let now = self.clock.now();

        if should_force_heartbeat(
            self.last_activity,
            now.timestamp(),
            self.config.timing.silence_threshold_secs,
        ) {
            self.send_minimal_heartbeat(now).await;
            if self.state() != LifecycleState::Registered {
                return Duration::ZERO;
            }
        }

        let local_now = now.with_timezone(&Local);
        if let Some(reason) = self.heartbeat.should_send_heartbeat(&self.runtime, &local_now) {
            self.send_heartbeat(reason, &local_now).await;
            if self.state() != LifecycleState::Registered {
                return Duration::ZERO;
            }
            return self.next_tick_delay();
        }

        let Some(sample) = self.collect_sample() else {
            return self.next_tick_delay();
        };
        self.save_to_queue(&sample);

        let outcome = self.sender.send_batch(&mut self.runtime, &mut self.lifecycle).await;
        if outcome.is_success() {
            self.last_activity = self.clock.unix_now();
        }

        if self.state().is_deletion_path() {
            return Duration::ZERO;
        }

        match self.queue.prune(self.config.timing.cache_max_age_secs) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Pruned old queue records"),
            Err(e) => error!("Failed to prune queue: {}", e),
        }

        self.next_tick_delay()
    }

    async fn send_heartbeat(&mut self, reason: HeartbeatReason, now: &DateTime<Local>) {
        let device_id = match self.identity.device_id() {
            Ok(id) => id,
            Err(e) => {
                error!("Cannot send heartbeat without a device id: {}", e);
                return;
            }
        };
        let hostname = self.client.device().hostname.clone();
        let heartbeat =
            self.heartbeat
                .build_heartbeat(reason, device_id, hostname, &self.runtime, now);
        let sequence = heartbeat.heartbeat_sequence;

        let payload = match serde_json::to_value(&heartbeat) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode heartbeat: {}", e);
                return;
            }
        };

        info!(sequence, %reason, "Sending heartbeat");
        let outcome = self
            .sender
            .send_immediate(payload, &mut self.runtime, &mut self.lifecycle)
            .await;
        if outcome.is_success() {
            self.heartbeat.record_success(sequence, now.timestamp());
            self.last_activity = self.clock.unix_now();
        } else {
            warn!(sequence, outcome = ?outcome, "Heartbeat not delivered");
        }
    }

    async fn send_minimal_heartbeat(&mut self, now: DateTime<Utc>) {
        let device_id = match self.identity.device_id() {
            Ok(id) => id,
            Err(e) => {
                error!("Cannot send heartbeat without a device id: {}", e);
                return;
            }
        };
        let heartbeat = MinimalHeartbeat::new(
            HeartbeatReason::Silence,
            device_id,
            self.client.device().hostname.clone(),
            now,
        );

        let payload = match serde_json::to_value(&heartbeat) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode heartbeat: {}", e);
                return;
            }
        };

        warn!(
            silence_secs = now.timestamp() - self.last_activity,
            "Forcing minimal heartbeat"
        );
        let outcome = self
            .sender
            .send_immediate(payload, &mut self.runtime, &mut self.lifecycle)
            .await;
        if outcome.is_success() {
            self.last_activity = self.clock.unix_now();
        }
    }

    /// Collect and stamp a sample; `None` when nothing is enabled
    fn collect_sample(&mut self) -> Option<Value> {
        let mut sample = self.collector.collect(&self.runtime)?;
        let device_id = self.identity.device_id().unwrap_or_default();
        if let Some(object) = sample.as_object_mut() {
            object.insert("timestamp".to_string(), Value::from(self.clock.unix_now()));
            object.insert("client_id".to_string(), Value::from(device_id));
            object.insert(
                "hostname".to_string(),
                Value::from(self.client.device().hostname.clone()),
            );
        }
        Some(sample)
    }

    fn save_to_queue(&self, sample: &Value) {
        match self.queue.save(sample) {
            Ok(id) => debug!(record_id = id, "Sample queued"),
            Err(e) => error!("Failed to queue sample: {}", e),
        }
    }

    fn next_tick_delay(&self) -> Duration {
        secs(self.runtime.report_interval_secs())
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}
