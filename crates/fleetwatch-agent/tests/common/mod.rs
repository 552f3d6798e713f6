//! Shared fixtures for the agent integration tests

#![allow(dead_code)]

use fleetwatch_agent::{
    derive_credential, Agent, AgentConfig, DeviceInfo, DurableQueue, LifecycleRecord,
    ManualClock, MemoryIdentityStore, MemoryLifecycleStore, MetricsCollector, RuntimeConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const SECRET: &str = "fleet-secret";
pub const START: i64 = 1_700_000_000;

/// Collector returning a fixed CPU/memory sample
pub struct StaticCollector;

impl MetricsCollector for StaticCollector {
    fn collect(&mut self, runtime: &RuntimeConfig) -> Option<Value> {
        if !runtime.monitoring_enabled() {
            return None;
        }
        Some(json!({
            "cpu": {"usage_percent": 12.5},
            "memory": {"percent": 40.0},
            "gpus": [{"name": "GPU0", "util_percent": null}]
        }))
    }
}

/// Accepts a registration with the credential derived for the posted client id
pub struct AcceptRegistration {
    pub base_url: String,
    pub report_interval: u64,
    pub is_active: bool,
}

impl AcceptRegistration {
    pub fn new(server: &MockServer) -> Self {
        Self {
            base_url: server.uri(),
            report_interval: 45,
            is_active: true,
        }
    }
}

impl Respond for AcceptRegistration {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let client_id = body["client_id"].as_str().unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "accepted",
            "server_id": 7,
            "auth_token": derive_credential(SECRET, client_id).as_str(),
            "report_url": format!("{}/api/agent/report", self.base_url),
            "report_interval": self.report_interval,
            "monitor_items": {
                "cpu": {"enabled": true},
                "memory": {"enabled": true},
                "disk": {"enabled": true},
                "gpu": {"enabled": true}
            },
            "is_active": self.is_active
        }))
    }
}

/// Test agent plus handles on its injected collaborators
pub struct Harness {
    pub agent: Agent,
    pub clock: ManualClock,
    pub ids: Arc<MemoryIdentityStore>,
    pub lifecycle: Arc<MemoryLifecycleStore>,
    pub queue: Arc<DurableQueue>,
}

pub struct HarnessBuilder {
    url: String,
    ids: Arc<MemoryIdentityStore>,
    lifecycle: Arc<MemoryLifecycleStore>,
    clock: ManualClock,
    inspect: bool,
}

impl HarnessBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ids: Arc::new(MemoryIdentityStore::new()),
            lifecycle: Arc::new(MemoryLifecycleStore::new()),
            clock: ManualClock::at_unix(START),
            inspect: false,
        }
    }

    /// Build the agent the way the one-shot CLI commands do
    pub fn inspect(mut self) -> Self {
        self.inspect = true;
        self
    }

    pub fn device_id(mut self, id: &str) -> Self {
        self.ids = Arc::new(MemoryIdentityStore::with_id(id));
        self
    }

    pub fn identity_store(mut self, ids: Arc<MemoryIdentityStore>) -> Self {
        self.ids = ids;
        self
    }

    pub fn record(mut self, record: LifecycleRecord) -> Self {
        self.lifecycle = Arc::new(MemoryLifecycleStore::with_record(record));
        self
    }

    pub fn lifecycle_store(mut self, store: Arc<MemoryLifecycleStore>) -> Self {
        self.lifecycle = store;
        self
    }

    pub fn build(self) -> Harness {
        let mut config = AgentConfig::default();
        config.server.url = self.url;
        config.server.shared_secret = SECRET.to_string();

        let queue = Arc::new(DurableQueue::in_memory(Arc::new(self.clock.clone())).unwrap());
        let mut builder = Agent::builder(config);
        if self.inspect {
            builder = builder.inspect();
        }
        let agent = builder
            .clock(Arc::new(self.clock.clone()))
            .identity_store(self.ids.clone())
            .lifecycle_store(self.lifecycle.clone())
            .queue(queue.clone())
            .collector(Box::new(StaticCollector))
            .device(DeviceInfo {
                hostname: "edge-01".to_string(),
                os: "Ubuntu 22.04.4 LTS".to_string(),
            })
            .build()
            .unwrap();

        Harness {
            agent,
            clock: self.clock,
            ids: self.ids,
            lifecycle: self.lifecycle,
            queue,
        }
    }
}

pub async fn mount_register(server: &MockServer, responder: impl Respond + 'static) {
    Mock::given(method("POST"))
        .and(path("/api/agent/register"))
        .respond_with(responder)
        .mount(server)
        .await;
}

pub async fn mount_report(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/api/agent/report"))
        .respond_with(template)
        .mount(server)
        .await;
}

/// JSON bodies posted to `endpoint`, in arrival order
pub async fn bodies(server: &MockServer, endpoint: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == endpoint)
        .filter_map(|r| serde_json::from_slice(&r.body).ok())
        .collect()
}
