//! Fleetwatch agent core
//!
//! Device lifecycle and reliable delivery for the fleetwatch telemetry agent: the
//! agent registers its host with a collection service, reports hardware metrics on
//! an interval and keeps delivering through outages, server-side deletion and local
//! errors.
//!
//! ## Components
//!
//! - **Identity** - stable device identifier and the HMAC credential derived from it
//! - **Durable queue** - SQLite buffer of samples awaiting delivery
//! - **Monitoring window** - continuous, scheduled or countdown collection windows
//! - **Heartbeats** - liveness messages when no metrics are due
//! - **Lifecycle** - registration, deletion, error recovery and identity rotation
//! - **Delivery** - immediate and batched reporting with server config push
//! - **Agent** - the loop tying it all together
//!
//! ## Quick Start
//!
//! ```no_run
//! use fleetwatch_agent::{shutdown_channel, Agent, ConfigLoader};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?;
//!     let mut agent = Agent::from_config(config)?;
//!
//!     let (trigger, shutdown) = shutdown_channel();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         trigger.trigger();
//!     });
//!
//!     agent.run(shutdown).await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod client;
pub mod clock;
pub mod collector;
pub mod config;
pub mod delivery;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod lifecycle;
pub mod monitor_window;
pub mod queue;
pub mod runtime;
pub mod shutdown;
pub mod types;

// Re-exports for convenience
pub use agent::{Agent, AgentBuilder, AgentStatus};
pub use client::{CollectorClient, Endpoints, HttpClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{MetricsCollector, SysinfoCollector};
pub use config::{AgentConfig, ConfigError, ConfigLoader};
pub use delivery::{DeliveryOutcome, DeliveryStats, Sender};
pub use error::{AgentError, AgentResult};
pub use heartbeat::{HeartbeatManager, HeartbeatReason};
pub use identity::{
    derive_credential, Credential, FileIdentityStore, IdentityProvider, IdentityStore,
    MemoryIdentityStore,
};
pub use lifecycle::{
    sleep_retry_delay, DeletionHandler, ErrorInfo, FileLifecycleStore, LifecycleManager,
    LifecycleRecord, LifecycleState, LifecycleStore, MemoryLifecycleStore, RegistrationOutcome,
};
pub use monitor_window::{MonitorMode, MonitorModeConfig, WindowStatus};
pub use queue::{DurableQueue, QueueRecord, QueueStats};
pub use runtime::RuntimeConfig;
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
pub use types::{DeviceInfo, ResponseStatus, ServerResponse};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
