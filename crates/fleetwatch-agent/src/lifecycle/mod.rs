//! Device lifecycle management
//!
//! Owns the registration/deletion/error state, persists every transition, and
//! implements error recovery and identity rotation after a deletion signal.
//!
//! ## States
//!
//! ```text
//! UNREGISTERED -> REGISTERING -> REGISTERED
//!                      |              |
//!                      v              v (deleted)
//!                    ERROR ------> DELETED -> REINITIALIZED -> SLEEP_RETRY -> REGISTERED
//! ```
//!
//! Persistence failures are logged; the in-memory state stays authoritative.

mod state;
mod store;

pub use state::{sleep_retry_delay, LifecycleState};
pub use store::{
    FileLifecycleStore, LifecycleRecord, LifecycleStore, MemoryLifecycleStore, Transition,
    HISTORY_LIMIT,
};

use crate::client::CollectorClient;
use crate::clock::Clock;
use crate::config::LifecycleSettings;
use crate::error::{AgentError, AgentResult};
use crate::identity::{Credential, IdentityProvider};
use crate::runtime::RuntimeConfig;
use crate::types::{ResponseStatus, ServerResponse};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Receives deletion signals from the delivery engine
pub trait DeletionHandler {
    /// The service says this device record no longer exists
    fn on_device_deleted(&mut self, runtime: &mut RuntimeConfig);
}

/// Result of processing one registration attempt
#[derive(Debug)]
pub enum RegistrationOutcome {
    /// Accepted with a matching credential and complete config
    Registered,
    /// Awaiting approval
    Pending,
    /// Refused by the service
    Rejected { message: String },
    /// The device was deleted and its identity rotated
    Reinitialized,
    /// Accepted, but the service has monitoring switched off
    Inactive,
    /// Accepted, but the report URL or credential is still missing
    ConfigIncomplete,
    /// Transport, protocol, credential or status failure
    Failed(AgentError),
}

/// Snapshot of the error state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub in_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    pub duration_secs: i64,
    pub retry_count: u32,
    /// Seconds until time-based auto-recovery
    pub auto_recovery_in: i64,
}

/// Lifecycle state manager
pub struct LifecycleManager {
    record: LifecycleRecord,
    store: Arc<dyn LifecycleStore>,
    identity: IdentityProvider,
    clock: Arc<dyn Clock>,
    settings: LifecycleSettings,
}

impl LifecycleManager {
    /// Restore the persisted record, applying the startup reset policy
    pub fn load(
        store: Arc<dyn LifecycleStore>,
        identity: IdentityProvider,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        let mut manager = Self::inspect(store, identity, clock, settings);

        match manager.state() {
            LifecycleState::Error { .. } if manager.settings.auto_reset_error_on_startup => {
                manager.transition(LifecycleState::Unregistered, "startup reset of ERROR");
            }
            LifecycleState::Registering if manager.settings.auto_reset_registering_on_startup => {
                manager.transition(LifecycleState::Unregistered, "startup reset of REGISTERING");
            }
            _ => {}
        }

        info!(state = %manager.state(), "Lifecycle restored");
        manager
    }

    /// Restore the persisted record as-is, without the startup reset
    ///
    /// Nothing is written until a transition happens, so this is safe to use
    /// alongside a running agent.
    pub fn inspect(
        store: Arc<dyn LifecycleStore>,
        identity: IdentityProvider,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        let record = match store.load() {
            Ok(Some(record)) => record,
            Ok(None) => LifecycleRecord::default(),
            Err(e) => {
                warn!("Unreadable lifecycle record, starting fresh: {}", e);
                LifecycleRecord::default()
            }
        };

        Self {
            record,
            store,
            identity,
            clock,
            settings,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.record.current
    }

    pub fn record(&self) -> &LifecycleRecord {
        &self.record
    }

    pub fn identity(&self) -> &IdentityProvider {
        &self.identity
    }

    /// Whether a voluntary deletion notice is outstanding
    pub fn has_pending_deletion(&self) -> bool {
        self.record.pending_deletion_at.is_some()
    }

    /// Enter REGISTERING before a registration attempt
    ///
    /// No-op in the deletion path and in ERROR.
    pub fn begin_registration(&mut self) {
        match self.state() {
            LifecycleState::Unregistered | LifecycleState::Registered => {
                self.transition(LifecycleState::Registering, "registration attempt");
            }
            _ => {}
        }
    }

    /// Apply the result of one registration attempt
    pub fn handle_registration(
        &mut self,
        result: AgentResult<ServerResponse>,
        runtime: &mut RuntimeConfig,
    ) -> RegistrationOutcome {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!(state = %self.state(), "Registration request failed: {}", e);
                return self.registration_failed(e);
            }
        };

        if response.is_device_deleted() {
            warn!("Registration answered with a deletion signal");
            self.handle_device_deleted(runtime);
            return RegistrationOutcome::Reinitialized;
        }

        match response.status() {
            ResponseStatus::Pending => {
                info!("Registration pending approval");
                self.advance_sleep_retry();
                RegistrationOutcome::Pending
            }
            ResponseStatus::Rejected => {
                let message = response
                    .message
                    .clone()
                    .unwrap_or_else(|| "no reason given".to_string());
                warn!(reason = %message, "Registration rejected");
                self.advance_sleep_retry();
                RegistrationOutcome::Rejected { message }
            }
            ResponseStatus::Accepted => self.accept_registration(&response, runtime),
            ResponseStatus::Deleted => {
                self.handle_device_deleted(runtime);
                RegistrationOutcome::Reinitialized
            }
            ResponseStatus::Unknown(status) => {
                error!(status = %status, "Unknown registration status");
                self.registration_failed(AgentError::UnknownStatus(status))
            }
        }
    }

    fn accept_registration(
        &mut self,
        response: &ServerResponse,
        runtime: &mut RuntimeConfig,
    ) -> RegistrationOutcome {
        let (device_id, local) = match self.identity.current() {
            Ok(current) => current,
            Err(e) => return self.registration_failed(e),
        };

        let Some(server_token) = response.auth_token.as_deref().filter(|t| !t.is_empty()) else {
            error!("Accepted registration carries no auth_token");
            return self.registration_failed(AgentError::protocol("missing auth_token"));
        };

        if !local.matches(server_token) {
            let err = AgentError::CredentialMismatch {
                server: Credential::fingerprint_of(server_token),
                local: local.fingerprint(),
            };
            error!(
                device_id = %device_id,
                secret = %self.identity.secret_fingerprint(),
                "{}", err
            );
            self.enter_error("credential mismatch");
            return RegistrationOutcome::Failed(err);
        }

        let missing = response.missing_registration_fields();
        if !missing.is_empty() {
            error!(missing = ?missing, "Accepted registration is missing required fields");
            return self.registration_failed(AgentError::protocol(format!(
                "missing fields: {}",
                missing.join(", ")
            )));
        }

        let missing = response.missing_monitor_items();
        if !missing.is_empty() {
            error!(missing = ?missing, "monitor_items lacks required families");
            return self.registration_failed(AgentError::protocol(format!(
                "missing monitor items: {}",
                missing.join(", ")
            )));
        }

        runtime.apply_update(response, &local, self.clock.now());

        if !runtime.is_active() {
            error!("Service has monitoring disabled for this device");
            self.enter_error("server inactive");
            return RegistrationOutcome::Inactive;
        }

        if runtime.report_url().is_none() || runtime.auth_token().is_none() {
            error!(
                report_url = ?runtime.report_url(),
                has_credential = runtime.auth_token().is_some(),
                "Configuration incomplete after registration"
            );
            self.enter_error("configuration incomplete");
            return RegistrationOutcome::ConfigIncomplete;
        }

        let reactivated = matches!(self.state(), LifecycleState::SleepRetry { .. });
        if reactivated {
            self.record.last_reactivation_at = Some(self.clock.unix_now());
        }
        self.transition(LifecycleState::Registered, "registration accepted");

        info!(
            server_id = ?runtime.server_id(),
            report_interval = runtime.report_interval_secs(),
            reactivated,
            "Device registered"
        );
        RegistrationOutcome::Registered
    }

    /// Record a failed registration attempt
    ///
    /// In SLEEP_RETRY the attempt counter advances; elsewhere the state becomes ERROR.
    pub fn registration_failed(&mut self, err: AgentError) -> RegistrationOutcome {
        if matches!(self.state(), LifecycleState::SleepRetry { .. }) {
            self.advance_sleep_retry();
        } else {
            self.enter_error(&format!("registration failed: {}", err));
        }
        RegistrationOutcome::Failed(err)
    }

    /// Leave ERROR once it has lasted long enough or failed often enough
    ///
    /// Returns `true` if the state left ERROR.
    pub fn try_recover_from_error(&mut self, runtime: &mut RuntimeConfig) -> bool {
        let LifecycleState::Error {
            started_at,
            retry_count,
        } = self.state()
        else {
            return false;
        };

        let duration = self.clock.unix_now() - started_at;
        let by_time = duration >= self.settings.error_recovery_after_secs as i64;
        let by_count = retry_count >= self.settings.max_error_retries;
        if !by_time && !by_count {
            return false;
        }

        info!(duration_secs = duration, retry_count, "Recovering from ERROR");
        if self.has_pending_deletion() {
            info!("Pending deletion marker found, reinitializing");
            self.reinitialize(runtime);
        } else {
            self.transition(LifecycleState::Unregistered, "error auto-recovery");
        }
        true
    }

    /// Deletion signal: DELETED, then immediately reinitialize
    pub fn handle_device_deleted(&mut self, runtime: &mut RuntimeConfig) {
        warn!(state = %self.state(), "Device deleted by the service");
        self.transition(LifecycleState::Deleted, "deletion signal");
        self.reinitialize(runtime);
    }

    /// Rotate identity, drop derived auth and land in REINITIALIZED
    pub fn reinitialize(&mut self, runtime: &mut RuntimeConfig) {
        let new_id = self.identity.rotate();
        runtime.clear_device_auth();

        let now = self.clock.unix_now();
        self.record.reinit_count += 1;
        self.record.last_reinit_at = Some(now);
        self.record.pending_deletion_at = None;
        self.transition(LifecycleState::Reinitialized, "reinitialize");

        info!(
            device_id = %new_id,
            reinit_count = self.record.reinit_count,
            "Device reinitialized"
        );
    }

    /// DELETED or REINITIALIZED -> SLEEP_RETRY at attempt 0
    pub fn enter_sleep_retry(&mut self) {
        if matches!(
            self.state(),
            LifecycleState::Deleted | LifecycleState::Reinitialized
        ) {
            self.transition(LifecycleState::SleepRetry { attempt: 0 }, "enter sleep-retry");
        }
    }

    fn advance_sleep_retry(&mut self) {
        if let LifecycleState::SleepRetry { attempt } = self.state() {
            let next = attempt.saturating_add(1);
            self.transition(LifecycleState::SleepRetry { attempt: next }, "sleep-retry attempt failed");
            info!(
                attempt = next,
                delay_secs = sleep_retry_delay(next).as_secs(),
                "Sleep-retry continues"
            );
        }
    }

    /// Notify the service of voluntary removal and set the pending-deletion marker
    ///
    /// The marker is persisted even if the notice cannot be delivered.
    pub async fn request_deletion(&mut self, client: &CollectorClient) -> AgentResult<()> {
        let (device_id, credential) = self.identity.current()?;
        let now = self.clock.unix_now();

        self.record.pending_deletion_at = Some(now);
        self.persist();

        match client.notify_deletion(&device_id, &credential, now).await {
            Ok(()) => {
                info!(device_id = %device_id, "Deletion notice accepted");
                Ok(())
            }
            Err(e) => {
                error!(device_id = %device_id, "Deletion notice failed: {}", e);
                Err(e)
            }
        }
    }

    /// Manual ERROR -> UNREGISTERED; returns whether anything changed
    pub fn force_reset_error(&mut self) -> bool {
        if self.state().is_error() {
            self.transition(LifecycleState::Unregistered, "manual reset");
            true
        } else {
            info!(state = %self.state(), "Not in ERROR, nothing to reset");
            false
        }
    }

    pub fn error_info(&self) -> ErrorInfo {
        let LifecycleState::Error {
            started_at,
            retry_count,
        } = self.state()
        else {
            return ErrorInfo::default();
        };

        let duration = (self.clock.unix_now() - started_at).max(0);
        ErrorInfo {
            in_error: true,
            started_at: Some(started_at),
            duration_secs: duration,
            retry_count,
            auto_recovery_in: (self.settings.error_recovery_after_secs as i64 - duration).max(0),
        }
    }

    /// Enter ERROR, or count another failure if already there
    fn enter_error(&mut self, reason: &str) {
        let next = match self.state() {
            LifecycleState::Error {
                started_at,
                retry_count,
            } => LifecycleState::Error {
                started_at,
                retry_count: retry_count.saturating_add(1),
            },
            _ => LifecycleState::Error {
                started_at: self.clock.unix_now(),
                retry_count: 0,
            },
        };
        self.transition(next, reason);
    }

    fn transition(&mut self, to: LifecycleState, reason: &str) {
        let from = self.record.current;
        if from == to {
            return;
        }

        let now = self.clock.unix_now();
        self.record.current = to;
        self.record.updated_at = now;
        self.record.push_history(Transition {
            from: from.name().to_string(),
            to: to.name().to_string(),
            at: now,
            reason: reason.to_string(),
        });

        if from.name() != to.name() {
            info!(from = %from, to = %to, reason, "State changed");
        }
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.record) {
            error!(state = %self.state(), "Failed to persist lifecycle record: {}", e);
        }
    }
}

impl DeletionHandler for LifecycleManager {
    fn on_device_deleted(&mut self, runtime: &mut RuntimeConfig) {
        self.handle_device_deleted(runtime);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::{derive_credential, IdentityStore, MemoryIdentityStore};
    use serde_json::json;

    const SECRET: &str = "fleet-secret";

    struct Harness {
        manager: LifecycleManager,
        store: Arc<MemoryLifecycleStore>,
        ids: Arc<MemoryIdentityStore>,
        clock: ManualClock,
        runtime: RuntimeConfig,
    }

    fn harness_with(record: Option<LifecycleRecord>) -> Harness {
        let store = Arc::new(match record {
            Some(r) => MemoryLifecycleStore::with_record(r),
            None => MemoryLifecycleStore::new(),
        });
        let ids = Arc::new(MemoryIdentityStore::with_id("dev-1"));
        let clock = ManualClock::at_unix(1_700_000_000);
        let manager = LifecycleManager::load(
            store.clone(),
            IdentityProvider::new(ids.clone(), SECRET),
            Arc::new(clock.clone()),
            LifecycleSettings::default(),
        );
        Harness {
            manager,
            store,
            ids,
            clock,
            runtime: RuntimeConfig::new("http://localhost/api/agent/report", 30),
        }
    }

    fn harness() -> Harness {
        harness_with(None)
    }

    fn accepted(token: &str) -> ServerResponse {
        serde_json::from_value(json!({
            "status": "accepted",
            "server_id": 9,
            "auth_token": token,
            "report_url": "http://collector/api/agent/report",
            "report_interval": 45,
            "monitor_items": {
                "cpu": {"enabled": true},
                "memory": {"enabled": true},
                "disk": {"enabled": true},
                "gpu": {"enabled": false}
            },
            "is_active": true
        }))
        .unwrap()
    }

    fn status(s: &str) -> ServerResponse {
        serde_json::from_value(json!({ "status": s })).unwrap()
    }

    fn local_token(h: &Harness) -> String {
        let id = h.manager.identity().device_id().unwrap();
        derive_credential(SECRET, &id).as_str().to_string()
    }

    #[test]
    fn test_pending_then_accepted() {
        let mut h = harness();
        h.manager.begin_registration();
        assert_eq!(h.manager.state(), LifecycleState::Registering);

        let outcome = h.manager.handle_registration(Ok(status("pending")), &mut h.runtime);
        assert!(matches!(outcome, RegistrationOutcome::Pending));
        assert_eq!(h.manager.state(), LifecycleState::Registering);

        let token = local_token(&h);
        let outcome = h.manager.handle_registration(Ok(accepted(&token)), &mut h.runtime);
        assert!(matches!(outcome, RegistrationOutcome::Registered));
        assert_eq!(h.manager.state(), LifecycleState::Registered);
        assert_eq!(h.runtime.report_interval_secs(), 45);
        assert_eq!(h.runtime.auth_token(), Some(token.as_str()));
        assert_eq!(
            h.store.snapshot().unwrap().current,
            LifecycleState::Registered
        );
    }

    #[test]
    fn test_rejected_stays_registering() {
        let mut h = harness();
        h.manager.begin_registration();
        let response: ServerResponse =
            serde_json::from_value(json!({"status": "rejected", "message": "not approved"})).unwrap();
        let outcome = h.manager.handle_registration(Ok(response), &mut h.runtime);
        assert!(matches!(outcome, RegistrationOutcome::Rejected { ref message } if message == "not approved"));
        assert_eq!(h.manager.state(), LifecycleState::Registering);
    }

    #[test]
    fn test_credential_mismatch_is_error() {
        let mut h = harness();
        h.manager.begin_registration();
        let outcome = h.manager.handle_registration(Ok(accepted("forged")), &mut h.runtime);
        assert!(matches!(
            outcome,
            RegistrationOutcome::Failed(AgentError::CredentialMismatch { .. })
        ));
        assert!(h.manager.state().is_error());
        assert!(h.runtime.auth_token().is_none());
    }

    #[test]
    fn test_missing_fields_is_error() {
        let mut h = harness();
        h.manager.begin_registration();
        let token = local_token(&h);
        let mut response = accepted(&token);
        response.report_interval = None;

        let outcome = h.manager.handle_registration(Ok(response), &mut h.runtime);
        assert!(matches!(outcome, RegistrationOutcome::Failed(AgentError::Protocol(_))));
        assert!(h.manager.state().is_error());
        // Nothing was applied
        assert_eq!(h.runtime.report_interval_secs(), 30);
    }

    #[test]
    fn test_inactive_server_is_error() {
        let mut h = harness();
        h.manager.begin_registration();
        let token = local_token(&h);
        let mut response = accepted(&token);
        response.is_active = Some(false);

        let outcome = h.manager.handle_registration(Ok(response), &mut h.runtime);
        assert!(matches!(outcome, RegistrationOutcome::Inactive));
        assert!(h.manager.state().is_error());
    }

    #[test]
    fn test_unknown_status_is_error() {
        let mut h = harness();
        h.manager.begin_registration();
        let outcome = h.manager.handle_registration(Ok(status("paused")), &mut h.runtime);
        assert!(matches!(
            outcome,
            RegistrationOutcome::Failed(AgentError::UnknownStatus(ref s)) if s == "paused"
        ));
        assert!(h.manager.state().is_error());
    }

    #[test]
    fn test_error_retry_count_and_time_recovery() {
        let mut h = harness();
        h.manager.begin_registration();

        for _ in 0..3 {
            h.manager.registration_failed(AgentError::Timeout);
        }
        assert_eq!(
            h.manager.state(),
            LifecycleState::Error {
                started_at: 1_700_000_000,
                retry_count: 2
            }
        );

        h.clock.advance_secs(299);
        assert!(!h.manager.try_recover_from_error(&mut h.runtime));
        assert_eq!(h.manager.error_info().auto_recovery_in, 1);

        h.clock.advance_secs(1);
        assert!(h.manager.try_recover_from_error(&mut h.runtime));
        assert_eq!(h.manager.state(), LifecycleState::Unregistered);
        assert_eq!(h.manager.error_info(), ErrorInfo::default());
    }

    #[test]
    fn test_error_recovery_by_count() {
        let mut h = harness();
        for _ in 0..11 {
            h.manager.registration_failed(AgentError::Timeout);
        }
        assert!(h.manager.try_recover_from_error(&mut h.runtime));
        assert_eq!(h.manager.state(), LifecycleState::Unregistered);
    }

    #[test]
    fn test_error_recovery_with_pending_deletion_reinitializes() {
        let mut h = harness();
        h.manager.record.pending_deletion_at = Some(1);
        h.manager.registration_failed(AgentError::Timeout);
        h.clock.advance_secs(300);

        assert!(h.manager.try_recover_from_error(&mut h.runtime));
        assert_eq!(h.manager.state(), LifecycleState::Reinitialized);
        assert!(!h.manager.has_pending_deletion());
        assert_ne!(h.ids.load().unwrap().as_deref(), Some("dev-1"));
    }

    #[test]
    fn test_deletion_rotates_identity_and_clears_auth() {
        let mut h = harness();
        h.manager.begin_registration();
        let token = local_token(&h);
        h.manager.handle_registration(Ok(accepted(&token)), &mut h.runtime);
        assert!(h.runtime.auth_token().is_some());

        h.manager.on_device_deleted(&mut h.runtime);

        assert_eq!(h.manager.state(), LifecycleState::Reinitialized);
        let history: Vec<&str> = h.manager.record().history.iter().map(|t| t.to.as_str()).collect();
        assert!(history.ends_with(&["DELETED", "REINITIALIZED"]));
        assert_ne!(h.manager.identity().device_id().unwrap(), "dev-1");
        assert!(h.runtime.auth_token().is_none());
        assert!(h.runtime.server_id().is_none());
        assert_eq!(h.manager.record().reinit_count, 1);
        assert_eq!(h.manager.record().last_reinit_at, Some(1_700_000_000));
    }

    #[test]
    fn test_sleep_retry_flow() {
        let mut h = harness();
        h.manager.handle_device_deleted(&mut h.runtime);
        h.manager.enter_sleep_retry();
        assert_eq!(h.manager.state(), LifecycleState::SleepRetry { attempt: 0 });

        h.manager.handle_registration(Err(AgentError::Timeout), &mut h.runtime);
        assert_eq!(h.manager.state(), LifecycleState::SleepRetry { attempt: 1 });
        h.manager.handle_registration(Ok(status("pending")), &mut h.runtime);
        h.manager.handle_registration(Ok(status("weird")), &mut h.runtime);
        assert_eq!(h.manager.state(), LifecycleState::SleepRetry { attempt: 3 });

        let token = local_token(&h);
        let outcome = h.manager.handle_registration(Ok(accepted(&token)), &mut h.runtime);
        assert!(matches!(outcome, RegistrationOutcome::Registered));
        assert_eq!(h.manager.state(), LifecycleState::Registered);
        assert_eq!(h.manager.record().last_reactivation_at, Some(1_700_000_000));
    }

    #[test]
    fn test_sleep_retry_deleted_again_reinitializes() {
        let mut h = harness();
        h.manager.handle_device_deleted(&mut h.runtime);
        h.manager.enter_sleep_retry();
        let first = h.manager.identity().device_id().unwrap();

        let outcome = h.manager.handle_registration(Ok(status("deleted")), &mut h.runtime);
        assert!(matches!(outcome, RegistrationOutcome::Reinitialized));
        assert_eq!(h.manager.state(), LifecycleState::Reinitialized);
        assert_ne!(h.manager.identity().device_id().unwrap(), first);
        assert_eq!(h.manager.record().reinit_count, 2);
    }

    #[test]
    fn test_startup_resets() {
        let h = harness_with(Some(LifecycleRecord {
            current: LifecycleState::Error {
                started_at: 1,
                retry_count: 4,
            },
            ..Default::default()
        }));
        assert_eq!(h.manager.state(), LifecycleState::Unregistered);

        let h = harness_with(Some(LifecycleRecord {
            current: LifecycleState::Registering,
            ..Default::default()
        }));
        assert_eq!(h.manager.state(), LifecycleState::Unregistered);

        let h = harness_with(Some(LifecycleRecord {
            current: LifecycleState::Registered,
            ..Default::default()
        }));
        assert_eq!(h.manager.state(), LifecycleState::Registered);
    }

    #[test]
    fn test_persist_failure_keeps_memory_state() {
        let mut h = harness();
        h.store.set_fail_saves(true);
        h.manager.begin_registration();
        assert_eq!(h.manager.state(), LifecycleState::Registering);
        assert!(h.store.snapshot().is_none());
    }

    #[test]
    fn test_force_reset_error() {
        let mut h = harness();
        assert!(!h.manager.force_reset_error());
        h.manager.registration_failed(AgentError::Timeout);
        assert!(h.manager.force_reset_error());
        assert_eq!(h.manager.state(), LifecycleState::Unregistered);
    }

    #[test]
    fn test_inspect_keeps_persisted_error() {
        let error = LifecycleState::Error {
            started_at: 1_699_999_900,
            retry_count: 3,
        };
        let store = Arc::new(MemoryLifecycleStore::with_record(LifecycleRecord {
            current: error,
            ..Default::default()
        }));
        let mut manager = LifecycleManager::inspect(
            store.clone(),
            IdentityProvider::new(Arc::new(MemoryIdentityStore::new()), SECRET),
            Arc::new(ManualClock::at_unix(1_700_000_000)),
            LifecycleSettings::default(),
        );

        let info = manager.error_info();
        assert!(info.in_error);
        assert_eq!(info.retry_count, 3);
        assert_eq!(info.duration_secs, 100);
        assert_eq!(store.snapshot().map(|r| r.current), Some(error));

        assert!(manager.force_reset_error());
        assert_eq!(
            store.snapshot().map(|r| r.current),
            Some(LifecycleState::Unregistered)
        );
    }
}
