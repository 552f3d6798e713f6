//! Heartbeat behaviour of the REGISTERED tick

mod common;

use common::*;
use fleetwatch_agent::LifecycleState;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_inactive_report_switches_to_heartbeats() {
    let server = MockServer::start().await;
    mount_register(&server, AcceptRegistration::new(&server)).await;
    // The first report turns monitoring off
    Mock::given(method("POST"))
        .and(path("/api/agent/report"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "accepted", "is_active": false})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_report(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"status": "accepted"})),
    )
    .await;

    let mut h = HarnessBuilder::new(server.uri()).device_id("dev-1").build();
    h.agent.step().await;
    assert_eq!(h.agent.state(), LifecycleState::Registered);
    assert!(!h.agent.runtime().is_active());

    h.clock.advance_secs(45);
    let delay = h.agent.step().await;
    assert_eq!(delay, Duration::from_secs(45));

    let reports = bodies(&server, "/api/agent/report").await;
    let heartbeat = reports.last().unwrap();
    assert_eq!(heartbeat["heartbeat"], true);
    assert_eq!(heartbeat["reason"], "server inactive");
    assert_eq!(heartbeat["heartbeat_sequence"], 1);
    assert_eq!(heartbeat["client_id"], "dev-1");
    assert_eq!(heartbeat["server_active"], false);
    assert_eq!(heartbeat["monitor_status"]["mode"], "CONTINUOUS");

    // Heartbeats never touch the queue
    assert_eq!(h.queue.stats().unwrap().total_count, 0);

    h.clock.advance_secs(45);
    h.agent.step().await;
    let reports = bodies(&server, "/api/agent/report").await;
    let heartbeat = reports.last().unwrap();
    assert_eq!(heartbeat["heartbeat_sequence"], 2);
    assert_eq!(heartbeat["last_heartbeat_time"], START + 45);
}

#[tokio::test]
async fn test_disabled_items_heartbeat() {
    let server = MockServer::start().await;
    mount_register(&server, AcceptRegistration::new(&server)).await;
    Mock::given(method("POST"))
        .and(path("/api/agent/report"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "accepted",
            "monitor_items": {
                "cpu": {"enabled": false},
                "memory": {"enabled": false},
                "disk": {"enabled": false},
                "gpu": {"enabled": false}
            }
        })))
        .mount(&server)
        .await;

    let mut h = HarnessBuilder::new(server.uri()).device_id("dev-1").build();
    h.agent.step().await;
    assert!(!h.agent.runtime().monitoring_enabled());

    h.agent.step().await;
    let reports = bodies(&server, "/api/agent/report").await;
    assert_eq!(reports.last().unwrap()["reason"], "all monitor items disabled");
}

#[tokio::test]
async fn test_silence_forces_minimal_heartbeat() {
    let server = MockServer::start().await;
    mount_register(&server, AcceptRegistration::new(&server)).await;
    mount_report(&server, ResponseTemplate::new(503).set_body_string("maintenance")).await;

    let mut h = HarnessBuilder::new(server.uri()).device_id("dev-1").build();
    h.agent.step().await;
    assert_eq!(h.agent.state(), LifecycleState::Registered);
    // First report failed and was queued
    assert_eq!(h.queue.pending_count().unwrap(), 1);

    h.clock.advance_secs(299);
    h.agent.step().await;
    let reports = bodies(&server, "/api/agent/report").await;
    assert!(reports.iter().all(|b| b.get("minimal").is_none()));

    h.clock.advance_secs(1);
    let delay = h.agent.step().await;
    assert_eq!(delay, Duration::from_secs(45));

    let reports = bodies(&server, "/api/agent/report").await;
    let minimal: Vec<_> = reports.iter().filter(|b| b["minimal"] == true).collect();
    assert_eq!(minimal.len(), 1);
    assert_eq!(minimal[0]["reason"], "prolonged silence");
    assert_eq!(minimal[0]["timestamp"], START + 300);

    // Failed batches keep every sample queued
    assert_eq!(h.queue.pending_count().unwrap(), 3);
    assert_eq!(h.agent.state(), LifecycleState::Registered);
}

#[tokio::test]
async fn test_deleted_heartbeat_goes_straight_to_sleep_retry() {
    let server = MockServer::start().await;
    mount_register(&server, AcceptRegistration::new(&server)).await;
    Mock::given(method("POST"))
        .and(path("/api/agent/report"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "accepted", "is_active": false})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/agent/report"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "deleted"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let mut h = HarnessBuilder::new(server.uri()).device_id("dev-1").build();
    h.agent.step().await;
    assert!(!h.agent.runtime().is_active());

    h.clock.advance_secs(45);
    let delay = h.agent.step().await;
    assert_eq!(h.agent.state(), LifecycleState::Reinitialized);
    assert_eq!(delay, Duration::ZERO);

    let reports = bodies(&server, "/api/agent/report").await;
    assert_eq!(reports.last().unwrap()["heartbeat"], true);

    let delay = h.agent.step().await;
    assert_eq!(h.agent.state(), LifecycleState::SleepRetry { attempt: 0 });
    assert_eq!(delay, Duration::ZERO);
}
