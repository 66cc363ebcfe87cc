//! Integration tests for restfuzz-core.
//!
//! These drive the full engine loop against the scripted mock transport.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use restfuzz_core::{
    FuzzConfig, FuzzEngine, IterationObserver, IterationRecord, StopReason, TerminalState,
};
use restfuzz_transport::MockTransport;
use restfuzz_types::{
    EndpointCatalog, EndpointDescriptor, HttpMethod, ParamLocation, Parameter, Response,
};
use serde_json::json;

fn users_catalog() -> Arc<EndpointCatalog> {
    Arc::new(EndpointCatalog::new(vec![
        EndpointDescriptor::new(HttpMethod::Post, "/users")
            .with_body(json!({
                "type": "object",
                "required": ["name"],
                "properties": {"name": {"type": "string", "maxLength": 16}}
            }))
            .with_statuses(&[201, 400]),
        EndpointDescriptor::new(HttpMethod::Get, "/users/{userId}")
            .with_parameter(Parameter::new(
                "userId",
                ParamLocation::Path,
                json!({"type": "string"}),
                true,
            ))
            .with_statuses(&[200, 404]),
    ]))
}

fn users_mock() -> MockTransport {
    let mut mock = MockTransport::new();
    mock.add_json(HttpMethod::Post, "/users", 201, json!({"userId": "u1"}));
    mock.add_route(HttpMethod::Get, "/users/{userId}", |req| {
        Response::json(
            200,
            json!({"userId": req.path.trim_start_matches("/users/"), "name": "example"}),
        )
    });
    mock
}

fn health_catalog() -> Arc<EndpointCatalog> {
    Arc::new(EndpointCatalog::new(vec![EndpointDescriptor::new(
        HttpMethod::Get,
        "/health",
    )
    .with_statuses(&[200])]))
}

fn health_mock() -> MockTransport {
    let mut mock = MockTransport::new();
    mock.add_json(HttpMethod::Get, "/health", 200, json!({"ok": true}));
    mock
}

/// Producer then consumer: the id from `POST /users` resolves `GET /users/{userId}`.
#[tokio::test]
async fn test_users_dependency_scenario() {
    let mock = Arc::new(users_mock());
    let engine = FuzzEngine::new(
        users_catalog(),
        mock.clone(),
        FuzzConfig::default().with_workers(1).with_max_iterations(20),
    );
    assert_eq!(engine.seeds().len(), 1);

    let report = engine.run().await.unwrap();
    assert_eq!(report.stop_reason, StopReason::Iterations);
    assert_eq!(report.metrics.iterations, 20);

    let calls = mock.calls();
    assert!(calls[0].starts_with("POST /users"));
    assert!(calls.iter().any(|c| c == "GET /users/u1"));
    assert!(calls.iter().all(|c| !c.contains('{')));

    let table = engine.id_table();
    assert_eq!(table.latest("userId"), Some(&json!("u1")));

    let corpus = engine.corpus_snapshot();
    assert!(corpus
        .iter()
        .any(|c| c.summary() == "POST /users -> GET /users/{userId}"));
    for case in &corpus {
        assert!(case.len() <= 8);
        assert_eq!(case.fingerprint.len(), 64);
    }
    assert!(report.coverage.operations.hit == 2);
}

/// A repeated identical response neither raises TCL nor adds diversity.
#[tokio::test]
async fn test_redundant_response_is_discarded() {
    let engine = FuzzEngine::new(
        health_catalog(),
        Arc::new(health_mock()),
        FuzzConfig::default()
            .with_workers(1)
            .with_max_iterations(3)
            .with_max_sequence_length(1),
    );
    let report = engine.run().await.unwrap();
    assert_eq!(report.outcomes.committed, 1);
    assert_eq!(report.outcomes.discarded, 2);
    assert_eq!(report.outcomes.discard_reasons["not_interesting"], 2);
    assert_eq!(report.corpus_size, 1);
}

#[tokio::test]
async fn test_transport_failures_do_not_halt_the_loop() {
    let mock = health_mock();
    mock.fail_next(3);
    let engine = FuzzEngine::new(
        health_catalog(),
        Arc::new(mock),
        FuzzConfig::default().with_workers(1).with_max_iterations(6),
    );
    let report = engine.run().await.unwrap();
    assert_eq!(report.metrics.transport_errors, 3);
    assert_eq!(report.metrics.iterations, 6);
    assert_eq!(report.stop_reason, StopReason::Iterations);
    assert!(report.corpus_size >= 1);
}

#[tokio::test]
async fn test_request_timeout_discards_iteration() {
    let mock = health_mock().with_delay(Duration::from_millis(200));
    let engine = FuzzEngine::new(
        health_catalog(),
        Arc::new(mock),
        FuzzConfig::default()
            .with_workers(1)
            .with_max_iterations(2)
            .with_request_timeout_ms(20),
    );
    let report = engine.run().await.unwrap();
    assert_eq!(report.outcomes.discarded, 2);
    assert_eq!(report.outcomes.discard_reasons["transport_error"], 2);
    assert_eq!(report.corpus_size, 0);
}

#[tokio::test]
async fn test_time_budget_stops_run() {
    let mock = health_mock().with_delay(Duration::from_millis(20));
    let mut config = FuzzConfig::default()
        .with_workers(2)
        .with_time_budget(1)
        .with_stagnation_window(u64::MAX);
    config.max_iterations = None;
    let engine = FuzzEngine::new(health_catalog(), Arc::new(mock), config);
    let report = engine.run().await.unwrap();
    assert_eq!(report.stop_reason, StopReason::Time);
    assert!(report.metrics.iterations > 0);
}

#[tokio::test]
async fn test_mutation_exhaustion_ends_run() {
    let engine = FuzzEngine::new(
        health_catalog(),
        Arc::new(health_mock()),
        FuzzConfig::default()
            .with_workers(1)
            .with_max_iterations(1000)
            .with_max_sequence_length(1)
            .with_stagnation_window(5),
    );
    let report = engine.run().await.unwrap();
    assert_eq!(report.stop_reason, StopReason::MutationExhausted);
    assert!(report.metrics.iterations < 1000);
}

#[tokio::test]
async fn test_oracle_reports_server_errors() {
    let mut mock = MockTransport::new();
    mock.add_route(HttpMethod::Get, "/health", |_| {
        Response::from_raw(
            500,
            Default::default(),
            "Traceback (most recent call last):\n  boom",
        )
    });
    let engine = FuzzEngine::new(
        health_catalog(),
        Arc::new(mock),
        FuzzConfig::default().with_workers(1).with_max_iterations(4),
    );
    let report = engine.run().await.unwrap();
    let categories: Vec<&str> = report
        .findings
        .iter()
        .map(|f| f.kind.category())
        .collect();
    assert!(categories.contains(&"server_error"));
    assert!(categories.contains(&"stack_trace"));
    assert!(categories.contains(&"undeclared_status"));
    assert_eq!(report.findings_by_category["server_error"], 4);
    assert!(report.findings.iter().all(|f| f.sample.iteration == 1));
}

#[derive(Default)]
struct Recorder(Mutex<Vec<IterationRecord>>);

impl IterationObserver for Recorder {
    fn on_iteration(&self, record: &IterationRecord) {
        self.0.lock().push(record.clone());
    }
}

#[tokio::test]
async fn test_observer_sees_every_iteration() {
    let recorder = Arc::new(Recorder::default());
    let engine = FuzzEngine::new(
        users_catalog(),
        Arc::new(users_mock()),
        FuzzConfig::default().with_workers(3).with_max_iterations(12),
    )
    .with_observer(recorder.clone());
    let report = engine.run().await.unwrap();

    let records = recorder.0.lock();
    assert_eq!(records.len(), 12);
    let committed = records
        .iter()
        .filter(|r| r.state == TerminalState::Committed)
        .count() as u64;
    assert_eq!(committed, report.outcomes.committed);
    let mut iterations: Vec<u64> = records.iter().map(|r| r.iteration).collect();
    iterations.sort_unstable();
    assert_eq!(iterations, (1..=12).collect::<Vec<_>>());
}
