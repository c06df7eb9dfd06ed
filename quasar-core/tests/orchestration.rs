mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use quasar_core::{EngineError, ModuleRegistry, Ports, Report, SessionEvent, SessionRequest};
use quasar_model::{
    Artifact, ArtifactKind, BackendId, FailureKind, ModuleId, RequiredCapability,
    SessionState, Severity,
};
use sha2::{Digest, Sha256};
use tokio_stream::StreamExt;

use support::{
    HarnessBuilder, ScriptedInspector, Stall, StallingBackend, events_until_archived,
    fast_config, simulator, target, target_id, terminal_transitions,
};

fn module(id: &str) -> ModuleId {
    ModuleId::new(id).unwrap()
}

#[tokio::test]
async fn capability_gap_fails_before_queue_without_contacting_backend() {
    let mut registry = ModuleRegistry::builtin().unwrap();
    let mut wide = (*registry.lookup(&module("exploit/grover_key_search")).unwrap()).clone();
    wide.id = module("exploit/wide_key_search");
    wide.required_capability = RequiredCapability::qubits(20);
    registry.register(wide).unwrap();

    let harness = HarnessBuilder::new()
        .registry(registry)
        .backend(simulator("small-sim", 14, 2))
        .build();
    let orchestrator = &harness.orchestrator;

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("exploit/wide_key_search"))
                .param("keyspace_bits", "12"),
        )
        .unwrap();
    let snapshot = orchestrator.wait(id).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Failed);
    let cause = snapshot.cause.clone().unwrap();
    assert_eq!(cause.kind, FailureKind::BackendCapability);
    assert!(cause.message.contains("requires 20 qubits"));
    assert!(!snapshot.visited_states().contains(&SessionState::Queued));
    assert!(snapshot.findings.is_empty());

    let pool = orchestrator
        .backends()
        .get(&BackendId::new("small-sim").unwrap())
        .unwrap();
    assert_eq!(pool.connection_attempts(), 0);
    assert_eq!(orchestrator.session_state(id).unwrap(), SessionState::Archived);
}

#[tokio::test]
async fn structural_risk_for_rsa_2048() {
    let harness = HarnessBuilder::new()
        .backend(simulator("local-simulator", 20, 4))
        .build();
    let orchestrator = &harness.orchestrator;

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("auxiliary/structural_risk"))
                .param("family", "rsa")
                .param("bit_length", "2048"),
        )
        .unwrap();
    let snapshot = orchestrator.wait(id).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(snapshot.findings.len(), 1);
    let finding = &snapshot.findings[0];
    assert_eq!(finding.algorithm_name, "RSA-2048");
    assert_eq!(finding.resource_estimate.qubits, 4196);
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.confidence.value(), 1.0);
    assert_eq!(finding.formula_version, "v1");
    assert_eq!(finding.sequence_number, 1);

    assert_eq!(harness.archive.get(&id), Some(snapshot));
}

#[tokio::test]
async fn sixteen_bit_key_search_runs_on_the_simulator() {
    let harness = HarnessBuilder::new()
        .backend(simulator("local-simulator", 20, 4))
        .build();
    let orchestrator = &harness.orchestrator;

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("exploit/grover_key_search"))
                .param("keyspace_bits", "16")
                .param("marked_key", "4242"),
        )
        .unwrap();
    let snapshot = orchestrator.wait(id).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Completed, "{:?}", snapshot.cause);
    let finding = &snapshot.findings[0];
    assert_eq!(finding.confidence.value(), 1.0);
    assert_eq!(finding.severity, Severity::Critical);

    let details = &finding.evidence.details;
    assert_eq!(details["quantum_query_estimate"], "256");
    assert_eq!(details["classical_equivalent"], "65536");
    assert_eq!(details["simulated"], "true");
    assert_eq!(details["found"], "true");
    assert_eq!(finding.evidence.attempts, Some(201));
    assert_eq!(finding.evidence.retry_count, 0);

    let job = finding.evidence.backend_job.unwrap();
    assert_eq!(finding.evidence_ref, format!("job:{job}"));
}

#[tokio::test]
async fn keyspace_above_ceiling_reports_formula_only() {
    let harness = HarnessBuilder::new()
        .backend(simulator("local-simulator", 20, 4))
        .build();
    let orchestrator = &harness.orchestrator;

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("exploit/grover_key_search"))
                .param("keyspace_bits", "24"),
        )
        .unwrap();
    let snapshot = orchestrator.wait(id).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Completed);
    let finding = &snapshot.findings[0];
    assert_eq!(finding.evidence.details["simulated"], "false");
    assert!(finding.evidence.backend_job.is_none());
    let expected = 0.5f64.powf(0.5);
    assert!((finding.confidence.value() - expected).abs() < 1e-9);

    let pool = orchestrator
        .backends()
        .get(&BackendId::new("local-simulator").unwrap())
        .unwrap();
    assert_eq!(pool.connection_attempts(), 0);
}

#[tokio::test]
async fn cancellation_keeps_findings_recorded_so_far() {
    let tool = tempfile::NamedTempFile::new().unwrap();
    let inspector = Arc::new(ScriptedInspector::default());
    let host = target("cert-host")
        .with_artifact(Artifact::new(ArtifactKind::Certificate, "leaf", b"2048".to_vec()))
        .with_artifact(Artifact::new(ArtifactKind::Certificate, "stuck", b"hang".to_vec()));

    let harness = HarnessBuilder::new()
        .backend(simulator("local-simulator", 20, 4))
        .target(host)
        .ports(Ports::default().with_command(inspector.clone()))
        .build();
    let orchestrator = &harness.orchestrator;
    let mut events = Box::pin(orchestrator.subscribe());

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("cert-host"), module("auxiliary/certificate_inspect"))
                .param("tool_path", tool.path().display().to_string()),
        )
        .unwrap();

    while let Some(event) = events.next().await {
        if matches!(event, SessionEvent::FindingRecorded { session_id, .. } if session_id == id) {
            break;
        }
    }
    orchestrator.cancel_session(id).unwrap();
    orchestrator.cancel_session(id).unwrap();

    let snapshot = orchestrator.wait(id).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Cancelled);
    assert_eq!(snapshot.cause.unwrap().kind, FailureKind::Cancellation);
    assert_eq!(snapshot.findings.len(), 1);
    assert_eq!(snapshot.findings[0].algorithm_name, "RSA-2048 certificate key");
    assert_eq!(inspector.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn running_deadline_times_out_and_cancels_backend_job() {
    let backend = StallingBackend::new("stalling");
    let mut config = fast_config();
    config.phase_timeouts.running_ms = 150;

    let harness = HarnessBuilder::new()
        .backend(backend.clone())
        .config(config)
        .build();
    let orchestrator = &harness.orchestrator;
    let events = orchestrator.subscribe();

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("exploit/grover_key_search"))
                .param("keyspace_bits", "8"),
        )
        .unwrap();
    let events = events_until_archived(events, id).await;
    let snapshot = harness.archive.get(&id).unwrap();

    assert_eq!(snapshot.state, SessionState::TimedOut);
    assert_eq!(snapshot.cause.unwrap().kind, FailureKind::Timeout);
    assert_eq!(terminal_transitions(&events), vec![SessionState::TimedOut]);
    assert!(events.iter().any(|e| matches!(e, SessionEvent::JobSubmitted { .. })));
    assert!(backend.cancel_count() >= 1);
}

#[tokio::test]
async fn concurrent_sessions_never_exceed_backend_leases() {
    let mut config = fast_config();
    config.worker_pool_size = 8;
    let harness = HarnessBuilder::new()
        .backend(simulator("narrow-sim", 16, 2))
        .config(config)
        .build();
    let orchestrator = &harness.orchestrator;

    let mut ids = Vec::new();
    for marked in 0..6 {
        let id = orchestrator
            .create_session(
                SessionRequest::new(target_id("lab-host"), module("exploit/grover_key_search"))
                    .param("keyspace_bits", "12")
                    .param("marked_key", marked.to_string()),
            )
            .unwrap();
        ids.push(id);
    }
    for id in ids {
        let snapshot = orchestrator.wait(id).await.unwrap();
        assert_eq!(snapshot.state, SessionState::Completed, "{:?}", snapshot.cause);
    }

    let pool = orchestrator
        .backends()
        .get(&BackendId::new("narrow-sim").unwrap())
        .unwrap();
    assert!(pool.peak_in_flight() <= 2);
    assert!(pool.peak_in_flight() >= 1);
    assert_eq!(pool.in_flight(), 0);
    assert_eq!(harness.archive.len(), 6);
}

#[tokio::test]
async fn algorithm_survey_orders_findings() {
    let harness = HarnessBuilder::new()
        .backend(simulator("local-simulator", 20, 4))
        .build();
    let orchestrator = &harness.orchestrator;

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("auxiliary/algorithm_survey"))
                .param("algorithms", "RSA, AES-128, SHA1, FooCipher"),
        )
        .unwrap();
    let snapshot = orchestrator.wait(id).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Completed);
    let sequence: Vec<u64> = snapshot.findings.iter().map(|f| f.sequence_number).collect();
    assert_eq!(sequence, vec![1, 2, 3, 4]);
    let unknown = &snapshot.findings[3];
    assert_eq!(unknown.severity, Severity::Info);
    assert_eq!(unknown.confidence.value(), 0.0);

    let report = Report::from_snapshot(&snapshot);
    assert_eq!(report.findings.len(), 4);
    assert!(report.overall_severity.is_some());
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["module_id"], "auxiliary/algorithm_survey");
}

#[tokio::test]
async fn unparseable_tool_output_is_recorded_as_zero_confidence_finding() {
    let tool = tempfile::NamedTempFile::new().unwrap();
    let host = target("cert-host")
        .with_artifact(Artifact::new(ArtifactKind::Certificate, "leaf", b"garbage".to_vec()));
    let harness = HarnessBuilder::new()
        .backend(simulator("local-simulator", 20, 4))
        .target(host)
        .ports(Ports::default().with_command(Arc::new(ScriptedInspector::default())))
        .build();
    let orchestrator = &harness.orchestrator;

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("cert-host"), module("auxiliary/certificate_inspect"))
                .param("tool_path", tool.path().display().to_string()),
        )
        .unwrap();
    let snapshot = orchestrator.wait(id).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Failed);
    assert_eq!(snapshot.cause.unwrap().kind, FailureKind::Computation);
    assert_eq!(snapshot.findings.len(), 1);
    let finding = &snapshot.findings[0];
    assert_eq!(finding.confidence.value(), 0.0);
    assert_eq!(finding.severity, Severity::Info);
    assert_eq!(finding.evidence_ref, "error:auxiliary/certificate_inspect");
    assert!(finding.evidence.details.contains_key("error"));
}

#[tokio::test]
async fn traffic_findings_reference_handshake_digest() {
    let handshake = b"\x16\x03\x01\x02\x00\x01\x00\x01\xfc\x03\x03".to_vec();
    let expected = hex::encode(Sha256::digest(&handshake));
    let host = target("vpn")
        .with_artifact(Artifact::new(ArtifactKind::Handshake, "client-hello", handshake));
    let harness = HarnessBuilder::new()
        .backend(simulator("local-simulator", 20, 4))
        .target(host)
        .build();
    let orchestrator = &harness.orchestrator;

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("vpn"), module("payload/tls_session_decrypt"))
                .param("key_exchange", "dh")
                .param("key_exchange_bits", "1024"),
        )
        .unwrap();
    let snapshot = orchestrator.wait(id).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Completed, "{:?}", snapshot.cause);
    assert_eq!(snapshot.findings.len(), 2);
    for finding in &snapshot.findings {
        assert_eq!(finding.evidence_ref, format!("sha256:{expected}"));
    }
    assert_eq!(snapshot.findings[0].algorithm_name, "DH-1024 key exchange");
    assert_eq!(
        snapshot.findings[0].evidence.details["recorded_traffic_exposed"],
        "true"
    );
    assert_eq!(snapshot.findings[1].algorithm_name, "128-bit session cipher");
}

#[tokio::test]
async fn validation_failures_end_in_failed_sessions() {
    let harness = HarnessBuilder::new()
        .backend(simulator("local-simulator", 20, 4))
        .build();
    let orchestrator = &harness.orchestrator;

    let unknown_module = orchestrator
        .create_session(SessionRequest::new(target_id("lab-host"), module("exploit/nope")))
        .unwrap();
    let bad_param = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("exploit/grover_key_search"))
                .param("keyspace_bits", "sixteen"),
        )
        .unwrap();
    let unknown_target = orchestrator
        .create_session(
            SessionRequest::new(target_id("ghost"), module("auxiliary/algorithm_survey"))
                .param("algorithms", "RSA"),
        )
        .unwrap();

    for id in [unknown_module, bad_param, unknown_target] {
        let snapshot = orchestrator.wait(id).await.unwrap();
        assert_eq!(snapshot.state, SessionState::Failed);
        assert_eq!(snapshot.cause.as_ref().unwrap().kind, FailureKind::Validation);
        assert!(!snapshot.visited_states().contains(&SessionState::Queued));
    }

    let missing_backend = orchestrator.create_session(
        SessionRequest::new(target_id("lab-host"), module("auxiliary/algorithm_survey"))
            .backend(BackendId::new("absent").unwrap()),
    );
    assert!(matches!(missing_backend, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn duplicate_module_ids_are_rejected() {
    let mut registry = ModuleRegistry::builtin().unwrap();
    let survey = (*registry.lookup(&module("auxiliary/algorithm_survey")).unwrap()).clone();
    assert!(matches!(
        registry.register(survey),
        Err(EngineError::DuplicateModuleId(_))
    ));
}

#[tokio::test]
async fn shutdown_cancels_running_sessions() {
    let backend = StallingBackend::new("stalling");
    let harness = HarnessBuilder::new().backend(backend.clone()).build();
    let orchestrator = &harness.orchestrator;
    let mut events = Box::pin(orchestrator.subscribe());

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("exploit/grover_key_search"))
                .param("keyspace_bits", "8"),
        )
        .unwrap();
    while let Some(event) = events.next().await {
        if matches!(event, SessionEvent::JobSubmitted { .. }) {
            break;
        }
    }
    orchestrator.shutdown();

    let snapshot = orchestrator.wait(id).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Cancelled);
    assert!(backend.cancel_count() >= 1);
}

async fn until_job_submitted(events: impl tokio_stream::Stream<Item = SessionEvent>) {
    let mut events = Box::pin(events);
    while let Some(event) = events.next().await {
        if matches!(event, SessionEvent::JobSubmitted { .. }) {
            break;
        }
    }
}

#[tokio::test]
async fn cancellation_is_bounded_when_backend_never_confirms() {
    let backend = StallingBackend::with_mode("unresponsive", Stall::Unresponsive);
    let harness = HarnessBuilder::new().backend(backend.clone()).build();
    let orchestrator = &harness.orchestrator;
    let events = orchestrator.subscribe();

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("exploit/grover_key_search"))
                .param("keyspace_bits", "8"),
        )
        .unwrap();
    until_job_submitted(events).await;

    let started = Instant::now();
    orchestrator.cancel_session(id).unwrap();
    let snapshot = orchestrator.wait(id).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(snapshot.state, SessionState::Cancelled);
    assert_eq!(snapshot.cause.unwrap().kind, FailureKind::Cancellation);
    let grace = Duration::from_millis(fast_config().cancel_timeout_ms);
    assert!(elapsed <= grace + Duration::from_millis(750), "took {elapsed:?}");
}

#[tokio::test]
async fn panicking_backend_fails_the_session() {
    let backend = StallingBackend::with_mode("crashing", Stall::Panic);
    let harness = HarnessBuilder::new().backend(backend).build();
    let orchestrator = &harness.orchestrator;
    let events = orchestrator.subscribe();

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("exploit/grover_key_search"))
                .param("keyspace_bits", "8"),
        )
        .unwrap();
    let events = events_until_archived(events, id).await;
    let snapshot = orchestrator.wait(id).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Failed);
    let cause = snapshot.cause.unwrap();
    assert_eq!(cause.kind, FailureKind::Internal);
    assert!(cause.message.contains("panicked"), "{}", cause.message);
    assert_eq!(terminal_transitions(&events), vec![SessionState::Failed]);
    assert_eq!(orchestrator.session_state(id).unwrap(), SessionState::Archived);
    assert_eq!(harness.archive.get(&id).unwrap().state, SessionState::Failed);

    let pool = orchestrator
        .backends()
        .get(&BackendId::new("crashing").unwrap())
        .unwrap();
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test]
async fn unnamed_sessions_run_on_a_capable_backend() {
    let harness = HarnessBuilder::new()
        .backend(simulator("sim-tiny", 4, 4))
        .backend(simulator("sim-wide", 16, 4))
        .build();
    let orchestrator = &harness.orchestrator;

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("exploit/grover_key_search"))
                .param("keyspace_bits", "8")
                .param("marked_key", "77"),
        )
        .unwrap();
    let snapshot = orchestrator.wait(id).await.unwrap();

    assert_eq!(snapshot.state, SessionState::Completed, "{:?}", snapshot.cause);
    assert_eq!(snapshot.backend_id.as_str(), "sim-wide");
}

#[tokio::test]
async fn finished_sessions_beyond_retention_are_evicted() {
    let mut config = fast_config();
    config.retained_sessions = 2;
    let harness = HarnessBuilder::new()
        .backend(simulator("local-simulator", 20, 4))
        .config(config)
        .build();
    let orchestrator = &harness.orchestrator;

    let mut ids = Vec::new();
    for _ in 0..4 {
        let id = orchestrator
            .create_session(
                SessionRequest::new(target_id("lab-host"), module("auxiliary/algorithm_survey"))
                    .param("algorithms", "RSA, AES-128"),
            )
            .unwrap();
        orchestrator.wait(id).await.unwrap();
        ids.push(id);
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while orchestrator.tracked_sessions() > 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    for evicted in &ids[..2] {
        assert!(matches!(
            orchestrator.session_state(*evicted),
            Err(EngineError::NotFound(_))
        ));
        assert!(harness.archive.get(evicted).is_some());
    }
    assert_eq!(orchestrator.session_state(ids[3]).unwrap(), SessionState::Archived);
    assert_eq!(harness.archive.len(), 4);

    orchestrator.forget(ids[3]).unwrap();
    assert!(matches!(
        orchestrator.session_state(ids[3]),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(orchestrator.forget(ids[3]), Err(EngineError::NotFound(_))));
    assert_eq!(orchestrator.tracked_sessions(), 1);
}

#[tokio::test]
async fn running_sessions_cannot_be_forgotten() {
    let backend = StallingBackend::new("stalling");
    let harness = HarnessBuilder::new().backend(backend).build();
    let orchestrator = &harness.orchestrator;
    let events = orchestrator.subscribe();

    let id = orchestrator
        .create_session(
            SessionRequest::new(target_id("lab-host"), module("exploit/grover_key_search"))
                .param("keyspace_bits", "8"),
        )
        .unwrap();
    until_job_submitted(events).await;

    assert!(matches!(orchestrator.forget(id), Err(EngineError::Validation(_))));
    orchestrator.cancel_session(id).unwrap();
    orchestrator.wait(id).await.unwrap();
}
