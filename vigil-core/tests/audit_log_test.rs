//! Audit and alert streams: redaction on the wire, tolerant reads, one-time acknowledgement

mod common;

use common::{init_test_logging, RecordingAuthority};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;
use vigil_core::audit::{AckOutcome, AlertLog, AlertQuery, AuditQuery, AuditTrail, Severity};
use vigil_core::authority::Endpoint;
use vigil_core::store::JsonlStore;

#[tokio::test]
async fn test_forwarded_copy_is_redacted_local_copy_is_not() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let authority = Arc::new(RecordingAuthority::online());
    let trail = AuditTrail::new(
        Arc::new(JsonlStore::new(dir.path().join("audit_log.jsonl"))),
        authority.clone(),
        "install-7",
    );

    trail
        .log(
            "user_created",
            "admin",
            json!({"username": "ana", "password": "hunter2", "profile": {"ssn": "123-45-6789"}}),
        )
        .await;

    let sent = authority.sent_to(Endpoint::Audit);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["details"]["password"], "[REDACTED]");
    assert_eq!(sent[0]["details"]["profile"]["ssn"], "[REDACTED]");
    assert_eq!(sent[0]["details"]["username"], "ana");
    assert_eq!(sent[0]["user"], "admin");

    let local = trail.query(&AuditQuery::default()).unwrap();
    assert_eq!(local[0].details["password"], "hunter2");
    assert_eq!(local[0].installation_id, "install-7");
}

#[tokio::test]
async fn test_unreachable_authority_leaves_local_trace() {
    let dir = TempDir::new().unwrap();
    let trail = AuditTrail::new(
        Arc::new(JsonlStore::new(dir.path().join("audit_log.jsonl"))),
        Arc::new(RecordingAuthority::offline()),
        "install-7",
    );

    trail.form_modified("ana", "food_establishment", "added item").await;

    let stats = trail.stats().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_type.get("form_modified"), Some(&1));
    assert_eq!(stats.by_type.get("audit_send_failed"), Some(&1));
}

#[tokio::test]
async fn test_corrupt_lines_are_skipped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("audit_log.jsonl");
    let trail = AuditTrail::new(
        Arc::new(JsonlStore::new(&path)),
        Arc::new(RecordingAuthority::online()),
        "install-7",
    );

    trail.user_login("ana", true, Some("10.0.0.1")).await;
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"timestamp\": \"2026-01-01T00:00:00Z\", \"action_ty").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json at all").unwrap();
    }
    trail.user_login("ben", false, None).await;

    let entries = trail.query(&AuditQuery::default()).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].actor, "ben");
    assert_eq!(entries[1].actor, "ana");
}

#[tokio::test]
async fn test_query_filters_and_limit() {
    let dir = TempDir::new().unwrap();
    let trail = AuditTrail::new(
        Arc::new(JsonlStore::new(dir.path().join("audit_log.jsonl"))),
        Arc::new(RecordingAuthority::online()),
        "install-7",
    );
    for i in 0..5 {
        trail
            .inspection_created("ana", i, "residential", "Harbour View")
            .await;
    }
    trail.user_created("root", "ben", "inspector").await;

    let query = AuditQuery {
        limit: 2,
        action_type: Some("inspection_created".into()),
        actor: Some("ana".into()),
    };
    let entries = trail.query(&query).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].details["inspection_id"], 4);
    assert_eq!(entries[1].details["inspection_id"], 3);
}

#[tokio::test]
async fn test_alert_acknowledged_exactly_once() {
    let dir = TempDir::new().unwrap();
    let alerts = AlertLog::new(
        Arc::new(JsonlStore::new(dir.path().join("security_alerts.jsonl"))),
        Arc::new(RecordingAuthority::online()),
        "install-7",
    );

    let alert = alerts.data_export("ana", 1200).await;
    assert_eq!(alerts.unacknowledged_count(), 1);

    assert_eq!(alerts.acknowledge(&alert.id, "root").unwrap(), AckOutcome::Acknowledged);
    assert_eq!(
        alerts.acknowledge(&alert.id, "someone-else").unwrap(),
        AckOutcome::AlreadyAcknowledged
    );
    assert_eq!(alerts.acknowledge("no-such-id", "root").unwrap(), AckOutcome::NotFound);

    let stored = alerts.read(&AlertQuery::default()).unwrap();
    assert_eq!(stored[0].acknowledged_by.as_deref(), Some("root"));
    assert_eq!(alerts.unacknowledged_count(), 0);
}

#[tokio::test]
async fn test_alert_forwarding_and_stats() {
    let dir = TempDir::new().unwrap();
    let authority = Arc::new(RecordingAuthority::online());
    let alerts = AlertLog::new(
        Arc::new(JsonlStore::new(dir.path().join("security_alerts.jsonl"))),
        authority.clone(),
        "install-7",
    );

    alerts.code_tampered(&["app.py".to_string()]).await;
    alerts.brute_force_attempt("ana", 5).await;
    alerts.support_access_enabled("root", 4).await;

    assert_eq!(authority.sent_to(Endpoint::Alerts).len(), 3);

    let stats = alerts.stats().unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.critical, 1);
    assert_eq!(stats.unacknowledged, 3);

    let critical = alerts
        .read(&AlertQuery {
            severity: Some(Severity::Critical),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].alert_type, "code_tampered");
}
