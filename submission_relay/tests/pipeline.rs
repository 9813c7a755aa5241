//! End-to-end pipeline runs against in-memory collaborators.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use submission_relay::modules::{
    audit_log::AuditStatus,
    error::DecodeError,
    in_memory::{FixedClock, InMemoryArtifactStore, InMemoryAuditStore, RecordingMailTransport, StaticFetcher},
    notifier::{TemplatePreset, TemplateSet},
    pipeline::{InvocationResult, Pipeline, ResultBody, FAILURE_MESSAGE, SUCCESS_MESSAGE},
    storage_key::KeyScheme,
};

const URL: &str = "https://host/sub.zip";
const ARTIFACT: &[u8] = b"PK\x03\x04 zip bytes";
const KEY: &str = "u1/a1/sub-20241019123456000.zip";

struct Harness {
    fetcher: Arc<StaticFetcher>,
    store: Arc<InMemoryArtifactStore>,
    transport: Arc<RecordingMailTransport>,
    audit: Arc<InMemoryAuditStore>,
    pipeline: Pipeline,
}

fn harness_with(
    fetcher: StaticFetcher,
    store: InMemoryArtifactStore,
    transport: RecordingMailTransport,
    audit: InMemoryAuditStore,
    scheme: KeyScheme,
    preset: TemplatePreset,
) -> Harness {
    let fetcher = Arc::new(fetcher);
    let store = Arc::new(store);
    let transport = Arc::new(transport);
    let audit = Arc::new(audit);
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 10, 19, 12, 34, 56).unwrap(),
    ));

    let pipeline = Pipeline::builder()
        .fetcher(fetcher.clone())
        .store(store.clone())
        .transport(transport.clone())
        .audit_store(audit.clone())
        .sender("relay@mg.example.com")
        .templates(TemplateSet::preset(preset))
        .clock(clock)
        .key_scheme(scheme)
        .build()
        .expect("all collaborators supplied");

    Harness {
        fetcher,
        store,
        transport,
        audit,
        pipeline,
    }
}

fn harness(fetcher: StaticFetcher, store: InMemoryArtifactStore, transport: RecordingMailTransport) -> Harness {
    harness_with(
        fetcher,
        store,
        transport,
        InMemoryAuditStore::new(),
        KeyScheme::Partitioned,
        TemplatePreset::Rich,
    )
}

fn serving_artifact() -> StaticFetcher {
    StaticFetcher::new().with_artifact(URL, ARTIFACT)
}

fn envelope() -> String {
    let message = serde_json::json!({
        "submissionUrl": URL,
        "userEmail": "jane.doe@x.com",
        "assignmentId": "a1",
        "userId": "u1",
    });
    serde_json::json!({ "Records": [{ "Sns": { "Message": message.to_string() } }] }).to_string()
}

#[tokio::test]
async fn stores_artifact_and_reports_success() {
    let h = harness(serving_artifact(), InMemoryArtifactStore::new("submissions"), RecordingMailTransport::new());

    let result = h.pipeline.handle(&envelope()).await.unwrap();

    assert_eq!(result, InvocationResult::success());
    assert_eq!(
        result.body,
        ResultBody::Message {
            message: SUCCESS_MESSAGE.to_string()
        }
    );
    assert_eq!(h.store.keys(), vec![KEY.to_string()]);
    assert_eq!(h.store.get(KEY).unwrap().as_ref(), ARTIFACT);

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "jane.doe@x.com");
    assert_eq!(sent[0].subject, "Assignment submitted successfully");
    assert!(sent[0].text.starts_with("Hi Jane,"));
    assert!(sent[0].text.contains(KEY));

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AuditStatus::Sent);
    assert_eq!(records[0].receiver, "jane.doe@x.com");
}

#[tokio::test]
async fn fetch_failure_skips_storage_and_reports_error() {
    // Nothing registered for URL, the fetcher answers 404
    let h = harness(StaticFetcher::new(), InMemoryArtifactStore::new("submissions"), RecordingMailTransport::new());

    let result = h.pipeline.handle(&envelope()).await.unwrap();

    assert_eq!(result.status_code, 500);
    assert_eq!(
        result.body,
        ResultBody::Error {
            error: FAILURE_MESSAGE.to_string()
        }
    );
    assert_eq!(h.fetcher.calls(), 1);
    assert!(h.store.keys().is_empty());

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Assignment not submitted successfully");
    assert!(sent[0].text.contains("returned 404"));

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AuditStatus::Sent);
    assert!(records[0].body.contains("artifact request to https://host/sub.zip returned 404"));
}

#[tokio::test]
async fn storage_failure_reports_error_after_one_fetch() {
    let h = harness(serving_artifact(), InMemoryArtifactStore::denying("submissions"), RecordingMailTransport::new());

    let result = h.pipeline.handle(&envelope()).await.unwrap();

    assert_eq!(result, InvocationResult::failure());
    assert_eq!(h.fetcher.calls(), 1);
    assert!(h.store.get(KEY).is_none());

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Assignment not submitted successfully");

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].body.contains("permission denied writing"));
}

#[tokio::test]
async fn failed_email_does_not_change_success() {
    let h = harness(serving_artifact(), InMemoryArtifactStore::new("submissions"), RecordingMailTransport::failing());

    let result = h.pipeline.handle(&envelope()).await.unwrap();

    assert_eq!(result, InvocationResult::success());
    assert_eq!(h.transport.attempts(), 1);
    assert!(h.transport.sent().is_empty());

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AuditStatus::Error);
    assert!(records[0].id.starts_with("Error-"));
}

#[tokio::test]
async fn failed_email_does_not_mask_fetch_failure() {
    let h = harness(StaticFetcher::new(), InMemoryArtifactStore::new("submissions"), RecordingMailTransport::failing());

    let result = h.pipeline.handle(&envelope()).await.unwrap();

    assert_eq!(result, InvocationResult::failure());
    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AuditStatus::Error);
    assert!(records[0].body.contains("returned 404"));
}

#[tokio::test]
async fn lost_audit_record_does_not_change_result() {
    let h = harness_with(
        serving_artifact(),
        InMemoryArtifactStore::new("submissions"),
        RecordingMailTransport::new(),
        InMemoryAuditStore::failing(),
        KeyScheme::Partitioned,
        TemplatePreset::Rich,
    );

    let result = h.pipeline.handle(&envelope()).await.unwrap();

    assert_eq!(result, InvocationResult::success());
    assert_eq!(h.transport.sent().len(), 1);
    assert!(h.audit.records().is_empty());
}

#[tokio::test]
async fn undecodable_payload_escapes_without_side_effects() {
    let h = harness(serving_artifact(), InMemoryArtifactStore::new("submissions"), RecordingMailTransport::new());

    let result = h.pipeline.handle(r#"{"Records":[{"Sns":{"Message":"{\"userEmail\":\"a@x.com\"}"}}]}"#).await;

    assert!(matches!(result, Err(DecodeError::Validation(_))));
    assert_eq!(h.fetcher.calls(), 0);
    assert_eq!(h.transport.attempts(), 0);
    assert!(h.audit.records().is_empty());
}

#[tokio::test]
async fn flat_scheme_with_minimal_template() {
    let h = harness_with(
        serving_artifact(),
        InMemoryArtifactStore::new("submissions"),
        RecordingMailTransport::new(),
        InMemoryAuditStore::new(),
        KeyScheme::Flat,
        TemplatePreset::Minimal,
    );

    let raw = serde_json::json!({ "submissionUrl": URL, "userEmail": "bob@x.com" }).to_string();
    let result = h.pipeline.handle(&raw).await.unwrap();

    assert!(result.is_success());
    assert_eq!(h.store.keys(), vec!["sub-20241019123456000.zip".to_string()]);

    let sent = h.transport.sent();
    assert_eq!(sent[0].text, "Your assignment was stored at sub-20241019123456000.zip.");
    assert!(!sent[0].text.contains('\n'));
}

#[tokio::test]
async fn concurrent_invocations_keep_their_own_subjects() {
    let h = harness(serving_artifact(), InMemoryArtifactStore::new("submissions"), RecordingMailTransport::new());

    let good = serde_json::json!({ "submissionUrl": URL, "userEmail": "jane.doe@x.com" }).to_string();
    let bad = serde_json::json!({ "submissionUrl": "https://host/missing.zip", "userEmail": "bob@x.com" }).to_string();

    let (good_result, bad_result) = tokio::join!(h.pipeline.handle(&good), h.pipeline.handle(&bad));

    assert!(good_result.unwrap().is_success());
    assert!(!bad_result.unwrap().is_success());

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    for mail in sent {
        match mail.to.as_str() {
            "jane.doe@x.com" => assert_eq!(mail.subject, "Assignment submitted successfully"),
            "bob@x.com" => assert_eq!(mail.subject, "Assignment not submitted successfully"),
            other => panic!("unexpected recipient {}", other),
        }
    }
}
