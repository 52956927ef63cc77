//! Unit tests for backend response interpretation.

use serde_json::json;

use chat_bridge::backend::client::{classify_ingest, unwrap_envelope};
use chat_bridge::backend::IngestOutcome;

#[test]
fn success_envelope_yields_inner_value() {
    let value = unwrap_envelope(json!({"status": "success", "value": {"saved": true}}))
        .expect("success envelope");
    assert_eq!(value, json!({"saved": true}));
}

#[test]
fn success_envelope_without_value_yields_null() {
    let value = unwrap_envelope(json!({"status": "success"})).expect("success envelope");
    assert!(value.is_null());
}

#[test]
fn bare_body_is_returned_as_is() {
    let value = unwrap_envelope(json!({"saved": false, "deduped": true})).expect("bare body");
    assert_eq!(value, json!({"saved": false, "deduped": true}));

    let value = unwrap_envelope(json!(null)).expect("null body");
    assert!(value.is_null());
}

#[test]
fn error_envelope_is_a_failure_with_backend_text() {
    let err = unwrap_envelope(json!({"status": "error", "errorMessage": "validator rejected"}))
        .expect_err("error envelope");
    assert_eq!(err, "Backend error: validator rejected");
}

#[test]
fn ingest_value_classification() {
    assert_eq!(classify_ingest(&json!({"saved": true})), IngestOutcome::Saved);
    assert_eq!(classify_ingest(&json!({"saved": 1})), IngestOutcome::Saved);
    assert_eq!(
        classify_ingest(&json!({"saved": false, "deduped": true})),
        IngestOutcome::Deduplicated
    );
    assert_eq!(classify_ingest(&json!({})), IngestOutcome::NotSaved);
    assert_eq!(classify_ingest(&json!(null)), IngestOutcome::NotSaved);
}
