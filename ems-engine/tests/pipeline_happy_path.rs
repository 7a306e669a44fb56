//! Happy-path ADDITION: the full RECEIVED -> ACTIVE flow with a real HTTP
//! insurer stub, balance reconciliation, audit trail, and census update.

mod common;

use common::Harness;
use ems_connectors::DocumentStore;
use ems_engine::audit::AUDIT_COLLECTION;
use ems_engine::model::{
    EmployeeId, EndorsementStatus, EndorsementType, LedgerEntryStatus, LedgerEntryType,
};
use rust_decimal_macros::dec;
use serde_json::Value;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_happy_addition_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/members"))
        .and(header_exists("X-Idempotency-Key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "confirmationId": "POL-998877",
            "status": "PROCESSED"
        })))
        .mount(&server)
        .await;

    let harness = Harness::start(|config| {
        config
            .insurer
            .gateways
            .insert("AETNA_01".to_string(), Harness::rest_gateway(&server.uri()));
    });

    let employer_id = harness.seed_employer(dec!(1000.00)).await;
    let request = harness
        .submit(&employer_id, EndorsementType::Addition, "e42", "200.00")
        .await;
    assert_eq!(request.status, EndorsementStatus::Received);

    harness.wait_for_buffered(&employer_id, 1).await;
    harness.drive_window().await;
    harness
        .wait_for_status(&request.id, EndorsementStatus::Active)
        .await;

    // Balance moved once and reconciles against the ledger
    let employer = harness.runtime.datastore.get_employer(&employer_id).await.unwrap();
    assert_eq!(employer.ea_balance, dec!(800.00));
    assert_eq!(
        harness.runtime.datastore.reconciled_balance(&employer_id),
        employer.ea_balance
    );

    // One DEBIT row for 200.00, cleared on confirmation
    let debits: Vec<_> = harness
        .runtime
        .datastore
        .ledger_for_endorsement(&request.id)
        .into_iter()
        .filter(|t| t.txn_type == LedgerEntryType::Debit)
        .collect();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].amount, dec!(200.00));
    assert_eq!(debits[0].status, LedgerEntryStatus::Cleared);

    // Exactly one audit document, SUCCESS, with sanitised auth header
    let audits = harness
        .runtime
        .documents
        .find_all(AUDIT_COLLECTION)
        .await
        .unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0]["status"], "SUCCESS");
    assert_eq!(audits[0]["interaction_type"], "REST_API");
    assert_eq!(audits[0]["request"]["headers"]["Authorization"], "***");
    assert_eq!(
        audits[0]["request"]["headers"]["X-Idempotency-Key"],
        format!("{}-AETNA_01-0", request.id)
    );
    assert_eq!(audits[0]["response"]["body"]["confirmationId"], "POL-998877");

    // Census applied: the employee now has an active coverage
    let active = harness
        .runtime
        .datastore
        .active_coverage_on(&EmployeeId::from("e42"), "2026-08-15".parse().unwrap());
    assert!(active.is_some());
    assert_eq!(active.unwrap().insurer_id, "AETNA_01");

    harness.runtime.shutdown();
}

#[tokio::test]
async fn test_duplicate_submission_rejected_at_ingress() {
    let harness = Harness::start(|_| {});
    let employer_id = harness.seed_employer(dec!(1000.00)).await;

    harness
        .submit(&employer_id, EndorsementType::Addition, "e42", "200.00")
        .await;
    let duplicate = harness
        .runtime
        .ingestion
        .submit(ems_engine::ingest::NewEndorsement {
            employer_id: employer_id.clone(),
            request_type: EndorsementType::Addition,
            payload: serde_json::json!({
                "employee_id": "e42",
                "employee": {"id": "e42", "employee_code": "e42"},
                "coverage": {"insurer_id": "AETNA_01", "amount": "200.00"}
            }),
            effective_date: "2026-08-01".parse().unwrap(),
            trace_id: None,
        })
        .await;
    assert!(duplicate.is_err());

    let rows = harness.runtime.datastore.endorsements_by_employer(&employer_id);
    assert_eq!(rows.len(), 1);

    harness.runtime.shutdown();
}

#[tokio::test]
async fn test_audit_documents_never_leak_sensitive_values() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;

    let harness = Harness::start(|config| {
        config
            .insurer
            .gateways
            .insert("AETNA_01".to_string(), Harness::rest_gateway(&server.uri()));
    });
    let employer_id = harness.seed_employer(dec!(1000.00)).await;

    let request = harness
        .runtime
        .ingestion
        .submit(ems_engine::ingest::NewEndorsement {
            employer_id: employer_id.clone(),
            request_type: EndorsementType::Addition,
            payload: serde_json::json!({
                "employee_id": "e9",
                "employee": {"id": "e9", "employee_code": "e9", "ssn": "123-45-6789", "dob": "1990-01-01"},
                "coverage": {"insurer_id": "AETNA_01", "amount": "10.00"}
            }),
            effective_date: "2026-08-01".parse().unwrap(),
            trace_id: None,
        })
        .await
        .unwrap();

    harness.wait_for_buffered(&employer_id, 1).await;
    harness.drive_window().await;
    harness
        .wait_for_status(&request.id, EndorsementStatus::Active)
        .await;

    let audits = harness
        .runtime
        .documents
        .find_all(AUDIT_COLLECTION)
        .await
        .unwrap();
    assert_eq!(audits.len(), 1);
    assert_no_sensitive_leak(&audits[0]);

    harness.runtime.shutdown();
}

fn assert_no_sensitive_leak(value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let lowered = key.to_lowercase();
                if lowered == "ssn" || lowered == "dob" {
                    assert_eq!(v, "***", "body key {key} leaked");
                }
                if lowered.contains("authorization")
                    || lowered.contains("token")
                    || lowered.contains("secret")
                {
                    if v.is_string() {
                        assert_eq!(v, "***", "header {key} leaked");
                    }
                }
                assert_no_sensitive_leak(v);
            }
        }
        Value::Array(items) => items.iter().for_each(assert_no_sensitive_leak),
        _ => {}
    }
}
