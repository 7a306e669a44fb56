//! Insufficient funds park the request; a top-up wakes it and it clears.

mod common;

use common::Harness;
use ems_engine::model::{EndorsementStatus, EndorsementType, LedgerEntryStatus, LedgerEntryType};
use rust_decimal_macros::dec;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_on_hold_then_release_on_top_up() {
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

    let employer_id = harness.seed_employer(dec!(50.00)).await;
    let request = harness
        .submit(&employer_id, EndorsementType::Addition, "e42", "200.00")
        .await;

    harness.wait_for_buffered(&employer_id, 1).await;
    harness.drive_window().await;
    harness
        .wait_for_status(&request.id, EndorsementStatus::OnHold)
        .await;

    // Parked: one ON_HOLD_FUNDS row, balance untouched
    let employer = harness.runtime.datastore.get_employer(&employer_id).await.unwrap();
    assert_eq!(employer.ea_balance, dec!(50.00));
    let rows = harness.runtime.datastore.ledger_for_endorsement(&request.id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, LedgerEntryStatus::OnHoldFunds);
    assert_eq!(rows[0].amount, dec!(200.00));

    // Top-up raises balance_increased, hold-release re-drives the check
    harness
        .runtime
        .ledger
        .credit_top_up(&employer_id, dec!(300.00), Some("WIRE-1".to_string()))
        .await
        .unwrap();

    harness
        .wait_for_status(&request.id, EndorsementStatus::Active)
        .await;

    let employer = harness.runtime.datastore.get_employer(&employer_id).await.unwrap();
    assert_eq!(employer.ea_balance, dec!(150.00));
    assert_eq!(
        harness.runtime.datastore.reconciled_balance(&employer_id),
        dec!(150.00)
    );

    // Historical ON_HOLD_FUNDS row remains; a fresh DEBIT cleared
    let rows = harness.runtime.datastore.ledger_for_endorsement(&request.id);
    assert_eq!(rows.len(), 2);
    let on_hold: Vec<_> = rows
        .iter()
        .filter(|t| t.status == LedgerEntryStatus::OnHoldFunds)
        .collect();
    let cleared: Vec<_> = rows
        .iter()
        .filter(|t| t.status == LedgerEntryStatus::Cleared)
        .collect();
    assert_eq!(on_hold.len(), 1);
    assert_eq!(cleared.len(), 1);
    assert_eq!(cleared[0].txn_type, LedgerEntryType::Debit);
    assert_eq!(cleared[0].amount, dec!(200.00));

    harness.runtime.shutdown();
}

#[tokio::test]
async fn test_parked_requests_wake_in_arrival_order() {
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

    let employer_id = harness.seed_employer(dec!(0)).await;
    let first = harness
        .submit(&employer_id, EndorsementType::Addition, "e1", "100.00")
        .await;
    let second = harness
        .submit(&employer_id, EndorsementType::Addition, "e2", "150.00")
        .await;

    harness.wait_for_buffered(&employer_id, 2).await;
    harness.drive_window().await;
    harness.wait_for_status(&first.id, EndorsementStatus::OnHold).await;
    harness.wait_for_status(&second.id, EndorsementStatus::OnHold).await;

    // Only enough for the first: it clears, the second parks again
    harness
        .runtime
        .ledger
        .credit_top_up(&employer_id, dec!(120.00), None)
        .await
        .unwrap();

    harness.wait_for_status(&first.id, EndorsementStatus::Active).await;
    harness.wait_for_status(&second.id, EndorsementStatus::OnHold).await;

    let employer = harness.runtime.datastore.get_employer(&employer_id).await.unwrap();
    assert_eq!(employer.ea_balance, dec!(20.00));

    // A second top-up releases the remainder
    harness
        .runtime
        .ledger
        .credit_top_up(&employer_id, dec!(200.00), None)
        .await
        .unwrap();
    harness.wait_for_status(&second.id, EndorsementStatus::Active).await;

    let employer = harness.runtime.datastore.get_employer(&employer_id).await.unwrap();
    assert_eq!(employer.ea_balance, dec!(70.00));
    assert_eq!(
        harness.runtime.datastore.reconciled_balance(&employer_id),
        dec!(70.00)
    );

    harness.runtime.shutdown();
}
