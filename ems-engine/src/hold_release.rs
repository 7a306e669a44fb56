//! Hold-release: wake parked endorsements when the balance recovers.
//!
//! Parked requests go back to VALIDATED and re-enter the ledger check in
//! their original arrival order. Republication is fire-and-forget: a
//! publish failure is logged but the status change persists, so the next
//! balance increase retries them.

use crate::error::EngineResult;
use crate::events::{BalanceIncreasedEvent, CheckFundsEvent};
use crate::model::{EmployerId, EndorsementStatus};
use crate::topics;
use ems_connectors::bus::{HEADER_EMPLOYER_ID, HEADER_SOURCE, HEADER_TRACE_ID};
use ems_connectors::{BusMessage, BusProducer};
use crate::store::Datastore;
use metrics::counter;
use std::sync::Arc;
use tracing::{error, info};

const SOURCE: &str = "hold_release";

/// Reconnects ON_HOLD requests to the ledger on balance increases
pub struct HoldReleaseService {
    datastore: Arc<Datastore>,
    bus: Arc<dyn BusProducer>,
}

impl HoldReleaseService {
    pub fn new(datastore: Arc<Datastore>, bus: Arc<dyn BusProducer>) -> Self {
        Self { datastore, bus }
    }

    pub async fn release_on_hold_requests(&self, event: BalanceIncreasedEvent) -> EngineResult<()> {
        if event.employer_id.is_empty() {
            error!("hold_release_missing_employer_id");
            return Ok(());
        }
        let employer_id = EmployerId::from(event.employer_id.as_str());

        let parked = self.datastore.on_hold_by_employer(&employer_id);
        if parked.is_empty() {
            info!(employer_id = %employer_id, "hold_release_no_requests");
            return Ok(());
        }

        let mut released = 0usize;
        for request in parked {
            self.datastore
                .update_status(&request.id, EndorsementStatus::Validated)?;

            let check = CheckFundsEvent {
                endorsement_id: request.id.to_string(),
                employer_id: request.employer_id.to_string(),
                request_type: request.request_type.as_str().to_string(),
                effective_date: Some(request.effective_date),
                payload: request.payload.clone(),
                trace_id: request.trace_id.clone(),
                retry_count: request.retry_count,
                amount: None,
            };
            let message = match BusMessage::json(
                topics::LEDGER_CHECK_FUNDS,
                Some(request.id.as_str()),
                &check,
            ) {
                Ok(mut m) => {
                    m = m
                        .with_header(HEADER_SOURCE, SOURCE)
                        .with_header(HEADER_EMPLOYER_ID, request.employer_id.to_string());
                    if let Some(trace_id) = &request.trace_id {
                        m = m.with_header(HEADER_TRACE_ID, trace_id.clone());
                    }
                    m
                }
                Err(e) => {
                    error!(endorsement_id = %request.id, error = %e, "hold_release_serialize_failed");
                    continue;
                }
            };
            // Fire-and-forget: the VALIDATED write above persists either way
            match self.bus.publish(message).await {
                Ok(()) => {
                    counter!("ems_messages_produced_total", "topic" => topics::LEDGER_CHECK_FUNDS)
                        .increment(1);
                }
                Err(e) => {
                    error!(
                        endorsement_id = %request.id,
                        employer_id = %request.employer_id,
                        error = %e,
                        "hold_release_ledger_publish_failed"
                    );
                }
            }
            released += 1;
        }

        info!(
            employer_id = %employer_id,
            released,
            change_amount = %event.change_amount,
            new_balance = %event.new_balance,
            "hold_release_dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Employer, EndorsementId, EndorsementRequest, EndorsementType};
    use chrono::Utc;
    use ems_connectors::{InMemoryBus, ManualClock};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn parked_request(employer_id: &EmployerId, id: &str) -> EndorsementRequest {
        EndorsementRequest {
            id: EndorsementId::from(id),
            employer_id: employer_id.clone(),
            request_type: EndorsementType::Addition,
            status: EndorsementStatus::OnHold,
            payload: json!({"amount": "200.00"}),
            retry_count: 0,
            effective_date: "2026-08-01".parse().unwrap(),
            trace_id: Some("t-1".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_release_restores_validated_in_fifo_order() {
        let clock = Arc::new(ManualClock::new(0));
        let datastore = Arc::new(Datastore::new());
        let bus = InMemoryBus::new(clock);
        let service = HoldReleaseService::new(datastore.clone(), Arc::new(bus.clone()));

        let employer_id = datastore.insert_employer(Employer::new("Acme", dec!(0)));
        for id in ["h1", "h2", "h3"] {
            datastore.insert_endorsement(parked_request(&employer_id, id));
        }
        let mut rx = bus.subscribe(&[topics::LEDGER_CHECK_FUNDS]);

        service
            .release_on_hold_requests(BalanceIncreasedEvent {
                employer_id: employer_id.to_string(),
                change_amount: dec!(300.00),
                new_balance: dec!(300.00),
                timestamp: Utc::now(),
                source: Some("top_up".to_string()),
            })
            .await
            .unwrap();

        for expected in ["h1", "h2", "h3"] {
            let check: CheckFundsEvent = rx.recv().await.unwrap().parse().unwrap();
            assert_eq!(check.endorsement_id, expected);
            let row = datastore
                .get_endorsement(&EndorsementId::from(expected))
                .unwrap();
            assert_eq!(row.status, EndorsementStatus::Validated);
        }
    }

    #[tokio::test]
    async fn test_no_parked_requests_is_a_no_op() {
        let clock = Arc::new(ManualClock::new(0));
        let datastore = Arc::new(Datastore::new());
        let bus = InMemoryBus::new(clock);
        let service = HoldReleaseService::new(datastore.clone(), Arc::new(bus));

        let employer_id = datastore.insert_employer(Employer::new("Acme", dec!(0)));
        service
            .release_on_hold_requests(BalanceIncreasedEvent {
                employer_id: employer_id.to_string(),
                change_amount: dec!(1.00),
                new_balance: dec!(1.00),
                timestamp: Utc::now(),
                source: None,
            })
            .await
            .unwrap();
    }
}
