//! Ingestion: validate, dedup, persist RECEIVED, publish to the scheduler.
//!
//! Validation failures and duplicates are rejected here and never enter
//! the pipeline.

use crate::dedup::DedupGuard;
use crate::error::{EngineError, EngineResult};
use crate::events::ScheduledEvent;
use crate::model::{
    EmployerId, EmployerStatus, EndorsementId, EndorsementRequest, EndorsementStatus,
    EndorsementType,
};
use crate::store::Datastore;
use crate::topics;
use chrono::NaiveDate;
use ems_connectors::bus::{HEADER_EMPLOYER_ID, HEADER_SOURCE, HEADER_TRACE_ID};
use ems_connectors::{BusMessage, BusProducer};
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

const SOURCE: &str = "ingestion";

/// A submitted change request, pre-persistence
#[derive(Debug, Clone)]
pub struct NewEndorsement {
    pub employer_id: EmployerId,
    pub request_type: EndorsementType,
    pub payload: Value,
    pub effective_date: NaiveDate,
    pub trace_id: Option<String>,
}

/// Front door of the pipeline
pub struct IngestionService {
    datastore: Arc<Datastore>,
    bus: Arc<dyn BusProducer>,
    dedup: DedupGuard,
}

impl IngestionService {
    pub fn new(datastore: Arc<Datastore>, bus: Arc<dyn BusProducer>, dedup: DedupGuard) -> Self {
        Self {
            datastore,
            bus,
            dedup,
        }
    }

    /// Admit a request: dedup-guarded, persisted as RECEIVED, published on
    /// the ingestion topic for the scheduler to buffer.
    pub async fn submit(&self, submission: NewEndorsement) -> EngineResult<EndorsementRequest> {
        let employer = self.datastore.get_employer(&submission.employer_id).await?;
        if employer.status != EmployerStatus::Active {
            return Err(EngineError::Validation(format!(
                "employer {} is not active",
                employer.id
            )));
        }
        if submission.payload.is_null() {
            return Err(EngineError::Validation("payload must not be null".to_string()));
        }

        self.dedup
            .check(submission.employer_id.as_str(), &submission.payload)
            .await?;

        let request = EndorsementRequest {
            id: EndorsementId::generate(),
            employer_id: submission.employer_id.clone(),
            request_type: submission.request_type,
            status: EndorsementStatus::Received,
            payload: submission.payload.clone(),
            retry_count: 0,
            effective_date: submission.effective_date,
            trace_id: submission.trace_id.clone(),
            created_at: chrono::Utc::now(),
        };
        self.datastore.insert_endorsement(request.clone());
        counter!("ems_endorsements_processed_total",
            "status" => EndorsementStatus::Received.as_str(),
            "type" => request.request_type.as_str())
        .increment(1);

        let event = ScheduledEvent {
            endorsement_id: request.id.to_string(),
            employer_id: request.employer_id.to_string(),
            request_type: request.request_type.as_str().to_string(),
            effective_date: Some(request.effective_date),
            payload: request.payload.clone(),
            trace_id: request.trace_id.clone(),
            retry_count: 0,
        };
        let mut message = BusMessage::json(
            topics::ENDORSEMENT_INGESTED,
            Some(request.id.as_str()),
            &event,
        )?
        .with_header(HEADER_SOURCE, SOURCE)
        .with_header(HEADER_EMPLOYER_ID, request.employer_id.to_string());
        if let Some(trace_id) = &request.trace_id {
            message = message.with_header(HEADER_TRACE_ID, trace_id.clone());
        }
        self.bus.publish(message).await?;
        counter!("ems_messages_produced_total", "topic" => topics::ENDORSEMENT_INGESTED)
            .increment(1);

        info!(
            endorsement_id = %request.id,
            employer_id = %request.employer_id,
            request_type = request.request_type.as_str(),
            "endorsement_ingested"
        );
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Employer;
    use ems_connectors::{InMemoryBus, ManualClock, MemoryKvStore};
    use rust_decimal_macros::dec;
    use serde_json::json;

    struct Fixture {
        service: IngestionService,
        datastore: Arc<Datastore>,
        bus: InMemoryBus,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(0));
        let datastore = Arc::new(Datastore::new());
        let bus = InMemoryBus::new(clock.clone());
        let dedup = DedupGuard::new(Arc::new(MemoryKvStore::new(clock)), 86_400);
        let service = IngestionService::new(datastore.clone(), Arc::new(bus.clone()), dedup);
        Fixture {
            service,
            datastore,
            bus,
        }
    }

    fn submission(employer_id: &EmployerId) -> NewEndorsement {
        NewEndorsement {
            employer_id: employer_id.clone(),
            request_type: EndorsementType::Addition,
            payload: json!({"employee_id": "e42", "coverage": {"amount": "200.00"}}),
            effective_date: "2026-08-01".parse().unwrap(),
            trace_id: Some("t-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_submit_persists_and_publishes() {
        let f = fixture();
        let employer_id = f.datastore.insert_employer(Employer::new("Acme", dec!(1000)));
        let mut rx = f.bus.subscribe(&[topics::ENDORSEMENT_INGESTED]);

        let request = f.service.submit(submission(&employer_id)).await.unwrap();
        assert_eq!(request.status, EndorsementStatus::Received);

        let event: ScheduledEvent = rx.recv().await.unwrap().parse().unwrap();
        assert_eq!(event.endorsement_id, request.id.to_string());
        assert_eq!(event.request_type, "ADDITION");
    }

    #[tokio::test]
    async fn test_duplicate_within_window_rejected() {
        let f = fixture();
        let employer_id = f.datastore.insert_employer(Employer::new("Acme", dec!(1000)));

        f.service.submit(submission(&employer_id)).await.unwrap();
        let err = f.service.submit(submission(&employer_id)).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateRequest(_)));

        // Exactly one row exists
        assert_eq!(f.datastore.endorsements_by_employer(&employer_id).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_employer_rejected() {
        let f = fixture();
        let err = f
            .service
            .submit(submission(&EmployerId::from("ghost")))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmployerNotFound(_)));
    }
}
