//! Endorsement orchestrator: lifecycle transitions driven by bus events.
//!
//! ```text
//! RECEIVED -> VALIDATED -> FUNDS_LOCKED -> SENT -> CONFIRMED -> ACTIVE
//!                 |             |           |
//!                 |             |           +-> SENT (technical retry)
//!                 |             |           +-> FAILED (business / exhausted)
//!                 |             +-> ON_HOLD (insufficient funds)
//!                 +-> FAILED
//! ```
//!
//! The orchestrator never touches the balance; only the ledger does.
//! Retries are scheduled on the broker (visible_after) rather than with
//! in-process timers, so a worker crash cannot drop the retry intent.

use crate::error::EngineResult;
use crate::events::{
    CheckFundsEvent, CompletedEvent, DlqEnvelope, DlqErrorMetadata, FundsLockedEvent,
    GatewayErrorType, InsurerOutcomeEvent, InsurerRequestEvent, LedgerContext, OutcomeStatus,
    ReservationStatus, ScheduledEvent,
};
use crate::model::{EndorsementId, EndorsementRequest, EndorsementStatus, TransitionOutcome};
use crate::store::{Datastore, ReservationDisposition};
use crate::topics;
use ems_config::{FailedDebitPolicy, InsurerConfig};
use ems_connectors::bus::{
    HEADER_EMPLOYER_ID, HEADER_RETRY_AFTER_SECONDS, HEADER_SOURCE, HEADER_TRACE_ID,
    HEADER_VISIBLE_AFTER,
};
use ems_connectors::{BusMessage, BusProducer, Clock};
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

const SOURCE: &str = "orchestrator";
const DLQ_HANDLER: &str = "insurer_gateway";

/// Coordinates each request across ledger, insurer, and completion stages
pub struct Orchestrator {
    datastore: Arc<Datastore>,
    bus: Arc<dyn BusProducer>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    backoff_base: u32,
    failed_debit_policy: FailedDebitPolicy,
}

impl Orchestrator {
    pub fn new(
        datastore: Arc<Datastore>,
        bus: Arc<dyn BusProducer>,
        clock: Arc<dyn Clock>,
        insurer: &InsurerConfig,
        failed_debit_policy: FailedDebitPolicy,
    ) -> Self {
        Self {
            datastore,
            bus,
            clock,
            max_retries: insurer.max_retries,
            backoff_base: insurer.backoff_base,
            failed_debit_policy,
        }
    }

    /// Prioritized request out of the scheduler: validate and ask the
    /// ledger to reserve funds.
    pub async fn handle_prioritized(&self, event: ScheduledEvent) -> EngineResult<()> {
        if event.endorsement_id.is_empty() || event.employer_id.is_empty() {
            warn!("orchestrator_skipping_prioritized");
            return Ok(());
        }
        let id = EndorsementId::from(event.endorsement_id.as_str());
        self.transition(&id, EndorsementStatus::Validated)?;

        let check = CheckFundsEvent {
            endorsement_id: event.endorsement_id.clone(),
            employer_id: event.employer_id.clone(),
            request_type: event.request_type.clone(),
            effective_date: event.effective_date,
            payload: event.payload.clone(),
            trace_id: event.trace_id.clone(),
            retry_count: event.retry_count,
            amount: None,
        };
        self.publish(
            topics::LEDGER_CHECK_FUNDS,
            &event.endorsement_id,
            &check,
            event.trace_id.as_deref(),
            Some(&event.employer_id),
        )
        .await;
        Ok(())
    }

    /// Reservation outcome from the ledger
    pub async fn handle_funds_locked(&self, event: FundsLockedEvent) -> EngineResult<()> {
        if event.endorsement_id.is_empty() || event.employer_id.is_empty() {
            warn!("orchestrator_skipping_funds_locked");
            return Ok(());
        }
        let id = EndorsementId::from(event.endorsement_id.as_str());

        match event.status {
            ReservationStatus::Locked => {
                self.transition(&id, EndorsementStatus::FundsLocked)?;
                self.transition(&id, EndorsementStatus::Sent)?;

                let row = self.datastore.get_endorsement(&id)?;
                let request = InsurerRequestEvent {
                    endorsement_id: event.endorsement_id.clone(),
                    employer_id: event.employer_id.clone(),
                    request_type: row.request_type.as_str().to_string(),
                    trace_id: event.trace_id.clone(),
                    payload: row.payload.clone(),
                    ledger_context: LedgerContext {
                        locked_amount: Some(event.locked_amount),
                        reservation_id: Some(event.reservation_id.clone()),
                        new_balance: event.new_balance,
                    },
                    insurer_id: resolve_insurer_id(&row.payload),
                    retry_count: row.retry_count,
                    retry_delay_seconds: None,
                    last_error: None,
                };
                self.publish(
                    topics::INSURER_REQUEST,
                    &event.endorsement_id,
                    &request,
                    event.trace_id.as_deref(),
                    Some(&event.employer_id),
                )
                .await;
            }
            ReservationStatus::OnHold => {
                self.transition(&id, EndorsementStatus::OnHold)?;
            }
            ReservationStatus::Failed => {
                self.transition(&id, EndorsementStatus::Failed)?;
            }
        }
        Ok(())
    }

    /// Gateway outcome: finalise, retry with backoff, or dead-letter
    pub async fn handle_insurer_outcome(&self, event: InsurerOutcomeEvent) -> EngineResult<()> {
        if event.endorsement_id.is_empty() || event.employer_id.is_empty() {
            warn!("orchestrator_skipping_insurer_outcome");
            return Ok(());
        }
        let id = EndorsementId::from(event.endorsement_id.as_str());

        if event.status == OutcomeStatus::Success {
            self.transition(&id, EndorsementStatus::Confirmed)?;

            let row = self.datastore.get_endorsement(&id)?;
            let completed = CompletedEvent {
                endorsement_id: event.endorsement_id.clone(),
                employer_id: event.employer_id.clone(),
                trace_id: event.trace_id.clone(),
                retry_count: row.retry_count,
                status: EndorsementStatus::Active.as_str().to_string(),
                insurer_response: event.insurer_response.clone(),
            };
            self.publish(
                topics::ENDORSEMENT_COMPLETED,
                &event.endorsement_id,
                &completed,
                event.trace_id.as_deref(),
                Some(&event.employer_id),
            )
            .await;

            self.transition(&id, EndorsementStatus::Active)?;
            self.datastore
                .finalize_reservation(&id, ReservationDisposition::Cleared)
                .await?;
            return Ok(());
        }

        let error_type = event.error_type.unwrap_or(GatewayErrorType::Technical);
        match error_type {
            GatewayErrorType::Business => {
                info!(
                    endorsement_id = %id,
                    "orchestrator_business_failure_dead_lettered"
                );
                self.fail_and_dead_letter(&id, &event).await?;
            }
            GatewayErrorType::Technical | GatewayErrorType::None => {
                let next_retry = event.retry_count + 1;
                if next_retry <= self.max_retries {
                    self.schedule_retry(&id, &event, next_retry).await?;
                } else {
                    warn!(
                        endorsement_id = %id,
                        retry_count = event.retry_count,
                        "orchestrator_retries_exhausted"
                    );
                    self.fail_and_dead_letter(&id, &event).await?;
                }
            }
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: &EndorsementId,
        event: &InsurerOutcomeEvent,
        next_retry: u32,
    ) -> EngineResult<()> {
        let delay_seconds = u64::from(self.backoff_base.pow(next_retry)) * 60;
        let retry_count = self.datastore.increment_retry(id)?;
        self.transition(id, EndorsementStatus::Sent)?;

        let row = self.datastore.get_endorsement(id)?;
        let retry = InsurerRequestEvent {
            endorsement_id: event.endorsement_id.clone(),
            employer_id: event.employer_id.clone(),
            request_type: row.request_type.as_str().to_string(),
            trace_id: event.trace_id.clone(),
            payload: row.payload.clone(),
            ledger_context: LedgerContext::default(),
            insurer_id: event
                .insurer_id
                .clone()
                .or_else(|| resolve_insurer_id(&row.payload)),
            retry_count,
            retry_delay_seconds: Some(delay_seconds),
            last_error: event
                .error
                .as_ref()
                .map(|e| serde_json::to_value(e).unwrap_or(Value::Null)),
        };

        info!(
            endorsement_id = %id,
            retry_count,
            delay_seconds,
            "orchestrator_retry_scheduled"
        );

        let visible_after = self.clock.epoch_secs() + delay_seconds;
        let message = match BusMessage::json(
            topics::INSURER_REQUEST_RETRY,
            Some(event.endorsement_id.as_str()),
            &retry,
        ) {
            Ok(mut m) => {
                m = m
                    .with_header(HEADER_SOURCE, SOURCE)
                    .with_header(HEADER_EMPLOYER_ID, event.employer_id.clone())
                    .with_header(HEADER_RETRY_AFTER_SECONDS, delay_seconds.to_string())
                    .with_header(HEADER_VISIBLE_AFTER, visible_after.to_string());
                if let Some(trace_id) = &event.trace_id {
                    m = m.with_header(HEADER_TRACE_ID, trace_id.clone());
                }
                m
            }
            Err(e) => {
                error!(endorsement_id = %id, error = %e, "orchestrator_retry_serialize_failed");
                return Ok(());
            }
        };
        if let Err(e) = self.bus.publish(message).await {
            error!(
                endorsement_id = %id,
                topic = topics::INSURER_REQUEST_RETRY,
                error = %e,
                "orchestrator_publish_failed"
            );
        } else {
            counter!("ems_messages_produced_total", "topic" => topics::INSURER_REQUEST_RETRY)
                .increment(1);
        }
        Ok(())
    }

    async fn fail_and_dead_letter(
        &self,
        id: &EndorsementId,
        event: &InsurerOutcomeEvent,
    ) -> EngineResult<()> {
        self.transition(id, EndorsementStatus::Failed)?;
        let disposition = match self.failed_debit_policy {
            FailedDebitPolicy::Refund => ReservationDisposition::Failed,
            FailedDebitPolicy::Clear => ReservationDisposition::Cleared,
        };
        self.datastore.finalize_reservation(id, disposition).await?;

        let envelope = DlqEnvelope {
            original_message: serde_json::to_value(event)?,
            error_metadata: DlqErrorMetadata {
                error_type: event
                    .error_type
                    .map(|t| format!("{t:?}").to_uppercase())
                    .unwrap_or_else(|| "TECHNICAL".to_string()),
                error_reason: event
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "insurer dispatch failed".to_string()),
                failed_at: chrono::Utc::now(),
                retry_count: event.retry_count,
                entity_id: event.endorsement_id.clone(),
                handler: DLQ_HANDLER.to_string(),
                topic: topics::INSURER_SUCCESS.to_string(),
            },
        };
        self.publish(
            topics::INSURER_REQUEST_DLQ,
            &event.endorsement_id,
            &envelope,
            event.trace_id.as_deref(),
            Some(&event.employer_id),
        )
        .await;
        Ok(())
    }

    /// Guarded status write; skipped transitions are logged by the store
    fn transition(&self, id: &EndorsementId, to: EndorsementStatus) -> EngineResult<TransitionOutcome> {
        let outcome = self.datastore.update_status(id, to)?;
        if outcome == TransitionOutcome::Applied {
            let row: EndorsementRequest = self.datastore.get_endorsement(id)?;
            counter!("ems_endorsements_processed_total",
                "status" => to.as_str(), "type" => row.request_type.as_str())
            .increment(1);
            info!(
                endorsement_id = %id,
                status = to.as_str(),
                "orchestrator_status_updated"
            );
        }
        Ok(outcome)
    }

    async fn publish<T: serde::Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
        trace_id: Option<&str>,
        employer_id: Option<&str>,
    ) {
        let message = match BusMessage::json(topic, Some(key), value) {
            Ok(mut m) => {
                m = m.with_header(HEADER_SOURCE, SOURCE);
                if let Some(trace_id) = trace_id {
                    m = m.with_header(HEADER_TRACE_ID, trace_id);
                }
                if let Some(employer_id) = employer_id {
                    m = m.with_header(HEADER_EMPLOYER_ID, employer_id);
                }
                m
            }
            Err(e) => {
                error!(topic, key, error = %e, "orchestrator_serialize_failed");
                return;
            }
        };
        if let Err(e) = self.bus.publish(message).await {
            error!(topic, key, error = %e, "orchestrator_publish_failed");
        } else {
            counter!("ems_messages_produced_total", "topic" => topic.to_string()).increment(1);
        }
    }
}

/// insurer_id precedence: payload.coverage.insurer_id, then
/// payload.insurer_id
fn resolve_insurer_id(payload: &Value) -> Option<String> {
    payload
        .get("coverage")
        .and_then(|c| c.get("insurer_id"))
        .and_then(Value::as_str)
        .or_else(|| payload.get("insurer_id").and_then(Value::as_str))
        .map(|s| s.to_string())
}
