//! Insurer gateway: executes outbound requests, records sanitised audit
//! documents, and publishes an outcome for every completion.
//!
//! Requests missing an insurer id or a gateway configuration short-circuit
//! to a technical failure and are still audited, so no attempt escapes the
//! trail.

pub mod strategy;

use crate::error::EngineResult;
use crate::events::{GatewayErrorType, InsurerOutcomeEvent, InsurerRequestEvent, OutcomeStatus};
use crate::model::{AuditLogDocument, AuditLogError, AuditLogRequest, AuditLogResponse, AuditStatus};
use crate::sanitize::{mask_sensitive, sanitize_headers};
use crate::topics;
use crate::audit::AuditWriter;
use ems_config::{GatewayEntry, InsurerConfig, Protocol};
use ems_connectors::bus::{HEADER_EMPLOYER_ID, HEADER_SOURCE, HEADER_TRACE_ID};
use ems_connectors::{BusMessage, BusProducer};
use metrics::counter;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use self::strategy::{GatewayOutcome, GatewayRequest, HttpStrategy, ProtocolStrategy, ResponseSnapshot};
use tracing::{debug, error, warn};

const SOURCE: &str = "insurer_gateway";

/// Drives protocol strategies and the audit trail
pub struct InsurerGateway {
    bus: Arc<dyn BusProducer>,
    audit: AuditWriter,
    rest: ProtocolStrategy,
    config: InsurerConfig,
}

impl InsurerGateway {
    pub fn new(
        bus: Arc<dyn BusProducer>,
        audit: AuditWriter,
        http_client: reqwest::Client,
        config: InsurerConfig,
    ) -> Self {
        Self {
            bus,
            audit,
            rest: ProtocolStrategy::RestApi(HttpStrategy::new(http_client)),
            config,
        }
    }

    /// Handle one `insurer.request` (or retry) message
    pub async fn process_request(&self, event: InsurerRequestEvent) -> EngineResult<()> {
        if event.endorsement_id.is_empty() || event.employer_id.is_empty() {
            error!("insurer_gateway_missing_ids");
            return Ok(());
        }

        let insurer_id = match self.resolve_insurer_id(&event) {
            Some(id) => id,
            None => {
                self.short_circuit(
                    &event,
                    "unknown",
                    AuditLogError {
                        code: Some("INSURER_ID_MISSING".to_string()),
                        message: "Insurer identifier could not be resolved from payload"
                            .to_string(),
                        stack_trace: None,
                    },
                )
                .await;
                return Ok(());
            }
        };

        let entry = match self.config.gateways.get(&insurer_id) {
            Some(entry) => entry.clone(),
            None => {
                self.short_circuit(
                    &event,
                    &insurer_id,
                    AuditLogError {
                        code: Some("GATEWAY_CONFIG_MISSING".to_string()),
                        message: format!(
                            "No gateway configuration defined for insurer '{insurer_id}'"
                        ),
                        stack_trace: None,
                    },
                )
                .await;
                return Ok(());
            }
        };

        let request = self.build_request(&event, &insurer_id, &entry);
        let protocol = entry.protocol;
        let strategy = self.strategy_for(protocol);

        debug!(
            endorsement_id = %event.endorsement_id,
            insurer_id = %insurer_id,
            protocol = protocol.as_str(),
            retry_count = event.retry_count,
            "insurer_gateway_dispatch"
        );

        let started = Instant::now();
        let outcome = strategy.execute(&request).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.record_metrics(&insurer_id, protocol, &outcome);
        self.audit
            .record(AuditLogDocument {
                endorsement_id: event.endorsement_id.clone(),
                trace_id: event.trace_id.clone(),
                insurer_id: insurer_id.clone(),
                timestamp: chrono::Utc::now(),
                interaction_type: protocol,
                latency_ms,
                status: outcome.audit_status,
                request: Some(request_snapshot(&request)),
                response: outcome.response.as_ref().map(response_snapshot),
                error: outcome.error_details.clone(),
            })
            .await;

        self.publish_outcome(&event, &insurer_id, &outcome).await;
        Ok(())
    }

    /// Failure before any outbound call: audit it and answer like any
    /// other completed attempt.
    async fn short_circuit(
        &self,
        event: &InsurerRequestEvent,
        insurer_id: &str,
        error: AuditLogError,
    ) {
        warn!(
            endorsement_id = %event.endorsement_id,
            insurer_id,
            code = error.code.as_deref().unwrap_or(""),
            "insurer_gateway_short_circuit"
        );
        let outcome = GatewayOutcome {
            response: None,
            audit_status: AuditStatus::Failure,
            error_details: Some(error),
            error_type: GatewayErrorType::Technical,
        };
        self.record_metrics(insurer_id, Protocol::RestApi, &outcome);
        self.audit
            .record(AuditLogDocument {
                endorsement_id: event.endorsement_id.clone(),
                trace_id: event.trace_id.clone(),
                insurer_id: insurer_id.to_string(),
                timestamp: chrono::Utc::now(),
                interaction_type: Protocol::RestApi,
                latency_ms: 0.0,
                status: AuditStatus::Failure,
                request: Some(AuditLogRequest {
                    url: String::new(),
                    method: "POST".to_string(),
                    headers: BTreeMap::new(),
                    body: None,
                }),
                response: None,
                error: outcome.error_details.clone(),
            })
            .await;
        self.publish_outcome(event, insurer_id, &outcome).await;
    }

    /// insurer_id precedence: payload.coverage.insurer_id, then
    /// payload.insurer_id, then the event's own field.
    fn resolve_insurer_id(&self, event: &InsurerRequestEvent) -> Option<String> {
        event
            .payload
            .get("coverage")
            .and_then(|c| c.get("insurer_id"))
            .and_then(Value::as_str)
            .or_else(|| event.payload.get("insurer_id").and_then(Value::as_str))
            .map(|s| s.to_string())
            .or_else(|| event.insurer_id.clone())
    }

    fn strategy_for(&self, protocol: Protocol) -> &ProtocolStrategy {
        match protocol {
            Protocol::RestApi => &self.rest,
            // Anticipated protocols fall back to the default strategy
            Protocol::SoapXml | Protocol::SftpBatch => {
                debug!(protocol = protocol.as_str(), "insurer_gateway_protocol_fallback");
                &self.rest
            }
        }
    }

    fn build_request(
        &self,
        event: &InsurerRequestEvent,
        insurer_id: &str,
        entry: &GatewayEntry,
    ) -> GatewayRequest {
        let mut headers: BTreeMap<String, String> = entry.headers.clone();
        headers
            .entry("Content-Type".to_string())
            .or_insert_with(|| "application/json".to_string());
        if let Some(trace_id) = &event.trace_id {
            headers.entry(HEADER_TRACE_ID.to_string()).or_insert_with(|| trace_id.clone());
        }
        headers
            .entry(HEADER_EMPLOYER_ID.to_string())
            .or_insert_with(|| event.employer_id.clone());
        // Insurers deduplicate retries on this key
        headers
            .entry("X-Idempotency-Key".to_string())
            .or_insert_with(|| {
                format!("{}-{}-{}", event.endorsement_id, insurer_id, event.retry_count)
            });

        let timeout_seconds = entry
            .timeout_seconds
            .unwrap_or(self.config.request_timeout_seconds);

        GatewayRequest {
            endorsement_id: event.endorsement_id.clone(),
            employer_id: event.employer_id.clone(),
            trace_id: event.trace_id.clone(),
            retry_count: event.retry_count,
            request_body: event.payload.clone(),
            request_headers: headers,
            request_url: entry.url.replace("{insurer_id}", insurer_id),
            method: entry.method.clone(),
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    fn record_metrics(&self, insurer_id: &str, protocol: Protocol, outcome: &GatewayOutcome) {
        let status = if outcome.is_success() { "SUCCESS" } else { "FAILURE" };
        counter!("ems_insurer_requests_total",
            "insurer_id" => insurer_id.to_string(),
            "protocol" => protocol.as_str(),
            "status" => status)
        .increment(1);
        if !outcome.is_success() {
            counter!("ems_insurer_request_failures_total",
                "insurer_id" => insurer_id.to_string(),
                "error_type" => format!("{:?}", outcome.error_type).to_uppercase())
            .increment(1);
        }
    }

    /// Every completion answers on the outcome topic, success or not
    async fn publish_outcome(
        &self,
        event: &InsurerRequestEvent,
        insurer_id: &str,
        outcome: &GatewayOutcome,
    ) {
        let status = if outcome.is_success() {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Failure
        };
        let outcome_event = InsurerOutcomeEvent {
            endorsement_id: event.endorsement_id.clone(),
            employer_id: event.employer_id.clone(),
            insurer_id: Some(insurer_id.to_string()),
            trace_id: event.trace_id.clone(),
            status,
            retry_count: event.retry_count,
            insurer_response: outcome.response.as_ref().map(|r| {
                serde_json::json!({
                    "status_code": r.status_code,
                    "headers": r.headers,
                    "body": r.body,
                })
            }),
            error: outcome.error_details.as_ref().map(|e| crate::events::OutcomeError {
                code: e.code.clone(),
                message: e.message.clone(),
                stack_trace: e.stack_trace.clone(),
            }),
            error_type: match outcome.error_type {
                GatewayErrorType::None => None,
                other => Some(other),
            },
        };

        let message = match BusMessage::json(
            topics::INSURER_SUCCESS,
            Some(event.endorsement_id.as_str()),
            &outcome_event,
        ) {
            Ok(mut m) => {
                m = m
                    .with_header(HEADER_SOURCE, SOURCE)
                    .with_header(HEADER_EMPLOYER_ID, event.employer_id.clone());
                if let Some(trace_id) = &event.trace_id {
                    m = m.with_header(HEADER_TRACE_ID, trace_id.clone());
                }
                m
            }
            Err(e) => {
                error!(endorsement_id = %event.endorsement_id, error = %e, "insurer_gateway_serialize_failed");
                return;
            }
        };
        if let Err(e) = self.bus.publish(message).await {
            error!(
                endorsement_id = %event.endorsement_id,
                employer_id = %event.employer_id,
                topic = topics::INSURER_SUCCESS,
                error = %e,
                "insurer_gateway_event_publish_failed"
            );
        } else {
            counter!("ems_messages_produced_total", "topic" => topics::INSURER_SUCCESS)
                .increment(1);
        }
    }
}

fn request_snapshot(request: &GatewayRequest) -> AuditLogRequest {
    AuditLogRequest {
        url: request.request_url.clone(),
        method: request.method.clone(),
        headers: sanitize_headers(&request.request_headers),
        body: Some(mask_sensitive(&request.request_body)),
    }
}

fn response_snapshot(response: &ResponseSnapshot) -> AuditLogResponse {
    AuditLogResponse {
        status_code: response.status_code,
        headers: sanitize_headers(&response.headers),
        body: response.body.clone(),
    }
}
