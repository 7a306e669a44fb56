//! Typed payloads for the bus topics.
//!
//! Parsing is lenient: optional fields default, unknown fields are
//! ignored, and request types travel as raw strings so an unrecognised
//! type still flows through scheduling (where it sorts last) instead of
//! failing deserialisation.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shape shared by `endorsement.ingested` and `endorsement.prioritized`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub endorsement_id: String,
    pub employer_id: String,
    #[serde(rename = "type", default = "default_request_type")]
    pub request_type: String,
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub payload: Value,
    pub trace_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

/// `ledger.check_funds`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckFundsEvent {
    pub endorsement_id: String,
    pub employer_id: String,
    #[serde(default = "default_request_type")]
    pub request_type: String,
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub payload: Value,
    pub trace_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    /// Explicit amount override; takes precedence over the payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Value>,
}

fn default_request_type() -> String {
    "ADDITION".to_string()
}

/// Reservation outcome carried on `ledger.funds_locked`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Locked,
    OnHold,
    Failed,
}

/// `ledger.funds_locked`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundsLockedEvent {
    pub endorsement_id: String,
    pub employer_id: String,
    pub locked_amount: Decimal,
    pub reservation_id: String,
    pub status: ReservationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// `ledger.balance_increased`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceIncreasedEvent {
    pub employer_id: String,
    pub change_amount: Decimal,
    pub new_balance: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Ledger context forwarded to the insurer gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerContext {
    pub locked_amount: Option<Decimal>,
    pub reservation_id: Option<String>,
    pub new_balance: Option<Decimal>,
}

/// `insurer.request` and `insurer.request.retry`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsurerRequestEvent {
    pub endorsement_id: String,
    pub employer_id: String,
    #[serde(default = "default_request_type")]
    pub request_type: String,
    pub trace_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub ledger_context: LedgerContext,
    /// Resolved insurer, when known at publish time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurer_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    /// Present on the retry topic only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Value>,
}

/// Gateway outcome flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Classification of a gateway failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorType {
    None,
    /// Insurer-side semantic rejection; never retried
    Business,
    /// Transport or transient insurer failure; retried with backoff
    Technical,
}

/// Error details carried on outcome and DLQ messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeError {
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// `insurer.success`, which carries outcomes of either flavour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsurerOutcomeEvent {
    pub endorsement_id: String,
    pub employer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurer_id: Option<String>,
    pub trace_id: Option<String>,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurer_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<GatewayErrorType>,
}

/// `endorsement.completed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedEvent {
    pub endorsement_id: String,
    pub employer_id: String,
    pub trace_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurer_response: Option<Value>,
}

/// Envelope for dead-lettered messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEnvelope {
    pub original_message: Value,
    pub error_metadata: DlqErrorMetadata,
}

/// Error metadata attached to a dead-lettered message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqErrorMetadata {
    pub error_type: String,
    pub error_reason: String,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
    pub entity_id: String,
    pub handler: String,
    pub topic: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scheduled_event_lenient_parse() {
        let raw = json!({
            "endorsement_id": "abc",
            "employer_id": "emp1",
            "type": "ADDITION",
            "payload": {"coverage": {"amount": "200.00"}},
            "unknown_field": 42
        });
        let ev: ScheduledEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(ev.request_type, "ADDITION");
        assert_eq!(ev.retry_count, 0);
        assert!(ev.effective_date.is_none());
    }

    #[test]
    fn test_funds_locked_round_trip() {
        let ev = FundsLockedEvent {
            endorsement_id: "e".into(),
            employer_id: "m".into(),
            locked_amount: "200.00".parse().unwrap(),
            reservation_id: "r".into(),
            status: ReservationStatus::OnHold,
            new_balance: None,
            request_type: None,
            message: Some("Insufficient funds".into()),
            trace_id: None,
        };
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["status"], "ON_HOLD");
        // Decimals travel as strings
        assert_eq!(value["locked_amount"], "200.00");
        let back: FundsLockedEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.status, ReservationStatus::OnHold);
    }

    #[test]
    fn test_outcome_defaults_error_type_absent() {
        let raw = json!({
            "endorsement_id": "e",
            "employer_id": "m",
            "trace_id": null,
            "status": "FAILURE",
            "retry_count": 1
        });
        let ev: InsurerOutcomeEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(ev.status, OutcomeStatus::Failure);
        assert!(ev.error_type.is_none());
    }
}
