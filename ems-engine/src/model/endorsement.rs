//! Endorsement requests and their lifecycle state machine.

use crate::ids;
use crate::model::employer::EmployerId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an endorsement request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndorsementId(pub String);

impl EndorsementId {
    pub fn generate() -> Self {
        Self(ids::generate_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndorsementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EndorsementId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of coverage change requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndorsementType {
    Addition,
    Deletion,
    Modification,
}

impl EndorsementType {
    /// Scheduling priority: lower sorts earlier. Deletions release funds,
    /// so they go ahead of additions inside the same window.
    pub fn priority(&self) -> u8 {
        match self {
            EndorsementType::Deletion => 1,
            EndorsementType::Modification => 2,
            EndorsementType::Addition => 3,
        }
    }

    /// Priority for a raw type string; unknown types sort last
    pub fn priority_of(raw: &str) -> u8 {
        match raw.to_uppercase().as_str() {
            "DELETION" => 1,
            "MODIFICATION" => 2,
            "ADDITION" => 3,
            _ => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndorsementType::Addition => "ADDITION",
            EndorsementType::Deletion => "DELETION",
            EndorsementType::Modification => "MODIFICATION",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_uppercase().as_str() {
            "ADDITION" => Some(EndorsementType::Addition),
            "DELETION" => Some(EndorsementType::Deletion),
            "MODIFICATION" => Some(EndorsementType::Modification),
            _ => None,
        }
    }
}

impl std::fmt::Display for EndorsementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle states of an endorsement request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndorsementStatus {
    Received,
    Validated,
    FundsLocked,
    Sent,
    /// Parked on insufficient funds; suspended, not terminal
    OnHold,
    Confirmed,
    Active,
    Failed,
}

impl EndorsementStatus {
    /// Whether the state machine permits `self -> to`.
    ///
    /// SENT -> SENT is the technical-retry loop; ON_HOLD -> VALIDATED is
    /// the hold-release wake-up.
    pub fn can_transition_to(&self, to: EndorsementStatus) -> bool {
        use EndorsementStatus::*;
        matches!(
            (self, to),
            (Received, Validated)
                | (Received, Failed)
                | (Validated, FundsLocked)
                | (Validated, OnHold)
                | (Validated, Failed)
                | (FundsLocked, Sent)
                | (FundsLocked, Failed)
                | (Sent, Sent)
                | (Sent, Confirmed)
                | (Sent, Failed)
                | (OnHold, Validated)
                | (Confirmed, Active)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EndorsementStatus::Active | EndorsementStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndorsementStatus::Received => "RECEIVED",
            EndorsementStatus::Validated => "VALIDATED",
            EndorsementStatus::FundsLocked => "FUNDS_LOCKED",
            EndorsementStatus::Sent => "SENT",
            EndorsementStatus::OnHold => "ON_HOLD",
            EndorsementStatus::Confirmed => "CONFIRMED",
            EndorsementStatus::Active => "ACTIVE",
            EndorsementStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for EndorsementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a guarded status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The row was already at or past the target; nothing changed
    Skipped(EndorsementStatus),
}

/// The central state-bearing entity of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndorsementRequest {
    pub id: EndorsementId,
    pub employer_id: EmployerId,
    #[serde(rename = "type")]
    pub request_type: EndorsementType,
    pub status: EndorsementStatus,
    /// Submitted change document (opaque at this layer)
    pub payload: serde_json::Value,
    pub retry_count: u32,
    /// The no-gap date coverage must be continuous from
    pub effective_date: NaiveDate,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
