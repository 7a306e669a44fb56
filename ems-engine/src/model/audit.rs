//! Audit log documents for insurer interactions.

use chrono::{DateTime, Utc};
use ems_config::Protocol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome recorded for one outbound attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failure,
    Timeout,
}

/// Snapshot of the request we sent (sanitised before construction)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

/// Snapshot of the response we received
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

/// Error details when the interaction failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogError {
    pub code: Option<String>,
    pub message: String,
    pub stack_trace: Option<String>,
}

/// One document per outbound attempt, appended exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogDocument {
    /// Links to the endorsement row in the relational store
    pub endorsement_id: String,
    pub trace_id: Option<String>,
    /// Target external system, e.g. "AETNA_01"
    pub insurer_id: String,
    pub timestamp: DateTime<Utc>,
    pub interaction_type: Protocol,
    pub latency_ms: f64,
    pub status: AuditStatus,
    pub request: Option<AuditLogRequest>,
    pub response: Option<AuditLogResponse>,
    pub error: Option<AuditLogError>,
}
