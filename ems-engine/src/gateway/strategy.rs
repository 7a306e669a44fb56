//! Outbound protocol strategies.
//!
//! Protocols are a closed sum type: REST is implemented, SOAP and SFTP are
//! anticipated by the audit enum but route to the default REST strategy
//! until their variants exist.

use crate::events::GatewayErrorType;
use crate::model::{AuditLogError, AuditStatus};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::error;

/// Everything a strategy needs to execute one outbound attempt
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub endorsement_id: String,
    pub employer_id: String,
    pub trace_id: Option<String>,
    pub retry_count: u32,
    pub request_body: Value,
    pub request_headers: BTreeMap<String, String>,
    pub request_url: String,
    pub method: String,
    pub timeout: Duration,
}

/// Compact snapshot of the insurer's response
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

/// Result of one outbound attempt
#[derive(Debug, Clone)]
pub struct GatewayOutcome {
    pub response: Option<ResponseSnapshot>,
    pub audit_status: AuditStatus,
    pub error_details: Option<AuditLogError>,
    pub error_type: GatewayErrorType,
}

impl GatewayOutcome {
    pub fn is_success(&self) -> bool {
        self.audit_status == AuditStatus::Success
    }
}

/// Protocol strategy sum type
pub enum ProtocolStrategy {
    RestApi(HttpStrategy),
}

impl ProtocolStrategy {
    pub async fn execute(&self, request: &GatewayRequest) -> GatewayOutcome {
        match self {
            ProtocolStrategy::RestApi(strategy) => strategy.execute(request).await,
        }
    }
}

/// HTTP strategy: 2xx success, 4xx business failure, 5xx and transport
/// errors technical.
pub struct HttpStrategy {
    client: reqwest::Client,
}

impl HttpStrategy {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn execute(&self, request: &GatewayRequest) -> GatewayOutcome {
        let method = Method::from_bytes(request.method.as_bytes()).unwrap_or(Method::POST);
        let mut builder = self
            .client
            .request(method, &request.request_url)
            .timeout(request.timeout)
            .json(&request.request_body);
        for (name, value) in &request.request_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match builder.send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let headers = response
                    .headers()
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.to_string(),
                            value.to_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect();
                let text = response.text().await.unwrap_or_default();
                let body = parse_body(&text);
                let snapshot = ResponseSnapshot {
                    status_code,
                    headers,
                    body,
                };

                if (200..300).contains(&status_code) {
                    GatewayOutcome {
                        response: Some(snapshot),
                        audit_status: AuditStatus::Success,
                        error_details: None,
                        error_type: GatewayErrorType::None,
                    }
                } else {
                    let error_type = if (400..500).contains(&status_code) {
                        GatewayErrorType::Business
                    } else {
                        GatewayErrorType::Technical
                    };
                    GatewayOutcome {
                        response: Some(snapshot),
                        audit_status: AuditStatus::Failure,
                        error_details: Some(AuditLogError {
                            code: Some(format!("HTTP_{status_code}")),
                            message: text,
                            stack_trace: None,
                        }),
                        error_type,
                    }
                }
            }
            Err(e) => {
                error!(
                    endorsement_id = %request.endorsement_id,
                    employer_id = %request.employer_id,
                    error = %e,
                    "insurer_gateway_http_request_error"
                );
                let (code, audit_status) = if e.is_timeout() {
                    ("REQUEST_TIMEOUT", AuditStatus::Timeout)
                } else {
                    ("REQUEST_ERROR", AuditStatus::Failure)
                };
                GatewayOutcome {
                    response: None,
                    audit_status,
                    error_details: Some(AuditLogError {
                        code: Some(code.to_string()),
                        message: e.to_string(),
                        stack_trace: None,
                    }),
                    error_type: GatewayErrorType::Technical,
                }
            }
        }
    }
}

/// Responses are JSON when they parse, raw text otherwise
fn parse_body(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}
