//! Audit writer: one document per outbound attempt.

use crate::model::AuditLogDocument;
use ems_connectors::DocumentStore;
use std::sync::Arc;
use tracing::error;

/// Collection holding all insurer interaction documents
pub const AUDIT_COLLECTION: &str = "audit_logs";

/// Appends audit documents; failures are logged and never abort the flow
pub struct AuditWriter {
    store: Arc<dyn DocumentStore>,
}

impl AuditWriter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, document: AuditLogDocument) {
        let value = match serde_json::to_value(&document) {
            Ok(v) => v,
            Err(e) => {
                error!(
                    endorsement_id = %document.endorsement_id,
                    error = %e,
                    "insurer_gateway_audit_serialize_failed"
                );
                return;
            }
        };
        if let Err(e) = self.store.append(AUDIT_COLLECTION, value).await {
            error!(
                endorsement_id = %document.endorsement_id,
                insurer_id = %document.insurer_id,
                error = %e,
                "insurer_gateway_audit_failed"
            );
        }
    }
}
