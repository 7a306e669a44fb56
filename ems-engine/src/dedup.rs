//! Duplicate-request guard.
//!
//! Identical payloads from the same employer inside the TTL window admit
//! exactly one request. The fingerprint is the sha256 of the canonical
//! JSON form, so key order in the submitted document does not matter.

use crate::canonical;
use crate::error::{EngineError, EngineResult};
use ems_connectors::KvStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Set-if-absent dedup guard over the KV store
pub struct DedupGuard {
    kv: Arc<dyn KvStore>,
    ttl_seconds: u64,
}

impl DedupGuard {
    pub fn new(kv: Arc<dyn KvStore>, ttl_seconds: u64) -> Self {
        Self { kv, ttl_seconds }
    }

    /// Admit the payload or fail with `DuplicateRequest`
    pub async fn check(&self, employer_id: &str, payload: &Value) -> EngineResult<()> {
        let fingerprint = canonical::fingerprint(payload);
        let key = format!("dedup:{employer_id}:{fingerprint}");

        let admitted = self.kv.set_nx(&key, "1", Some(self.ttl_seconds)).await?;
        if admitted {
            Ok(())
        } else {
            warn!(employer_id, hash = %fingerprint, "duplicate_request_detected");
            Err(EngineError::DuplicateRequest(employer_id.to_string()))
        }
    }
}
