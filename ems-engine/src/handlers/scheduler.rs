//! Handler buffering ingestion events into the smart scheduler.

use super::{parse_message, InterimOutput, MessageHandler};
use crate::error::EngineResult;
use crate::scheduler::SmartScheduler;
use crate::topics;
use async_trait::async_trait;
use ems_connectors::BusMessage;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Buffers `endorsement.ingested` payloads per employer
pub struct SchedulerIngestHandler {
    scheduler: Arc<SmartScheduler>,
}

impl SchedulerIngestHandler {
    pub fn new(scheduler: Arc<SmartScheduler>) -> Self {
        Self { scheduler }
    }

    fn employer_of(payload: &Value) -> Option<String> {
        payload
            .get("employer_id")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl MessageHandler for SchedulerIngestHandler {
    fn name(&self) -> &'static str {
        "smart_scheduler_handler"
    }

    async fn handle(
        &self,
        message: &BusMessage,
        interim: InterimOutput,
    ) -> EngineResult<InterimOutput> {
        if message.topic != topics::ENDORSEMENT_INGESTED {
            debug!(topic = %message.topic, "scheduler_handler_ignored_topic");
            return Ok(interim);
        }
        let Some(payload) = parse_message::<Value>(self.name(), message) else {
            return Ok(interim);
        };
        let Some(employer_id) = Self::employer_of(&payload) else {
            debug!("scheduler_handler_missing_employer_id");
            return Ok(interim);
        };
        self.scheduler.buffer_request(&employer_id, &payload).await?;
        Ok(interim)
    }

    /// Group a consumed batch by employer so each queue gets one append
    async fn bulk_handle(
        &self,
        messages: &[BusMessage],
        interim: InterimOutput,
    ) -> EngineResult<InterimOutput> {
        let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
        for message in messages {
            if message.topic != topics::ENDORSEMENT_INGESTED {
                continue;
            }
            let Some(payload) = parse_message::<Value>(self.name(), message) else {
                continue;
            };
            let Some(employer_id) = Self::employer_of(&payload) else {
                continue;
            };
            grouped.entry(employer_id).or_default().push(payload);
        }
        for (employer_id, payloads) in grouped {
            self.scheduler.buffer_batch(&employer_id, &payloads).await?;
        }
        Ok(interim)
    }
}
