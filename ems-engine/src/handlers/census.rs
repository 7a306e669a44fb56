//! Handler applying completed endorsements to the census.

use super::{parse_message, InterimOutput, MessageHandler};
use crate::census::CensusService;
use crate::error::EngineResult;
use crate::topics;
use async_trait::async_trait;
use ems_connectors::BusMessage;
use std::sync::Arc;
use tracing::debug;

/// Routes `endorsement.completed` to the census service
pub struct CensusHandler {
    service: Arc<CensusService>,
}

impl CensusHandler {
    pub fn new(service: Arc<CensusService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for CensusHandler {
    fn name(&self) -> &'static str {
        "census_handler"
    }

    async fn handle(
        &self,
        message: &BusMessage,
        interim: InterimOutput,
    ) -> EngineResult<InterimOutput> {
        if message.topic != topics::ENDORSEMENT_COMPLETED {
            debug!(topic = %message.topic, "census_ignored_topic");
            return Ok(interim);
        }
        if let Some(event) = parse_message(self.name(), message) {
            self.service.apply_completed(event).await?;
        }
        Ok(interim)
    }
}
