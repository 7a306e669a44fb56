//! Handler waking parked requests on balance increases.

use super::{parse_message, InterimOutput, MessageHandler};
use crate::error::EngineResult;
use crate::hold_release::HoldReleaseService;
use crate::topics;
use async_trait::async_trait;
use ems_connectors::BusMessage;
use std::sync::Arc;
use tracing::debug;

/// Routes `ledger.balance_increased` to the hold-release service
pub struct HoldReleaseHandler {
    service: Arc<HoldReleaseService>,
}

impl HoldReleaseHandler {
    pub fn new(service: Arc<HoldReleaseService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for HoldReleaseHandler {
    fn name(&self) -> &'static str {
        "hold_release_handler"
    }

    async fn handle(
        &self,
        message: &BusMessage,
        interim: InterimOutput,
    ) -> EngineResult<InterimOutput> {
        if message.topic != topics::LEDGER_BALANCE_INCREASED {
            debug!(topic = %message.topic, "hold_release_ignored_topic");
            return Ok(interim);
        }
        if let Some(event) = parse_message(self.name(), message) {
            self.service.release_on_hold_requests(event).await?;
        }
        Ok(interim)
    }
}
