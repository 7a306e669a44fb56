//! Handler routing insurer request topics to the gateway service.

use super::{parse_message, InterimOutput, MessageHandler};
use crate::error::EngineResult;
use crate::gateway::InsurerGateway;
use crate::topics;
use async_trait::async_trait;
use ems_connectors::BusMessage;
use std::sync::Arc;
use tracing::debug;

/// Routes `insurer.request` and its retry topic to the gateway
pub struct GatewayHandler {
    gateway: Arc<InsurerGateway>,
}

impl GatewayHandler {
    pub fn new(gateway: Arc<InsurerGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl MessageHandler for GatewayHandler {
    fn name(&self) -> &'static str {
        "insurer_gateway_handler"
    }

    async fn handle(
        &self,
        message: &BusMessage,
        interim: InterimOutput,
    ) -> EngineResult<InterimOutput> {
        if message.topic != topics::INSURER_REQUEST && message.topic != topics::INSURER_REQUEST_RETRY
        {
            debug!(topic = %message.topic, "insurer_gateway_ignored_topic");
            return Ok(interim);
        }
        if let Some(event) = parse_message(self.name(), message) {
            self.gateway.process_request(event).await?;
        }
        Ok(interim)
    }
}
