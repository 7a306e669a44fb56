//! Handler routing check_funds messages to the ledger engine.

use super::{parse_message, InterimOutput, MessageHandler};
use crate::error::EngineResult;
use crate::ledger::LedgerEngine;
use crate::topics;
use async_trait::async_trait;
use ems_connectors::BusMessage;
use std::sync::Arc;
use tracing::debug;

/// Routes `ledger.check_funds` to the ledger engine
pub struct LedgerHandler {
    engine: Arc<LedgerEngine>,
}

impl LedgerHandler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MessageHandler for LedgerHandler {
    fn name(&self) -> &'static str {
        "ledger_handler"
    }

    async fn handle(
        &self,
        message: &BusMessage,
        interim: InterimOutput,
    ) -> EngineResult<InterimOutput> {
        if message.topic != topics::LEDGER_CHECK_FUNDS {
            debug!(topic = %message.topic, "ledger_handler_ignored_topic");
            return Ok(interim);
        }
        if let Some(event) = parse_message(self.name(), message) {
            self.engine.process_check_funds(event).await?;
        }
        Ok(interim)
    }
}
