//! Handler routing orchestrator-related topics to the workflow service.

use super::{parse_message, InterimOutput, MessageHandler};
use crate::error::EngineResult;
use crate::orchestrator::Orchestrator;
use crate::topics;
use async_trait::async_trait;
use ems_connectors::BusMessage;
use std::sync::Arc;
use tracing::debug;

/// Drives lifecycle transitions from prioritized, funds_locked, and
/// insurer outcome events
pub struct OrchestratorHandler {
    orchestrator: Arc<Orchestrator>,
}

impl OrchestratorHandler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MessageHandler for OrchestratorHandler {
    fn name(&self) -> &'static str {
        "orchestrator_handler"
    }

    async fn handle(
        &self,
        message: &BusMessage,
        interim: InterimOutput,
    ) -> EngineResult<InterimOutput> {
        match message.topic.as_str() {
            topics::ENDORSEMENT_PRIORITIZED => {
                if let Some(event) = parse_message(self.name(), message) {
                    self.orchestrator.handle_prioritized(event).await?;
                }
            }
            topics::LEDGER_FUNDS_LOCKED => {
                if let Some(event) = parse_message(self.name(), message) {
                    self.orchestrator.handle_funds_locked(event).await?;
                }
            }
            topics::INSURER_SUCCESS => {
                if let Some(event) = parse_message(self.name(), message) {
                    self.orchestrator.handle_insurer_outcome(event).await?;
                }
            }
            other => {
                debug!(topic = other, "orchestrator_ignored_topic");
            }
        }
        Ok(interim)
    }
}
