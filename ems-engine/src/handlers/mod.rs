//! Message handler contract and registry.
//!
//! Handlers receive each message plus an `InterimOutput` document and
//! return an updated copy, enabling lightweight stage-to-stage data
//! passing within one consumer process. `bulk_handle` is an optional fast
//! path; the default fans out message by message with per-message failure
//! isolation.

mod census;
mod gateway;
mod hold_release;
mod ledger;
mod orchestrator;
mod scheduler;

pub use census::CensusHandler;
pub use gateway::GatewayHandler;
pub use hold_release::HoldReleaseHandler;
pub use ledger::LedgerHandler;
pub use orchestrator::OrchestratorHandler;
pub use scheduler::SchedulerIngestHandler;

use crate::error::EngineResult;
use async_trait::async_trait;
use ems_connectors::BusMessage;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

/// Mutable document passed from handler to handler within one dispatch
#[derive(Debug, Clone, Default)]
pub struct InterimOutput {
    pub data: serde_json::Map<String, Value>,
}

/// Contract every consumer-side handler implements
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        message: &BusMessage,
        interim: InterimOutput,
    ) -> EngineResult<InterimOutput>;

    /// Bulk fast path; the default processes messages individually and
    /// keeps going past per-message failures.
    async fn bulk_handle(
        &self,
        messages: &[BusMessage],
        mut interim: InterimOutput,
    ) -> EngineResult<InterimOutput> {
        for message in messages {
            match self.handle(message, interim.clone()).await {
                Ok(updated) => interim = updated,
                Err(e) => {
                    error!(handler = self.name(), error = %e, "bulk_handle_message_failed");
                }
            }
        }
        Ok(interim)
    }
}

/// Name-keyed handler registry composed per consumer worker
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            warn!(handler = %name, "handler_registration_overridden");
        }
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn MessageHandler>> {
        self.handlers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Parse a message payload, logging and absorbing failures the way a
/// consumer must (a poison message is dropped, not redelivered forever).
pub(crate) fn parse_message<T: serde::de::DeserializeOwned>(
    handler: &'static str,
    message: &BusMessage,
) -> Option<T> {
    match message.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            error!(handler, topic = %message.topic, error = %e, "message_parse_error");
            None
        }
    }
}
