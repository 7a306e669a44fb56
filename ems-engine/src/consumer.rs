//! Bus consumer: routes messages through registered handlers.
//!
//! Two modes mirror the broker client it fronts:
//! - single: one message at a time, low latency, per-handler failures are
//!   isolated (log and continue with the next handler);
//! - batch: up to N messages or T seconds, delivered through each
//!   handler's bulk entry point.

use crate::handlers::{InterimOutput, MessageHandler};
use ems_connectors::BusMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Dispatch mode
#[derive(Debug, Clone, Copy)]
pub enum ConsumerMode {
    Single,
    Batch {
        max_messages: usize,
        max_wait: Duration,
    },
}

/// A consumer worker over one subscription
pub struct BusConsumer {
    receiver: mpsc::UnboundedReceiver<BusMessage>,
    handlers: Vec<Arc<dyn MessageHandler>>,
    mode: ConsumerMode,
}

impl BusConsumer {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<BusMessage>,
        handlers: Vec<Arc<dyn MessageHandler>>,
        mode: ConsumerMode,
    ) -> Self {
        Self {
            receiver,
            handlers,
            mode,
        }
    }

    /// Consume until the subscription closes
    pub async fn run(mut self) {
        match self.mode {
            ConsumerMode::Single => {
                info!("consumer_started_single_mode");
                while let Some(message) = self.receiver.recv().await {
                    dispatch_single(&self.handlers, &message).await;
                }
            }
            ConsumerMode::Batch {
                max_messages,
                max_wait,
            } => {
                info!(max_messages, "consumer_started_batch_mode");
                loop {
                    let Some(first) = self.receiver.recv().await else {
                        break;
                    };
                    let mut batch = vec![first];
                    let deadline = tokio::time::Instant::now() + max_wait;
                    while batch.len() < max_messages {
                        match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                            Ok(Some(message)) => batch.push(message),
                            Ok(None) | Err(_) => break,
                        }
                    }
                    dispatch_batch(&self.handlers, &batch).await;
                }
            }
        }
        debug!("consumer_stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

async fn dispatch_single(handlers: &[Arc<dyn MessageHandler>], message: &BusMessage) {
    let mut interim = InterimOutput::default();
    for handler in handlers {
        match handler.handle(message, interim.clone()).await {
            Ok(updated) => interim = updated,
            Err(e) => {
                // One handler failing must not starve the rest
                error!(
                    handler = handler.name(),
                    topic = %message.topic,
                    error = %e,
                    "consumer_handler_failed"
                );
            }
        }
    }
}

async fn dispatch_batch(handlers: &[Arc<dyn MessageHandler>], batch: &[BusMessage]) {
    let mut interim = InterimOutput::default();
    for handler in handlers {
        match handler.bulk_handle(batch, interim.clone()).await {
            Ok(updated) => interim = updated,
            Err(e) => {
                error!(
                    handler = handler.name(),
                    batch_len = batch.len(),
                    error = %e,
                    "consumer_bulk_handler_failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, EngineResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recorder {
        name: &'static str,
        fail: bool,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(
            &self,
            message: &BusMessage,
            interim: InterimOutput,
        ) -> EngineResult<InterimOutput> {
            self.seen.lock().push(format!("{}:{}", self.name, message.topic));
            if self.fail {
                return Err(EngineError::Validation("boom".to_string()));
            }
            Ok(interim)
        }
    }

    fn message(topic: &str) -> BusMessage {
        BusMessage::json(topic, None, &json!({})).unwrap()
    }

    #[tokio::test]
    async fn test_single_mode_failure_isolation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handlers: Vec<Arc<dyn MessageHandler>> = vec![
            Arc::new(Recorder {
                name: "first",
                fail: true,
                seen: seen.clone(),
            }),
            Arc::new(Recorder {
                name: "second",
                fail: false,
                seen: seen.clone(),
            }),
        ];

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(message("a")).unwrap();
        drop(tx);

        BusConsumer::new(rx, handlers, ConsumerMode::Single).run().await;
        assert_eq!(*seen.lock(), vec!["first:a", "second:a"]);
    }

    #[tokio::test]
    async fn test_batch_mode_collects_up_to_max() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handlers: Vec<Arc<dyn MessageHandler>> = vec![Arc::new(Recorder {
            name: "bulk",
            fail: false,
            seen: seen.clone(),
        })];

        let (tx, rx) = mpsc::unbounded_channel();
        for i in 0..5 {
            tx.send(message(&format!("t{i}"))).unwrap();
        }
        drop(tx);

        BusConsumer::new(
            rx,
            handlers,
            ConsumerMode::Batch {
                max_messages: 3,
                max_wait: Duration::from_millis(20),
            },
        )
        .run()
        .await;

        // Two batches: 3 then 2, all messages delivered once
        assert_eq!(seen.lock().len(), 5);
    }
}
