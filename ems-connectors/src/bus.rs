//! Message bus port and the in-process reference broker.
//!
//! Topics carry JSON payloads keyed by entity id; within a subscription
//! messages arrive in publish order, matching the ordered-partition
//! contract the pipeline relies on. Delayed delivery is a broker concern:
//! a message carrying a `visible_after` header is held back until that
//! wall-clock second so a consumer crash cannot drop a scheduled retry.

use crate::clock::Clock;
use crate::error::ConnectorResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Header carrying the trace id end to end
pub const HEADER_TRACE_ID: &str = "trace_id";
/// Header naming the producing component
pub const HEADER_SOURCE: &str = "source";
/// Header carrying the employer id for partition diagnostics
pub const HEADER_EMPLOYER_ID: &str = "employer_id";
/// Header on retry messages: seconds the retry was deferred by
pub const HEADER_RETRY_AFTER_SECONDS: &str = "retry_after_seconds";
/// Header holding the epoch second before which the message stays invisible
pub const HEADER_VISIBLE_AFTER: &str = "visible_after";

/// A message on the bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    /// Partition key; the pipeline keys by endorsement id
    pub key: Option<String>,
    /// JSON-encoded payload bytes
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl BusMessage {
    /// Build a message with a JSON payload
    pub fn json<T: serde::Serialize>(
        topic: &str,
        key: Option<&str>,
        value: &T,
    ) -> ConnectorResult<Self> {
        Ok(Self {
            topic: topic.to_string(),
            key: key.map(|k| k.to_string()),
            payload: serde_json::to_vec(value)?,
            headers: HashMap::new(),
        })
    }

    /// Attach a header, consuming and returning the message
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    /// Parse the payload as JSON
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> ConnectorResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    fn visible_after(&self) -> Option<u64> {
        self.headers
            .get(HEADER_VISIBLE_AFTER)
            .and_then(|v| v.parse::<u64>().ok())
    }
}

/// Producer side of the bus
#[async_trait]
pub trait BusProducer: Send + Sync {
    async fn publish(&self, msg: BusMessage) -> ConnectorResult<()>;
}

struct BusInner {
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>>,
    clock: Arc<dyn Clock>,
}

impl BusInner {
    fn deliver(&self, msg: BusMessage) {
        let mut subs = self.subscribers.write();
        match subs.get_mut(&msg.topic) {
            Some(senders) => {
                senders.retain(|tx| tx.send(msg.clone()).is_ok());
                if senders.is_empty() {
                    debug!(topic = %msg.topic, "bus_no_live_subscribers");
                }
            }
            None => debug!(topic = %msg.topic, "bus_unsubscribed_topic"),
        }
    }
}

/// In-process broker: per-topic fan-out over ordered channels
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                clock,
            }),
        }
    }

    /// Subscribe to a set of topics; the returned receiver observes every
    /// matching message in publish order.
    pub fn subscribe(&self, topics: &[&str]) -> mpsc::UnboundedReceiver<BusMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.inner.subscribers.write();
        for topic in topics {
            subs.entry((*topic).to_string())
                .or_default()
                .push(tx.clone());
        }
        rx
    }
}

#[async_trait]
impl BusProducer for InMemoryBus {
    async fn publish(&self, msg: BusMessage) -> ConnectorResult<()> {
        if let Some(visible_after) = msg.visible_after() {
            let now = self.inner.clock.epoch_secs();
            if visible_after > now {
                let delay = visible_after - now;
                let inner = Arc::clone(&self.inner);
                debug!(topic = %msg.topic, delay_seconds = delay, "bus_deferred_delivery");
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    inner.deliver(msg);
                });
                return Ok(());
            }
        }
        self.inner.deliver(msg);
        Ok(())
    }
}
