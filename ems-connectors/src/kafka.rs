//! Kafka-backed bus producer (optional `kafka` feature).
//!
//! The in-process broker is the default backend; this adapter publishes
//! the same `BusMessage` shape through rdkafka for deployments with a real
//! cluster. Delayed visibility is carried as a header and honoured by the
//! consuming side's delay topic configuration.

use crate::bus::{BusMessage, BusProducer};
use crate::error::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::debug;

/// Kafka producer settings
#[derive(Debug, Clone)]
pub struct KafkaProducerConfig {
    pub bootstrap_servers: String,
    pub client_id: String,
    /// Max seconds to wait for broker acknowledgement per publish
    pub delivery_timeout_seconds: u64,
}

impl Default for KafkaProducerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "ems-core".to_string(),
            delivery_timeout_seconds: 5,
        }
    }
}

/// rdkafka-backed `BusProducer`
pub struct KafkaBusProducer {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaBusProducer {
    pub fn new(config: &KafkaProducerConfig) -> ConnectorResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .map_err(|e| ConnectorError::Bus(e.to_string()))?;
        Ok(Self {
            producer,
            delivery_timeout: Duration::from_secs(config.delivery_timeout_seconds),
        })
    }
}

#[async_trait]
impl BusProducer for KafkaBusProducer {
    async fn publish(&self, msg: BusMessage) -> ConnectorResult<()> {
        let mut headers = OwnedHeaders::new();
        for (name, value) in &msg.headers {
            headers = headers.insert(Header {
                key: name,
                value: Some(value.as_str()),
            });
        }

        let key = msg.key.clone().unwrap_or_default();
        let record = FutureRecord::to(&msg.topic)
            .payload(&msg.payload)
            .key(&key)
            .headers(headers);

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
            .map_err(|(err, _)| ConnectorError::Bus(err.to_string()))?;

        debug!(topic = %msg.topic, partition, offset, "kafka_message_delivered");
        Ok(())
    }
}
