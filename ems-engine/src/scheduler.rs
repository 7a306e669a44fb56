//! Smart scheduler: per-employer tumbling-window batching.
//!
//! Freshly ingested requests are buffered per employer. Once the window
//! expires, the sweeper drains the buffer atomically (rename to a
//! processing key so concurrent appends are never lost), sorts it by
//! financial effect, and republishes in priority order. Deletions release
//! funds, so they run ahead of additions from the same window, maximising
//! the chance later additions clear without parking.

use crate::error::EngineResult;
use crate::model::EndorsementType;
use crate::topics;
use ems_connectors::bus::{HEADER_EMPLOYER_ID, HEADER_SOURCE, HEADER_TRACE_ID};
use ems_connectors::{BusMessage, BusProducer, Clock, KvStore};
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const ACTIVE_SET_KEY: &str = "scheduler:active_employers";
const SOURCE: &str = "smart_scheduler";

fn queue_key(employer_id: &str) -> String {
    format!("scheduler:queue:{employer_id}")
}

fn window_key(employer_id: &str) -> String {
    format!("scheduler:window:{employer_id}")
}

/// Buffers, prioritises, and schedules endorsement requests
pub struct SmartScheduler {
    kv: Arc<dyn KvStore>,
    bus: Arc<dyn BusProducer>,
    clock: Arc<dyn Clock>,
    window_seconds: u64,
}

impl SmartScheduler {
    pub fn new(
        kv: Arc<dyn KvStore>,
        bus: Arc<dyn BusProducer>,
        clock: Arc<dyn Clock>,
        window_seconds: u64,
    ) -> Self {
        Self {
            kv,
            bus,
            clock,
            window_seconds,
        }
    }

    /// Add one request to the employer's processing buffer
    pub async fn buffer_request(&self, employer_id: &str, request: &Value) -> EngineResult<()> {
        self.buffer_batch(employer_id, std::slice::from_ref(request))
            .await
    }

    /// Add multiple requests to the employer's processing buffer
    pub async fn buffer_batch(&self, employer_id: &str, requests: &[Value]) -> EngineResult<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let serialized: Vec<String> = requests.iter().map(|r| r.to_string()).collect();
        self.kv.rpush(&queue_key(employer_id), &serialized).await?;
        self.kv.sadd(ACTIVE_SET_KEY, employer_id).await?;

        let window = window_key(employer_id);
        if self.kv.get(&window).await?.is_none() {
            let expiry = self.clock.epoch_secs() + self.window_seconds;
            // SET NX so a concurrent buffer_request cannot move the expiry
            let started = self
                .kv
                .set_nx(&window, &expiry.to_string(), Some(self.window_seconds))
                .await?;
            if started {
                info!(
                    employer_id,
                    window_seconds = self.window_seconds,
                    "scheduler_window_started"
                );
            }
        }
        Ok(())
    }

    /// Visit every active employer and drain those whose windows expired.
    /// Returns the number of batches processed.
    pub async fn process_ready_windows(&self) -> EngineResult<usize> {
        let active = self.kv.smembers(ACTIVE_SET_KEY).await?;
        let now = self.clock.epoch_secs();

        let mut processed = 0;
        for employer_id in active {
            let should_process = match self.kv.get(&window_key(&employer_id)).await? {
                // Window key gone but still in the active set: drain now
                None => true,
                Some(expiry) => expiry.parse::<u64>().map_or(true, |at| now >= at),
            };
            if should_process {
                self.process_batch(&employer_id).await?;
                processed += 1;
            }
        }
        Ok(processed)
    }

    async fn process_batch(&self, employer_id: &str) -> EngineResult<()> {
        let queue = queue_key(employer_id);
        let window = window_key(employer_id);
        let processing = format!(
            "scheduler:processing:{employer_id}:{}",
            self.clock.epoch_secs()
        );

        if !self.kv.exists(&queue).await? {
            // Nothing buffered; clean up the bookkeeping
            self.kv.delete(&window).await?;
            self.kv.srem(ACTIVE_SET_KEY, employer_id).await?;
            return Ok(());
        }

        // RENAME locks the current items away from concurrent appends
        if let Err(e) = self.kv.rename(&queue, &processing).await {
            warn!(employer_id, error = %e, "scheduler_rename_failed");
            return Ok(());
        }

        self.kv.delete(&window).await?;
        self.kv.srem(ACTIVE_SET_KEY, employer_id).await?;

        let items = self.kv.lrange_all(&processing).await?;
        self.kv.delete(&processing).await?;
        if items.is_empty() {
            return Ok(());
        }

        let mut requests: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_str(&item) {
                Ok(value) => requests.push(value),
                Err(e) => {
                    error!(employer_id, error = %e, "scheduler_json_parse_error");
                }
            }
        }

        // Stable sort preserves FIFO arrival inside each priority class
        requests.sort_by_key(|req| {
            EndorsementType::priority_of(req.get("type").and_then(serde_json::Value::as_str).unwrap_or(""))
        });

        info!(
            employer_id,
            count = requests.len(),
            first_type = requests
                .first()
                .and_then(|r| r.get("type"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("N/A"),
            "scheduler_processing_batch"
        );

        for request in requests {
            self.publish_prioritized(employer_id, request).await;
        }
        Ok(())
    }

    /// Publish failures are logged, not retried: the authoritative record
    /// stays in the relational store and replay can re-drive the
    /// orchestrator.
    async fn publish_prioritized(&self, employer_id: &str, request: Value) {
        let endorsement_id = request
            .get("endorsement_id")
            .and_then(serde_json::Value::as_str)
            .map(|s| s.to_string());
        let trace_id = request
            .get("trace_id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("scheduler-generated")
            .to_string();

        let message = match BusMessage::json(
            topics::ENDORSEMENT_PRIORITIZED,
            endorsement_id.as_deref(),
            &request,
        ) {
            Ok(m) => m
                .with_header(HEADER_TRACE_ID, trace_id)
                .with_header(HEADER_EMPLOYER_ID, employer_id)
                .with_header(HEADER_SOURCE, SOURCE),
            Err(e) => {
                error!(employer_id, error = %e, "scheduler_serialize_failed");
                return;
            }
        };

        match self.bus.publish(message).await {
            Ok(()) => {
                counter!("ems_messages_produced_total", "topic" => topics::ENDORSEMENT_PRIORITIZED)
                    .increment(1);
            }
            Err(e) => {
                error!(
                    employer_id,
                    endorsement_id = endorsement_id.as_deref().unwrap_or("unknown"),
                    error = %e,
                    "scheduler_publish_failed"
                );
            }
        }
    }

    /// Periodic sweeper driving `process_ready_windows`
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = self.process_ready_windows().await {
                    error!(error = %e, "scheduler_sweep_failed");
                }
            }
        })
    }
}
