#![allow(dead_code)]

//! Shared harness for end-to-end pipeline tests: real services over the
//! in-process broker, KV store, and datastore, with a manual clock
//! driving windows.

use ems_config::{EmsConfig, GatewayEntry, Protocol};
use ems_connectors::{KvStore, ManualClock};
use ems_engine::bootstrap::EmsRuntime;
use ems_engine::ingest::NewEndorsement;
use ems_engine::model::{
    Employer, EmployerId, EndorsementId, EndorsementRequest, EndorsementStatus, EndorsementType,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub runtime: EmsRuntime,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Start the pipeline; the sweeper is effectively disabled so tests
    /// drive window expiry deterministically.
    pub fn start(mutate: impl FnOnce(&mut EmsConfig)) -> Self {
        let mut config = EmsConfig::default();
        config.scheduler.sweep_interval_seconds = 3_600;
        mutate(&mut config);

        let clock = Arc::new(ManualClock::new(1_000_000));
        let runtime = EmsRuntime::start(config, clock.clone());
        Self { runtime, clock }
    }

    /// Gateway entry pointing at a wiremock server
    pub fn rest_gateway(uri: &str) -> GatewayEntry {
        GatewayEntry {
            url: format!("{uri}/v1/members"),
            method: "POST".to_string(),
            headers: BTreeMap::from([(
                "Authorization".to_string(),
                "Bearer test-token".to_string(),
            )]),
            timeout_seconds: Some(5),
            protocol: Protocol::RestApi,
        }
    }

    /// Seed an employer whose opening balance arrives as a top-up, so the
    /// ledger reconciles exactly.
    pub async fn seed_employer(&self, opening_balance: Decimal) -> EmployerId {
        let employer_id = self
            .runtime
            .datastore
            .insert_employer(Employer::new("Acme Corp", Decimal::ZERO));
        if opening_balance > Decimal::ZERO {
            self.runtime
                .ledger
                .credit_top_up(&employer_id, opening_balance, Some("SEED".to_string()))
                .await
                .expect("seed top-up");
        }
        employer_id
    }

    pub async fn submit(
        &self,
        employer_id: &EmployerId,
        request_type: EndorsementType,
        employee_id: &str,
        amount: &str,
    ) -> EndorsementRequest {
        self.runtime
            .ingestion
            .submit(NewEndorsement {
                employer_id: employer_id.clone(),
                request_type,
                payload: json!({
                    "employee_id": employee_id,
                    "employee": {"id": employee_id, "employee_code": employee_id},
                    "coverage": {"insurer_id": "AETNA_01", "amount": amount}
                }),
                effective_date: "2026-08-01".parse().unwrap(),
                trace_id: Some(format!("trace-{employee_id}")),
            })
            .await
            .expect("submission accepted")
    }

    /// Wait until the employer's scheduler queue holds `expected` items
    pub async fn wait_for_buffered(&self, employer_id: &EmployerId, expected: usize) {
        let key = format!("scheduler:queue:{employer_id}");
        self.wait_until(
            || async {
                self.runtime
                    .kv
                    .lrange_all(&key)
                    .await
                    .map(|items| items.len() == expected)
                    .unwrap_or(false)
            },
            &format!("{expected} requests buffered"),
        )
        .await;
    }

    /// Expire the window and drain it
    pub async fn drive_window(&self) {
        self.clock.advance(self.runtime.config.scheduler.window_seconds + 1);
        self.runtime
            .scheduler
            .process_ready_windows()
            .await
            .expect("window sweep");
    }

    pub async fn wait_for_status(&self, id: &EndorsementId, status: EndorsementStatus) {
        self.wait_until(
            || async {
                self.runtime
                    .datastore
                    .get_endorsement(id)
                    .map(|row| row.status == status)
                    .unwrap_or(false)
            },
            &format!("endorsement {id} reaches {status}"),
        )
        .await;
    }

    /// Poll until the condition holds or a 5s deadline passes
    pub async fn wait_until<F, Fut>(&self, condition: F, what: &str)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if condition().await {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for: {what}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
