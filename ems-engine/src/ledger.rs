//! Ledger engine: fund reservation against the endorsement account.
//!
//! Debits reserve funds under the employer's row lock; an uncoverable
//! debit parks as ON_HOLD_FUNDS without moving the balance. Credits raise
//! `ledger.balance_increased` so parked requests can wake. Every attempt
//! answers with `ledger.funds_locked`.

use crate::error::{EngineError, EngineResult};
use crate::events::{BalanceIncreasedEvent, CheckFundsEvent, FundsLockedEvent, ReservationStatus};
use crate::lock::DistributedLock;
use crate::model::{
    EmployerId, EndorsementId, LedgerEntryStatus, LedgerEntryType, LedgerTransaction,
};
use crate::pricing::PricingStub;
use crate::store::Datastore;
use crate::topics;
use ems_config::LedgerConfig;
use ems_connectors::bus::{HEADER_EMPLOYER_ID, HEADER_SOURCE, HEADER_TRACE_ID};
use ems_connectors::{BusMessage, BusProducer, KvStore};
use metrics::counter;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const SOURCE: &str = "ledger";

/// Handles `ledger.check_funds` and emits `ledger.funds_locked`
pub struct LedgerEngine {
    datastore: Arc<Datastore>,
    bus: Arc<dyn BusProducer>,
    kv: Arc<dyn KvStore>,
    pricing: PricingStub,
    low_balance_threshold: Decimal,
    lock_timeout_seconds: u64,
}

impl LedgerEngine {
    pub fn new(
        datastore: Arc<Datastore>,
        bus: Arc<dyn BusProducer>,
        kv: Arc<dyn KvStore>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            datastore,
            bus,
            kv,
            pricing: PricingStub::new(config),
            low_balance_threshold: config.low_balance_threshold,
            lock_timeout_seconds: config.lock_timeout_seconds,
        }
    }

    /// Resolve the amount, reserve or park under the row lock, and answer
    /// with a funds_locked event.
    pub async fn process_check_funds(&self, event: CheckFundsEvent) -> EngineResult<()> {
        if event.endorsement_id.is_empty() || event.employer_id.is_empty() {
            warn!("ledger_missing_ids");
            return Ok(());
        }
        let endorsement_id = EndorsementId::from(event.endorsement_id.as_str());
        let employer_id = EmployerId::from(event.employer_id.as_str());

        let amount = self.resolve_amount(&event).max(Decimal::ZERO);
        let is_credit = event.request_type.to_uppercase() == "DELETION";

        let mut guard = match self.datastore.lock_employer(&employer_id).await {
            Ok(guard) => guard,
            Err(EngineError::EmployerNotFound(_)) => {
                error!(
                    employer_id = %employer_id,
                    endorsement_id = %endorsement_id,
                    "ledger_employer_not_found"
                );
                self.emit_funds_locked(
                    &event,
                    amount,
                    ReservationStatus::Failed,
                    None,
                    Some("Employer not found"),
                )
                .await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let current_balance = guard.ea_balance;
        let new_balance = if is_credit {
            current_balance + amount
        } else {
            current_balance - amount
        };

        if !is_credit && current_balance < amount && !guard.config.allowed_overdraft {
            warn!(
                employer_id = %employer_id,
                endorsement_id = %endorsement_id,
                requested_amount = %amount,
                available_balance = %current_balance,
                "ledger_insufficient_funds"
            );
            let txn = self.datastore.append_ledger(
                &guard,
                LedgerTransaction::new(
                    employer_id.clone(),
                    Some(endorsement_id.clone()),
                    LedgerEntryType::Debit,
                    amount,
                    LedgerEntryStatus::OnHoldFunds,
                ),
            );
            drop(guard);
            counter!("ems_ledger_transactions_total",
                "type" => txn.txn_type.as_str(), "status" => txn.status.as_str())
            .increment(1);
            self.emit_funds_locked(
                &event,
                amount,
                ReservationStatus::OnHold,
                None,
                Some("Insufficient funds"),
            )
            .await;
            return Ok(());
        }

        let txn = self.datastore.append_ledger(
            &guard,
            LedgerTransaction::new(
                employer_id.clone(),
                Some(endorsement_id.clone()),
                if is_credit {
                    LedgerEntryType::Credit
                } else {
                    LedgerEntryType::Debit
                },
                amount,
                LedgerEntryStatus::Locked,
            ),
        );
        guard.ea_balance = new_balance;
        let threshold = guard
            .config
            .low_balance_threshold
            .unwrap_or(self.low_balance_threshold);
        drop(guard);

        counter!("ems_ledger_transactions_total",
            "type" => txn.txn_type.as_str(), "status" => txn.status.as_str())
        .increment(1);

        if is_credit && amount > Decimal::ZERO {
            self.publish_balance_increase(&employer_id, amount, new_balance, "ledger_credit")
                .await;
        }
        if !is_credit && new_balance < threshold {
            warn!(
                employer_id = %employer_id,
                new_balance = %new_balance,
                threshold = %threshold,
                "ledger_low_balance"
            );
        }

        self.emit_funds_locked(&event, amount, ReservationStatus::Locked, Some(new_balance), None)
            .await;
        Ok(())
    }

    /// Credit the account from an external payment rail. Top-ups settle
    /// immediately (CLEARED) and always raise balance_increased. The KV
    /// lock guards the account across processes; the row lock guards it
    /// within this one.
    pub async fn credit_top_up(
        &self,
        employer_id: &EmployerId,
        amount: Decimal,
        external_ref: Option<String>,
    ) -> EngineResult<LedgerTransaction> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation(
                "top-up amount must be positive".to_string(),
            ));
        }

        let account_lock = DistributedLock::new(
            self.kv.clone(),
            &format!("employer:{employer_id}"),
            self.lock_timeout_seconds,
        );
        account_lock
            .acquire_or_timeout(Duration::from_secs(5))
            .await?;
        let result = self.apply_top_up(employer_id, amount, external_ref).await;
        account_lock.release().await?;
        result
    }

    async fn apply_top_up(
        &self,
        employer_id: &EmployerId,
        amount: Decimal,
        external_ref: Option<String>,
    ) -> EngineResult<LedgerTransaction> {
        let mut guard = self.datastore.lock_employer(employer_id).await?;
        let mut txn = LedgerTransaction::new(
            employer_id.clone(),
            None,
            LedgerEntryType::Credit,
            amount,
            LedgerEntryStatus::Cleared,
        );
        txn.external_ref = external_ref;
        let txn = self.datastore.append_ledger(&guard, txn);
        guard.ea_balance += amount;
        let new_balance = guard.ea_balance;
        drop(guard);

        counter!("ems_ledger_transactions_total",
            "type" => txn.txn_type.as_str(), "status" => txn.status.as_str())
        .increment(1);
        info!(
            employer_id = %employer_id,
            amount = %amount,
            new_balance = %new_balance,
            "ledger_top_up_credited"
        );

        self.publish_balance_increase(employer_id, amount, new_balance, "top_up")
            .await;
        Ok(txn)
    }

    /// Amount precedence: event override, then payload.amount, then
    /// payload.coverage.amount, then the pricing stub.
    fn resolve_amount(&self, event: &CheckFundsEvent) -> Decimal {
        let extracted = event
            .amount
            .as_ref()
            .and_then(parse_decimal)
            .or_else(|| event.payload.get("amount").and_then(parse_decimal))
            .or_else(|| {
                event
                    .payload
                    .get("coverage")
                    .and_then(|c| c.get("amount"))
                    .and_then(parse_decimal)
            })
            .unwrap_or(Decimal::ZERO);

        if extracted > Decimal::ZERO {
            extracted
        } else {
            self.pricing
                .endorsement_price(&event.request_type, &event.payload)
        }
    }

    async fn publish_balance_increase(
        &self,
        employer_id: &EmployerId,
        change_amount: Decimal,
        new_balance: Decimal,
        source: &str,
    ) {
        let event = BalanceIncreasedEvent {
            employer_id: employer_id.to_string(),
            change_amount,
            new_balance,
            timestamp: chrono::Utc::now(),
            source: Some(source.to_string()),
        };
        let message = match BusMessage::json(
            topics::LEDGER_BALANCE_INCREASED,
            Some(employer_id.as_str()),
            &event,
        ) {
            Ok(m) => m.with_header(HEADER_SOURCE, SOURCE),
            Err(e) => {
                error!(employer_id = %employer_id, error = %e, "ledger_balance_increase_serialize_failed");
                return;
            }
        };
        if let Err(e) = self.bus.publish(message).await {
            error!(
                employer_id = %employer_id,
                change_amount = %change_amount,
                error = %e,
                "ledger_balance_increase_publish_failed"
            );
        } else {
            counter!("ems_messages_produced_total", "topic" => topics::LEDGER_BALANCE_INCREASED)
                .increment(1);
        }
    }

    async fn emit_funds_locked(
        &self,
        event: &CheckFundsEvent,
        locked_amount: Decimal,
        status: ReservationStatus,
        new_balance: Option<Decimal>,
        message_text: Option<&str>,
    ) {
        let outcome = FundsLockedEvent {
            endorsement_id: event.endorsement_id.clone(),
            employer_id: event.employer_id.clone(),
            locked_amount,
            reservation_id: uuid::Uuid::new_v4().simple().to_string(),
            status,
            new_balance,
            request_type: match status {
                ReservationStatus::Locked => Some(event.request_type.clone()),
                _ => None,
            },
            message: message_text.map(|m| m.to_string()),
            trace_id: event.trace_id.clone(),
        };

        let message = match BusMessage::json(
            topics::LEDGER_FUNDS_LOCKED,
            Some(event.endorsement_id.as_str()),
            &outcome,
        ) {
            Ok(mut m) => {
                m = m
                    .with_header(HEADER_SOURCE, SOURCE)
                    .with_header(HEADER_EMPLOYER_ID, event.employer_id.clone());
                if let Some(trace_id) = &event.trace_id {
                    m = m.with_header(HEADER_TRACE_ID, trace_id.clone());
                }
                m
            }
            Err(e) => {
                error!(endorsement_id = %event.endorsement_id, error = %e, "ledger_emit_serialize_failed");
                return;
            }
        };

        if let Err(e) = self.bus.publish(message).await {
            error!(
                endorsement_id = %event.endorsement_id,
                employer_id = %event.employer_id,
                error = %e,
                "ledger_emit_failed"
            );
        } else {
            counter!("ems_messages_produced_total", "topic" => topics::LEDGER_FUNDS_LOCKED)
                .increment(1);
        }
    }
}

/// Amounts arrive as JSON strings or numbers
fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}
