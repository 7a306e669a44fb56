//! Append-only ledger rows.

use crate::ids;
use crate::model::employer::EmployerId;
use crate::model::endorsement::EndorsementId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Unique identifier for a ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerTxnId(pub String);

impl LedgerTxnId {
    pub fn generate() -> Self {
        Self(ids::generate_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LedgerTxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    Debit,
    Credit,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::Debit => "DEBIT",
            LedgerEntryType::Credit => "CREDIT",
        }
    }
}

/// Ledger row status.
///
/// Rows never mutate after insert except for the single one-way
/// `LOCKED -> CLEARED | FAILED` transition. `ON_HOLD_FUNDS` rows record a
/// parked debit attempt and never affect the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryStatus {
    Locked,
    Cleared,
    OnHoldFunds,
    Failed,
}

impl LedgerEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryStatus::Locked => "LOCKED",
            LedgerEntryStatus::Cleared => "CLEARED",
            LedgerEntryStatus::OnHoldFunds => "ON_HOLD_FUNDS",
            LedgerEntryStatus::Failed => "FAILED",
        }
    }

    /// Whether this row contributes to the reconcilable balance
    pub fn affects_balance(&self) -> bool {
        matches!(self, LedgerEntryStatus::Locked | LedgerEntryStatus::Cleared)
    }
}

/// Append-only financial record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: LedgerTxnId,
    pub employer_id: EmployerId,
    /// Absent for top-ups
    pub endorsement_id: Option<EndorsementId>,
    #[serde(rename = "type")]
    pub txn_type: LedgerEntryType,
    /// Always positive; the type carries the sign
    pub amount: Decimal,
    pub status: LedgerEntryStatus,
    /// Top-up reference from the external payment rail
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    pub fn new(
        employer_id: EmployerId,
        endorsement_id: Option<EndorsementId>,
        txn_type: LedgerEntryType,
        amount: Decimal,
        status: LedgerEntryStatus,
    ) -> Self {
        Self {
            id: LedgerTxnId::generate(),
            employer_id,
            endorsement_id,
            txn_type,
            amount,
            status,
            external_ref: None,
            created_at: Utc::now(),
        }
    }

    /// Signed contribution to the balance when the status counts
    pub fn signed_amount(&self) -> Decimal {
        match self.txn_type {
            LedgerEntryType::Credit => self.amount,
            LedgerEntryType::Debit => -self.amount,
        }
    }
}
