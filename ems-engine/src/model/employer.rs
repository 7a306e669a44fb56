//! Employer master data.

use crate::ids;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Unique identifier for an employer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployerId(pub String);

impl EmployerId {
    /// Generate a new sortable employer id
    pub fn generate() -> Self {
        Self(ids::generate_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmployerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EmployerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Employer lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployerStatus {
    Active,
    Suspended,
    Inactive,
}

/// Per-employer behaviour configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmployerConfig {
    /// Balance under which low-balance warnings fire; falls back to the
    /// global threshold when absent
    pub low_balance_threshold: Option<Decimal>,
    /// Permit debits past a zero balance instead of parking
    pub allowed_overdraft: bool,
    pub notification_email: Option<String>,
    pub default_policy: Option<String>,
}

/// Master record for a group policyholder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employer {
    pub id: EmployerId,
    pub name: String,
    /// Prepaid endorsement account balance, scale 2
    pub ea_balance: Decimal,
    pub config: EmployerConfig,
    pub status: EmployerStatus,
}

impl Employer {
    pub fn new(name: impl Into<String>, ea_balance: Decimal) -> Self {
        Self {
            id: EmployerId::generate(),
            name: name.into(),
            ea_balance,
            config: EmployerConfig::default(),
            status: EmployerStatus::Active,
        }
    }
}
