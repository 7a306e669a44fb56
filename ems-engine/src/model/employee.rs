//! Employee census rows.

use crate::ids;
use crate::model::employer::EmployerId;
use serde::{Deserialize, Serialize};

/// Unique identifier for an employee
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub String);

impl EmployeeId {
    pub fn generate() -> Self {
        Self(ids::generate_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EmployeeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Census row owned by an employer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub employer_id: EmployerId,
    /// Unique per employer
    pub employee_code: String,
    /// Opaque demographics document
    pub demographics: serde_json::Value,
}
