//! Insurance coverage spans.

use crate::ids;
use crate::model::employee::EmployeeId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Unique identifier for a coverage span
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageId(pub String);

impl CoverageId {
    pub fn generate() -> Self {
        Self(ids::generate_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CoverageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coverage lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageStatus {
    Active,
    Inactive,
    PendingIssuance,
}

/// A coverage span for one employee with one insurer.
///
/// Invariant: for any employee and any day, at most one ACTIVE coverage
/// spans that day (enforced at activation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCoverage {
    pub id: CoverageId,
    pub employee_id: EmployeeId,
    pub insurer_id: String,
    pub status: CoverageStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub plan_details: Option<serde_json::Value>,
}

impl PolicyCoverage {
    /// Whether this span covers the given day (open-ended when end_date is
    /// absent)
    pub fn covers(&self, day: NaiveDate) -> bool {
        self.start_date <= day && self.end_date.map_or(true, |end| day <= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage(start: &str, end: Option<&str>) -> PolicyCoverage {
        PolicyCoverage {
            id: CoverageId::generate(),
            employee_id: EmployeeId::from("e42"),
            insurer_id: "AETNA_01".to_string(),
            status: CoverageStatus::Active,
            start_date: start.parse().unwrap(),
            end_date: end.map(|d| d.parse().unwrap()),
            plan_details: None,
        }
    }

    #[test]
    fn test_covers_closed_span() {
        let c = coverage("2026-01-01", Some("2026-06-30"));
        assert!(c.covers("2026-01-01".parse().unwrap()));
        assert!(c.covers("2026-06-30".parse().unwrap()));
        assert!(!c.covers("2025-12-31".parse().unwrap()));
        assert!(!c.covers("2026-07-01".parse().unwrap()));
    }

    #[test]
    fn test_covers_open_span() {
        let c = coverage("2026-01-01", None);
        assert!(c.covers("2030-01-01".parse().unwrap()));
    }
}
