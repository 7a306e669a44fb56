//! Census application: reflect completed endorsements in coverage rows.
//!
//! ADDITION activates a new span (subject to the one-ACTIVE-per-day
//! invariant), DELETION end-dates the active span at the effective date,
//! MODIFICATION replaces the active span's plan details.

use crate::error::{EngineError, EngineResult};
use crate::events::CompletedEvent;
use crate::model::{
    CoverageId, CoverageStatus, Employee, EmployeeId, EndorsementId, EndorsementType,
    PolicyCoverage,
};
use crate::store::Datastore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Applies completed endorsements to the census
pub struct CensusService {
    datastore: Arc<Datastore>,
}

impl CensusService {
    pub fn new(datastore: Arc<Datastore>) -> Self {
        Self { datastore }
    }

    pub async fn apply_completed(&self, event: CompletedEvent) -> EngineResult<()> {
        if event.endorsement_id.is_empty() {
            warn!("census_missing_endorsement_id");
            return Ok(());
        }
        let row = self
            .datastore
            .get_endorsement(&EndorsementId::from(event.endorsement_id.as_str()))?;

        let employee_id = match employee_id_from_payload(&row.payload) {
            Some(id) => id,
            None => {
                warn!(endorsement_id = %row.id, "census_missing_employee_reference");
                return Ok(());
            }
        };

        match row.request_type {
            EndorsementType::Addition => {
                self.ensure_employee(&row.payload, &employee_id, &row)?;
                let coverage = PolicyCoverage {
                    id: CoverageId::generate(),
                    employee_id: employee_id.clone(),
                    insurer_id: row
                        .payload
                        .get("coverage")
                        .and_then(|c| c.get("insurer_id"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    status: CoverageStatus::Active,
                    start_date: row.effective_date,
                    end_date: None,
                    plan_details: row
                        .payload
                        .get("coverage")
                        .and_then(|c| c.get("plan_details"))
                        .cloned(),
                };
                self.datastore.insert_coverage(coverage)?;
                info!(
                    endorsement_id = %row.id,
                    employee_id = %employee_id,
                    "census_coverage_activated"
                );
            }
            EndorsementType::Deletion => {
                match self
                    .datastore
                    .active_coverage_on(&employee_id, row.effective_date)
                {
                    Some(coverage) => {
                        self.datastore.end_coverage(&coverage.id, row.effective_date)?;
                        info!(
                            endorsement_id = %row.id,
                            employee_id = %employee_id,
                            coverage_id = %coverage.id,
                            "census_coverage_ended"
                        );
                    }
                    None => warn!(
                        endorsement_id = %row.id,
                        employee_id = %employee_id,
                        "census_no_active_coverage_to_end"
                    ),
                }
            }
            EndorsementType::Modification => {
                match self
                    .datastore
                    .active_coverage_on(&employee_id, row.effective_date)
                {
                    Some(coverage) => {
                        let details = row
                            .payload
                            .get("coverage")
                            .and_then(|c| c.get("plan_details"))
                            .cloned()
                            .unwrap_or(Value::Null);
                        self.datastore.set_plan_details(&coverage.id, details)?;
                        info!(
                            endorsement_id = %row.id,
                            coverage_id = %coverage.id,
                            "census_plan_details_updated"
                        );
                    }
                    None => warn!(
                        endorsement_id = %row.id,
                        employee_id = %employee_id,
                        "census_no_active_coverage_to_modify"
                    ),
                }
            }
        }
        Ok(())
    }

    /// Additions may carry a fresh census row inline
    fn ensure_employee(
        &self,
        payload: &Value,
        employee_id: &EmployeeId,
        row: &crate::model::EndorsementRequest,
    ) -> EngineResult<()> {
        match self.datastore.get_employee(employee_id) {
            Ok(_) => Ok(()),
            Err(EngineError::EmployeeNotFound(_)) => {
                let employee = payload.get("employee").cloned().unwrap_or(Value::Null);
                if employee.is_null() {
                    return Err(EngineError::EmployeeNotFound(employee_id.to_string()));
                }
                self.datastore.insert_employee(Employee {
                    id: employee_id.clone(),
                    employer_id: row.employer_id.clone(),
                    employee_code: employee
                        .get("employee_code")
                        .and_then(Value::as_str)
                        .unwrap_or(employee_id.as_str())
                        .to_string(),
                    demographics: employee,
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn employee_id_from_payload(payload: &Value) -> Option<EmployeeId> {
    payload
        .get("employee_id")
        .and_then(Value::as_str)
        .or_else(|| {
            payload
                .get("employee")
                .and_then(|e| e.get("id"))
                .and_then(Value::as_str)
        })
        .map(EmployeeId::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Employer, EndorsementRequest, EndorsementStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn completed(endorsement_id: &str) -> CompletedEvent {
        CompletedEvent {
            endorsement_id: endorsement_id.to_string(),
            employer_id: "emp1".to_string(),
            trace_id: None,
            retry_count: 0,
            status: "ACTIVE".to_string(),
            insurer_response: None,
        }
    }

    fn seed(
        datastore: &Datastore,
        rtype: EndorsementType,
        payload: Value,
    ) -> (crate::model::EmployerId, EndorsementId) {
        let employer_id = datastore.insert_employer(Employer::new("Acme", dec!(0)));
        let id = datastore.insert_endorsement(EndorsementRequest {
            id: EndorsementId::generate(),
            employer_id: employer_id.clone(),
            request_type: rtype,
            status: EndorsementStatus::Active,
            payload,
            retry_count: 0,
            effective_date: "2026-08-01".parse().unwrap(),
            trace_id: None,
            created_at: Utc::now(),
        });
        (employer_id, id)
    }

    #[tokio::test]
    async fn test_addition_creates_employee_and_coverage() {
        let datastore = Arc::new(Datastore::new());
        let census = CensusService::new(datastore.clone());
        let (_, id) = seed(
            &datastore,
            EndorsementType::Addition,
            json!({
                "employee_id": "e42",
                "employee": {"id": "e42", "employee_code": "E-42", "name": "Jo"},
                "coverage": {"insurer_id": "AETNA_01", "plan_details": {"tier": "gold"}}
            }),
        );

        census.apply_completed(completed(id.as_str())).await.unwrap();

        let employee_id = EmployeeId::from("e42");
        assert!(datastore.get_employee(&employee_id).is_ok());
        let active = datastore
            .active_coverage_on(&employee_id, "2026-09-01".parse().unwrap())
            .unwrap();
        assert_eq!(active.insurer_id, "AETNA_01");
        assert_eq!(active.plan_details.unwrap()["tier"], "gold");
    }

    #[tokio::test]
    async fn test_deletion_ends_active_coverage() {
        let datastore = Arc::new(Datastore::new());
        let census = CensusService::new(datastore.clone());
        let employee_id = EmployeeId::from("e42");
        datastore.insert_employee(Employee {
            id: employee_id.clone(),
            employer_id: crate::model::EmployerId::from("emp1"),
            employee_code: "E-42".to_string(),
            demographics: json!({}),
        });
        datastore
            .insert_coverage(PolicyCoverage {
                id: CoverageId::generate(),
                employee_id: employee_id.clone(),
                insurer_id: "AETNA_01".to_string(),
                status: CoverageStatus::Active,
                start_date: "2026-01-01".parse().unwrap(),
                end_date: None,
                plan_details: None,
            })
            .unwrap();

        let (_, id) = seed(
            &datastore,
            EndorsementType::Deletion,
            json!({"employee_id": "e42", "coverage": {"insurer_id": "AETNA_01"}}),
        );
        census.apply_completed(completed(id.as_str())).await.unwrap();

        assert!(datastore
            .active_coverage_on(&employee_id, "2026-09-01".parse().unwrap())
            .is_none());
        let spans = datastore.coverages_for_employee(&employee_id);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, CoverageStatus::Inactive);
        assert_eq!(spans[0].end_date, Some("2026-08-01".parse().unwrap()));
    }
}
