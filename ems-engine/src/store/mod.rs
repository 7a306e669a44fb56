//! In-process datastore with the guarantees the pipeline needs from its
//! relational collaborator.
//!
//! - `lock_employer` hands out an owned per-row mutex guard, the analogue
//!   of `SELECT ... FOR UPDATE`: all concurrent debits and credits on one
//!   employer serialise, different employers proceed in parallel.
//! - Balance writes and ledger inserts pair under one guard, which is the
//!   invariant that keeps `ea_balance` reconcilable against the ledger.
//! - Status updates are guarded by the state machine: a row already at or
//!   past the target state is left untouched and the skip is logged.
//! - ON_HOLD rows come back in original arrival order.

use crate::error::{EngineError, EngineResult};
use crate::model::{
    CoverageId, Employee, EmployeeId, Employer, EmployerId, EndorsementId, EndorsementRequest,
    EndorsementStatus, LedgerEntryStatus, LedgerTransaction, PolicyCoverage, TransitionOutcome,
};
use chrono::NaiveDate;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Terminal disposition applied to a LOCKED reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationDisposition {
    /// Keep the movement; row becomes CLEARED
    Cleared,
    /// Undo the movement; row becomes FAILED and the balance is restored
    Failed,
}

/// Exclusive row lock on one employer
pub type EmployerGuard = OwnedMutexGuard<Employer>;

/// Shared in-process datastore
#[derive(Default)]
pub struct Datastore {
    employers: RwLock<HashMap<EmployerId, Arc<Mutex<Employer>>>>,
    endorsements: RwLock<HashMap<EndorsementId, EndorsementRequest>>,
    /// Insertion order, for FIFO retrieval of parked requests
    endorsement_order: RwLock<Vec<EndorsementId>>,
    ledger: RwLock<Vec<LedgerTransaction>>,
    employees: RwLock<HashMap<EmployeeId, Employee>>,
    coverages: RwLock<HashMap<CoverageId, PolicyCoverage>>,
}

impl Datastore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- employers -------------------------------------------------------

    pub fn insert_employer(&self, employer: Employer) -> EmployerId {
        let id = employer.id.clone();
        self.employers
            .write()
            .insert(id.clone(), Arc::new(Mutex::new(employer)));
        id
    }

    /// Snapshot of the employer row (no lock held on return)
    pub async fn get_employer(&self, id: &EmployerId) -> EngineResult<Employer> {
        let row = self
            .employers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::EmployerNotFound(id.to_string()))?;
        let guard = row.lock().await;
        Ok(guard.clone())
    }

    /// Acquire the exclusive row lock; the returned guard is the
    /// transaction scope for balance mutations.
    pub async fn lock_employer(&self, id: &EmployerId) -> EngineResult<EmployerGuard> {
        let row = self
            .employers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::EmployerNotFound(id.to_string()))?;
        Ok(row.lock_owned().await)
    }

    // ---- ledger ----------------------------------------------------------

    /// Append a ledger row. The caller must hold the owning employer's row
    /// lock; pairing the insert with any balance change under one guard is
    /// what keeps the ledger reconcilable.
    pub fn append_ledger(&self, _guard: &EmployerGuard, txn: LedgerTransaction) -> LedgerTransaction {
        self.ledger.write().push(txn.clone());
        txn
    }

    pub fn ledger_rows(&self, employer_id: &EmployerId) -> Vec<LedgerTransaction> {
        self.ledger
            .read()
            .iter()
            .filter(|t| &t.employer_id == employer_id)
            .cloned()
            .collect()
    }

    pub fn ledger_for_endorsement(&self, endorsement_id: &EndorsementId) -> Vec<LedgerTransaction> {
        self.ledger
            .read()
            .iter()
            .filter(|t| t.endorsement_id.as_ref() == Some(endorsement_id))
            .cloned()
            .collect()
    }

    /// One-way transition of the endorsement's LOCKED row. `Failed`
    /// restores the reserved amount to the balance; `Cleared` keeps it.
    /// Returns `None` when no LOCKED row exists (already finalized or
    /// never reserved), making redelivery harmless.
    pub async fn finalize_reservation(
        &self,
        endorsement_id: &EndorsementId,
        disposition: ReservationDisposition,
    ) -> EngineResult<Option<LedgerTransaction>> {
        let employer_id = {
            let ledger = self.ledger.read();
            match ledger.iter().find(|t| {
                t.endorsement_id.as_ref() == Some(endorsement_id)
                    && t.status == LedgerEntryStatus::Locked
            }) {
                Some(txn) => txn.employer_id.clone(),
                None => return Ok(None),
            }
        };

        let mut guard = self.lock_employer(&employer_id).await?;
        let mut ledger = self.ledger.write();
        let row = ledger.iter_mut().find(|t| {
            t.endorsement_id.as_ref() == Some(endorsement_id)
                && t.status == LedgerEntryStatus::Locked
        });
        let row = match row {
            Some(r) => r,
            // Lost the race with a concurrent finalize
            None => return Ok(None),
        };

        match disposition {
            ReservationDisposition::Cleared => row.status = LedgerEntryStatus::Cleared,
            ReservationDisposition::Failed => {
                row.status = LedgerEntryStatus::Failed;
                guard.ea_balance -= row.signed_amount();
            }
        }
        debug!(
            endorsement_id = %endorsement_id,
            status = row.status.as_str(),
            "ledger_reservation_finalized"
        );
        Ok(Some(row.clone()))
    }

    /// Signed sum of CREDIT minus DEBIT over balance-affecting rows
    pub fn reconciled_balance(&self, employer_id: &EmployerId) -> Decimal {
        self.ledger
            .read()
            .iter()
            .filter(|t| &t.employer_id == employer_id && t.status.affects_balance())
            .map(|t| t.signed_amount())
            .sum()
    }

    // ---- endorsements ----------------------------------------------------

    pub fn insert_endorsement(&self, request: EndorsementRequest) -> EndorsementId {
        let id = request.id.clone();
        self.endorsements.write().insert(id.clone(), request);
        self.endorsement_order.write().push(id.clone());
        id
    }

    pub fn get_endorsement(&self, id: &EndorsementId) -> EngineResult<EndorsementRequest> {
        self.endorsements
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::EndorsementNotFound(id.to_string()))
    }

    /// Guarded status write. Illegal targets (including terminal rows and
    /// redelivered stale events) are skipped, not errors.
    pub fn update_status(
        &self,
        id: &EndorsementId,
        to: EndorsementStatus,
    ) -> EngineResult<TransitionOutcome> {
        let mut rows = self.endorsements.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| EngineError::EndorsementNotFound(id.to_string()))?;

        if row.status.can_transition_to(to) {
            row.status = to;
            Ok(TransitionOutcome::Applied)
        } else {
            warn!(
                endorsement_id = %id,
                current = row.status.as_str(),
                target = to.as_str(),
                "endorsement_transition_skipped"
            );
            Ok(TransitionOutcome::Skipped(row.status))
        }
    }

    /// Bump the retry counter; monotonically non-decreasing
    pub fn increment_retry(&self, id: &EndorsementId) -> EngineResult<u32> {
        let mut rows = self.endorsements.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| EngineError::EndorsementNotFound(id.to_string()))?;
        row.retry_count += 1;
        Ok(row.retry_count)
    }

    /// All requests for one employer, in arrival order
    pub fn endorsements_by_employer(&self, employer_id: &EmployerId) -> Vec<EndorsementRequest> {
        let rows = self.endorsements.read();
        self.endorsement_order
            .read()
            .iter()
            .filter_map(|id| rows.get(id))
            .filter(|r| &r.employer_id == employer_id)
            .cloned()
            .collect()
    }

    /// Parked requests for one employer, in original arrival order
    pub fn on_hold_by_employer(&self, employer_id: &EmployerId) -> Vec<EndorsementRequest> {
        let rows = self.endorsements.read();
        self.endorsement_order
            .read()
            .iter()
            .filter_map(|id| rows.get(id))
            .filter(|r| &r.employer_id == employer_id && r.status == EndorsementStatus::OnHold)
            .cloned()
            .collect()
    }

    // ---- census ----------------------------------------------------------

    pub fn insert_employee(&self, employee: Employee) -> EmployeeId {
        let id = employee.id.clone();
        self.employees.write().insert(id.clone(), employee);
        id
    }

    pub fn get_employee(&self, id: &EmployeeId) -> EngineResult<Employee> {
        self.employees
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::EmployeeNotFound(id.to_string()))
    }

    /// Remove an employee and cascade-delete its coverages
    pub fn delete_employee(&self, id: &EmployeeId) -> EngineResult<()> {
        self.employees
            .write()
            .remove(id)
            .ok_or_else(|| EngineError::EmployeeNotFound(id.to_string()))?;
        self.coverages.write().retain(|_, c| &c.employee_id != id);
        Ok(())
    }

    pub fn coverages_for_employee(&self, employee_id: &EmployeeId) -> Vec<PolicyCoverage> {
        self.coverages
            .read()
            .values()
            .filter(|c| &c.employee_id == employee_id)
            .cloned()
            .collect()
    }

    /// The ACTIVE coverage spanning the given day, if any
    pub fn active_coverage_on(
        &self,
        employee_id: &EmployeeId,
        day: NaiveDate,
    ) -> Option<PolicyCoverage> {
        self.coverages
            .read()
            .values()
            .find(|c| {
                &c.employee_id == employee_id
                    && c.status == crate::model::CoverageStatus::Active
                    && c.covers(day)
            })
            .cloned()
    }

    /// Insert a coverage, enforcing one ACTIVE span per employee per day
    pub fn insert_coverage(&self, coverage: PolicyCoverage) -> EngineResult<CoverageId> {
        let mut coverages = self.coverages.write();
        if coverage.status == crate::model::CoverageStatus::Active {
            let overlapping = coverages.values().any(|existing| {
                existing.employee_id == coverage.employee_id
                    && existing.status == crate::model::CoverageStatus::Active
                    && spans_overlap(
                        existing.start_date,
                        existing.end_date,
                        coverage.start_date,
                        coverage.end_date,
                    )
            });
            if overlapping {
                return Err(EngineError::CoverageOverlap {
                    employee_id: coverage.employee_id.to_string(),
                    date: coverage.start_date.to_string(),
                });
            }
        }
        let id = coverage.id.clone();
        coverages.insert(id.clone(), coverage);
        Ok(id)
    }

    /// Close a coverage span at `end_date` and mark it INACTIVE
    pub fn end_coverage(&self, id: &CoverageId, end_date: NaiveDate) -> EngineResult<()> {
        let mut coverages = self.coverages.write();
        let coverage = coverages
            .get_mut(id)
            .ok_or_else(|| EngineError::Validation(format!("coverage {id} not found")))?;
        coverage.end_date = Some(end_date);
        coverage.status = crate::model::CoverageStatus::Inactive;
        Ok(())
    }

    pub fn set_plan_details(
        &self,
        id: &CoverageId,
        plan_details: serde_json::Value,
    ) -> EngineResult<()> {
        let mut coverages = self.coverages.write();
        let coverage = coverages
            .get_mut(id)
            .ok_or_else(|| EngineError::Validation(format!("coverage {id} not found")))?;
        coverage.plan_details = Some(plan_details);
        Ok(())
    }
}

fn spans_overlap(
    a_start: NaiveDate,
    a_end: Option<NaiveDate>,
    b_start: NaiveDate,
    b_end: Option<NaiveDate>,
) -> bool {
    let a_ends_before_b = a_end.map_or(false, |end| end < b_start);
    let b_ends_before_a = b_end.map_or(false, |end| end < a_start);
    !(a_ends_before_b || b_ends_before_a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CoverageStatus, EndorsementType, LedgerEntryType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn request(employer: &EmployerId) -> EndorsementRequest {
        EndorsementRequest {
            id: EndorsementId::generate(),
            employer_id: employer.clone(),
            request_type: EndorsementType::Addition,
            status: EndorsementStatus::Received,
            payload: serde_json::json!({}),
            retry_count: 0,
            effective_date: "2026-08-01".parse().unwrap(),
            trace_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_balance_and_ledger_pair_under_row_lock() {
        let store = Datastore::new();
        let employer_id = store.insert_employer(Employer::new("Acme", dec!(1000.00)));

        let mut guard = store.lock_employer(&employer_id).await.unwrap();
        guard.ea_balance -= dec!(200.00);
        store.append_ledger(
            &guard,
            LedgerTransaction::new(
                employer_id.clone(),
                None,
                LedgerEntryType::Debit,
                dec!(200.00),
                LedgerEntryStatus::Locked,
            ),
        );
        drop(guard);

        let employer = store.get_employer(&employer_id).await.unwrap();
        assert_eq!(employer.ea_balance, dec!(800.00));
        assert_eq!(store.reconciled_balance(&employer_id), dec!(-200.00));
    }

    #[tokio::test]
    async fn test_update_status_skips_illegal_transition() {
        let store = Datastore::new();
        let employer_id = store.insert_employer(Employer::new("Acme", dec!(0)));
        let id = store.insert_endorsement(request(&employer_id));

        assert_eq!(
            store.update_status(&id, EndorsementStatus::Validated).unwrap(),
            TransitionOutcome::Applied
        );
        // Stale redelivery of the prioritized event
        assert_eq!(
            store.update_status(&id, EndorsementStatus::Validated).unwrap(),
            TransitionOutcome::Skipped(EndorsementStatus::Validated)
        );
        // Cannot leap to CONFIRMED
        assert_eq!(
            store.update_status(&id, EndorsementStatus::Confirmed).unwrap(),
            TransitionOutcome::Skipped(EndorsementStatus::Validated)
        );
    }

    #[tokio::test]
    async fn test_on_hold_fifo_order() {
        let store = Datastore::new();
        let employer_id = store.insert_employer(Employer::new("Acme", dec!(0)));

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut r = request(&employer_id);
            r.status = EndorsementStatus::OnHold;
            ids.push(store.insert_endorsement(r));
        }

        let parked = store.on_hold_by_employer(&employer_id);
        let parked_ids: Vec<_> = parked.iter().map(|r| r.id.clone()).collect();
        assert_eq!(parked_ids, ids);
    }

    #[tokio::test]
    async fn test_finalize_failed_restores_balance() {
        let store = Datastore::new();
        let employer_id = store.insert_employer(Employer::new("Acme", dec!(1000.00)));
        let endorsement_id = store.insert_endorsement(request(&employer_id));

        let mut guard = store.lock_employer(&employer_id).await.unwrap();
        guard.ea_balance -= dec!(200.00);
        store.append_ledger(
            &guard,
            LedgerTransaction::new(
                employer_id.clone(),
                Some(endorsement_id.clone()),
                LedgerEntryType::Debit,
                dec!(200.00),
                LedgerEntryStatus::Locked,
            ),
        );
        drop(guard);

        let row = store
            .finalize_reservation(&endorsement_id, ReservationDisposition::Failed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, LedgerEntryStatus::Failed);

        let employer = store.get_employer(&employer_id).await.unwrap();
        assert_eq!(employer.ea_balance, dec!(1000.00));
        assert_eq!(store.reconciled_balance(&employer_id), dec!(0));

        // One-way: a second finalize finds nothing LOCKED
        let again = store
            .finalize_reservation(&endorsement_id, ReservationDisposition::Cleared)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_coverage_overlap_rejected() {
        let store = Datastore::new();
        let employee_id = EmployeeId::from("e42");
        store.insert_employee(Employee {
            id: employee_id.clone(),
            employer_id: EmployerId::from("emp"),
            employee_code: "E-42".to_string(),
            demographics: serde_json::json!({}),
        });

        store
            .insert_coverage(PolicyCoverage {
                id: CoverageId::generate(),
                employee_id: employee_id.clone(),
                insurer_id: "AETNA_01".into(),
                status: CoverageStatus::Active,
                start_date: "2026-01-01".parse().unwrap(),
                end_date: None,
                plan_details: None,
            })
            .unwrap();

        let overlap = store.insert_coverage(PolicyCoverage {
            id: CoverageId::generate(),
            employee_id: employee_id.clone(),
            insurer_id: "CIGNA_02".into(),
            status: CoverageStatus::Active,
            start_date: "2026-06-01".parse().unwrap(),
            end_date: None,
            plan_details: None,
        });
        assert!(matches!(overlap, Err(EngineError::CoverageOverlap { .. })));

        // A PENDING_ISSUANCE span is fine
        store
            .insert_coverage(PolicyCoverage {
                id: CoverageId::generate(),
                employee_id,
                insurer_id: "CIGNA_02".into(),
                status: CoverageStatus::PendingIssuance,
                start_date: "2026-06-01".parse().unwrap(),
                end_date: None,
                plan_details: None,
            })
            .unwrap();
    }
}
