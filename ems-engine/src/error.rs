//! Error types for the EMS engine.

use ems_connectors::ConnectorError;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the pipeline services
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Employer {0} not found")]
    EmployerNotFound(String),

    #[error("Employee {0} not found")]
    EmployeeNotFound(String),

    #[error("Endorsement {0} not found")]
    EndorsementNotFound(String),

    /// A second identical payload inside the dedup window
    #[error("Duplicate request for employer {0}")]
    DuplicateRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// An ACTIVE coverage already spans the requested day
    #[error("Coverage overlap for employee {employee_id} on {date}")]
    CoverageOverlap { employee_id: String, date: String },

    /// No LOCKED ledger row to finalize for the endorsement
    #[error("No open reservation for endorsement {0}")]
    ReservationNotFound(String),

    #[error("Lock acquisition timed out: {0}")]
    LockTimeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
