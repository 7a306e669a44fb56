//! Bus topic names.

/// Freshly ingested requests, consumed by the smart scheduler
pub const ENDORSEMENT_INGESTED: &str = "endorsement.ingested";
/// Window output in priority order, consumed by the orchestrator
pub const ENDORSEMENT_PRIORITIZED: &str = "endorsement.prioritized";
/// Fund reservation commands, consumed by the ledger engine
pub const LEDGER_CHECK_FUNDS: &str = "ledger.check_funds";
/// Reservation outcomes, consumed by the orchestrator
pub const LEDGER_FUNDS_LOCKED: &str = "ledger.funds_locked";
/// Raised on every employer credit, consumed by hold-release
pub const LEDGER_BALANCE_INCREASED: &str = "ledger.balance_increased";
/// Outbound dispatch commands, consumed by the insurer gateway
pub const INSURER_REQUEST: &str = "insurer.request";
/// Delayed technical retries of dispatch commands
pub const INSURER_REQUEST_RETRY: &str = "insurer.request.retry";
/// Dead-lettered dispatches (business failures, exhausted retries)
pub const INSURER_REQUEST_DLQ: &str = "insurer.request.dlq";
/// Gateway outcomes of either flavour (the name is historical)
pub const INSURER_SUCCESS: &str = "insurer.success";
/// Terminal happy-path notifications
pub const ENDORSEMENT_COMPLETED: &str = "endorsement.completed";
