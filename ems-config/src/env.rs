//! Environment variable overrides.
//!
//! Variables use the `EMS_<SECTION>_<KEY>` format and override file values:
//!   EMS_SCHEDULER_WINDOW_SECONDS=60
//!   EMS_INSURER_MAX_RETRIES=5
//!   EMS_LEDGER_FAILED_DEBIT_POLICY=clear

use crate::config::{ConfigError, EmsConfig, FailedDebitPolicy};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Apply `EMS_*` environment overrides to a loaded configuration
pub fn apply_env_overrides(config: &mut EmsConfig) -> Result<(), ConfigError> {
    if let Some(v) = parse_env::<u64>("EMS_SCHEDULER_WINDOW_SECONDS")? {
        config.scheduler.window_seconds = v;
    }
    if let Some(v) = parse_env::<u64>("EMS_SCHEDULER_SWEEP_INTERVAL_SECONDS")? {
        config.scheduler.sweep_interval_seconds = v;
    }
    if let Some(v) = parse_env::<u32>("EMS_INSURER_MAX_RETRIES")? {
        config.insurer.max_retries = v;
    }
    if let Some(v) = parse_env::<u32>("EMS_INSURER_BACKOFF_BASE")? {
        config.insurer.backoff_base = v;
    }
    if let Some(v) = parse_env::<u64>("EMS_INSURER_REQUEST_TIMEOUT_SECONDS")? {
        config.insurer.request_timeout_seconds = v;
    }
    if let Some(v) = parse_env::<Decimal>("EMS_LEDGER_LOW_BALANCE_THRESHOLD")? {
        config.ledger.low_balance_threshold = v;
    }
    if let Ok(v) = std::env::var("EMS_LEDGER_FAILED_DEBIT_POLICY") {
        config.ledger.failed_debit_policy = match v.as_str() {
            "refund" => FailedDebitPolicy::Refund,
            "clear" => FailedDebitPolicy::Clear,
            other => {
                return Err(ConfigError::InvalidEnv {
                    key: "EMS_LEDGER_FAILED_DEBIT_POLICY".to_string(),
                    message: format!("unknown policy '{other}'"),
                })
            }
        };
    }
    if let Some(v) = parse_env::<u64>("EMS_DEDUP_TTL_SECONDS")? {
        config.dedup.ttl_seconds = v;
    }
    Ok(())
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
