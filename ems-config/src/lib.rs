//! Configuration management for the EMS core.
//!
//! TOML-based configuration with environment variable overrides.
//! Loading hierarchy: env > file > defaults.

pub mod config;
pub mod env;

pub use config::{
    ConfigError, ConsumerConfig, DedupConfig, EmsConfig, FailedDebitPolicy, GatewayEntry,
    InsurerConfig, LedgerConfig, Protocol, SchedulerConfig,
};
pub use env::apply_env_overrides;

use std::path::Path;

/// Load configuration from an optional TOML file, then apply `EMS_*`
/// environment overrides and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<EmsConfig, ConfigError> {
    let mut config = match path {
        Some(p) => config::load_from_file(p)?,
        None => EmsConfig::default(),
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;

    Ok(config)
}
