//! Configuration schema, defaults, and validation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid environment override {key}: {message}")]
    InvalidEnv { key: String, message: String },
}

/// Top-level EMS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmsConfig {
    pub scheduler: SchedulerConfig,
    pub ledger: LedgerConfig,
    pub insurer: InsurerConfig,
    pub dedup: DedupConfig,
    pub consumer: ConsumerConfig,
}

/// Smart scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tumbling window length per employer, in seconds
    pub window_seconds: u64,
    /// How often the sweeper visits active employers, in seconds
    pub sweep_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window_seconds: 300,
            sweep_interval_seconds: 5,
        }
    }
}

/// Terminal disposition of a LOCKED debit whose endorsement failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedDebitPolicy {
    /// Row becomes FAILED and the debited amount is restored to the balance
    Refund,
    /// Row becomes CLEARED and the debit is kept
    Clear,
}

/// Ledger engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Balance under which a successful debit logs a low-balance warning
    pub low_balance_threshold: Decimal,
    /// TTL for `lock:{key}` entries taken by operational tooling, seconds
    pub lock_timeout_seconds: u64,
    /// Disposition of LOCKED debits on endorsement failure
    pub failed_debit_policy: FailedDebitPolicy,
    /// Stubbed per-type endorsement pricing, keyed by request type
    pub pricing: BTreeMap<String, Decimal>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let mut pricing = BTreeMap::new();
        pricing.insert("ADDITION".to_string(), Decimal::new(15000, 2));
        pricing.insert("MODIFICATION".to_string(), Decimal::new(7500, 2));
        pricing.insert("DELETION".to_string(), Decimal::ZERO);
        Self {
            low_balance_threshold: Decimal::new(100000, 2),
            lock_timeout_seconds: 300,
            failed_debit_policy: FailedDebitPolicy::Refund,
            pricing,
        }
    }
}

/// Outbound protocol selector for a gateway entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "REST_API")]
    RestApi,
    #[serde(rename = "SOAP_XML")]
    SoapXml,
    #[serde(rename = "SFTP_BATCH")]
    SftpBatch,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::RestApi => "REST_API",
            Protocol::SoapXml => "SOAP_XML",
            Protocol::SftpBatch => "SFTP_BATCH",
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::RestApi
    }
}

/// Per-insurer outbound endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEntry {
    /// Endpoint URL; `{insurer_id}` is substituted before dispatch
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Static headers sent with every request (tokens are masked in audits)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Per-insurer override of the request timeout
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub protocol: Protocol,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Insurer gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsurerConfig {
    /// Maximum technical retries before dead-lettering
    pub max_retries: u32,
    /// Exponential backoff base; delay = base^(retry_count+1) * 60 seconds
    pub backoff_base: u32,
    /// Default outbound HTTP timeout, seconds
    pub request_timeout_seconds: u64,
    /// Gateway entries keyed by insurer id
    pub gateways: BTreeMap<String, GatewayEntry>,
}

impl Default for InsurerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
            request_timeout_seconds: 30,
            gateways: BTreeMap::new(),
        }
    }
}

/// Duplicate-request guard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Fingerprint TTL, seconds
    pub ttl_seconds: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { ttl_seconds: 86_400 }
    }
}

/// Bus consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Maximum messages per batch in bulk mode
    pub batch_size: usize,
    /// Maximum seconds to wait filling a batch
    pub batch_timeout_seconds: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_timeout_seconds: 5,
        }
    }
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path) -> Result<EmsConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
}

impl EmsConfig {
    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.window_seconds == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.window_seconds must be > 0".to_string(),
            ));
        }
        if self.insurer.backoff_base < 1 {
            return Err(ConfigError::Invalid(
                "insurer.backoff_base must be >= 1".to_string(),
            ));
        }
        for (insurer_id, entry) in &self.insurer.gateways {
            if entry.url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "insurer.gateways.{insurer_id}.url must not be empty"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_validate() {
        let config = EmsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.window_seconds, 300);
        assert_eq!(config.insurer.max_retries, 3);
        assert_eq!(config.ledger.pricing["ADDITION"], dec!(150.00));
        assert_eq!(config.ledger.failed_debit_policy, FailedDebitPolicy::Refund);
    }

    #[test]
    fn test_load_from_toml() {
        let toml_src = r#"
            [scheduler]
            window_seconds = 60

            [ledger]
            low_balance_threshold = "250.00"
            failed_debit_policy = "clear"

            [ledger.pricing]
            ADDITION = "99.50"

            [insurer]
            max_retries = 5

            [insurer.gateways.AETNA_01]
            url = "https://api.aetna.example/v1/members"
            method = "POST"

            [insurer.gateways.AETNA_01.headers]
            Authorization = "Bearer s3cr3t"
        "#;
        let config: EmsConfig = toml::from_str(toml_src).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.window_seconds, 60);
        assert_eq!(config.ledger.low_balance_threshold, dec!(250.00));
        assert_eq!(config.ledger.failed_debit_policy, FailedDebitPolicy::Clear);
        assert_eq!(config.ledger.pricing["ADDITION"], dec!(99.50));
        assert_eq!(config.insurer.max_retries, 5);
        let entry = &config.insurer.gateways["AETNA_01"];
        assert_eq!(entry.protocol, Protocol::RestApi);
        assert_eq!(entry.method, "POST");
    }

    #[test]
    fn test_empty_gateway_url_rejected() {
        let mut config = EmsConfig::default();
        config.insurer.gateways.insert(
            "BAD".to_string(),
            GatewayEntry {
                url: String::new(),
                method: "POST".to_string(),
                headers: BTreeMap::new(),
                timeout_seconds: None,
                protocol: Protocol::RestApi,
            },
        );
        assert!(config.validate().is_err());
    }
}
