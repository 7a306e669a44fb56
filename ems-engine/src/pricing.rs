//! Stubbed pricing lookup for endorsement requests.
//!
//! Maps `(request_type, context)` to a price from the configured map. This
//! should eventually call a dedicated pricing API or rules engine.

use ems_config::LedgerConfig;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Config-backed pricing stub
pub struct PricingStub {
    pricing: BTreeMap<String, Decimal>,
    default: Decimal,
}

impl PricingStub {
    pub fn new(config: &LedgerConfig) -> Self {
        let pricing: BTreeMap<String, Decimal> = config
            .pricing
            .iter()
            .map(|(k, v)| (k.to_uppercase(), *v))
            .collect();
        let default = pricing.get("ADDITION").copied().unwrap_or(Decimal::ZERO);
        Self { pricing, default }
    }

    /// Price for the given request type; the context is accepted for
    /// future rule evaluation but unused by the stub.
    pub fn endorsement_price(&self, request_type: &str, context: &Value) -> Decimal {
        let normalized = request_type.to_uppercase();
        let price = self
            .pricing
            .get(&normalized)
            .copied()
            .unwrap_or(self.default);
        debug!(
            request_type = %normalized,
            price = %price,
            has_context = !context.is_null(),
            "ledger_pricing_stub"
        );
        price
    }
}
