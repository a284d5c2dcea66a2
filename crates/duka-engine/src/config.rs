//! # Engine Configuration
//!
//! Per-store knobs for the commit pipeline. Everything here is a business
//! policy, not a tuning parameter: the tax rate, the loyalty conversion
//! rates, and how long a pending STK push is allowed to live.

use duka_core::{
    RedemptionPolicy, TaxRate, DEFAULT_ACCRUAL_POINTS_PER_UNIT,
    DEFAULT_REDEMPTION_POINTS_PER_UNIT,
};

/// Configuration for the sale engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Flat tax rate in basis points (1600 = 16%).
    pub tax_rate_bps: u32,

    /// What to do when a redemption request exceeds the balance.
    pub redemption_policy: RedemptionPolicy,

    /// Points earned per whole currency unit of pre-redemption subtotal.
    pub accrual_points_per_unit: i64,

    /// Points needed to pay off one whole currency unit.
    pub redemption_points_per_unit: i64,

    /// How long a pending payment may sit before the sweep expires it.
    pub stk_timeout_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            // Standard VAT rate; stores override per jurisdiction.
            tax_rate_bps: 1600,
            redemption_policy: RedemptionPolicy::default(),
            accrual_points_per_unit: DEFAULT_ACCRUAL_POINTS_PER_UNIT,
            redemption_points_per_unit: DEFAULT_REDEMPTION_POINTS_PER_UNIT,
            stk_timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    /// Sets the tax rate (builder style).
    pub fn with_tax_rate_bps(mut self, bps: u32) -> Self {
        self.tax_rate_bps = bps;
        self
    }

    /// Sets the redemption policy (builder style).
    pub fn with_redemption_policy(mut self, policy: RedemptionPolicy) -> Self {
        self.redemption_policy = policy;
        self
    }

    /// Sets the pending-payment timeout (builder style).
    pub fn with_stk_timeout_secs(mut self, secs: i64) -> Self {
        self.stk_timeout_secs = secs;
        self
    }

    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps)
    }

    pub fn stk_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stk_timeout_secs)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
