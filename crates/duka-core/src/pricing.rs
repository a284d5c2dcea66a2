//! # Price Calculator
//!
//! Pure cart arithmetic: line totals, subtotal, tax, loyalty redemption,
//! grand total. No I/O, deterministic, safe to call speculatively before
//! commit (the UI uses it for cart preview with the same code path the
//! committer uses for the real thing).
//!
//! ## Computation Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  line_total  = (base_price + variant_modifier) × quantity               │
//! │  subtotal    = Σ line_total                                             │
//! │  tax         = (subtotal - discount) × tax_rate                         │
//! │                 └─ tax is computed on the post-discount amount;         │
//! │                    loyalty redemption is a payment-side deduction,      │
//! │                    NOT a taxable discount                               │
//! │  redemption  = min(points, balance) / points_per_unit,                  │
//! │                 clamped to the payable total                            │
//! │  final       = max(0, subtotal - discount + tax - redemption)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All arithmetic is integer minor-units (`Money`); there is no floating
//! point anywhere on this path.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::TaxRate;

// =============================================================================
// Inputs
// =============================================================================

/// One cart line as seen by the price calculator.
///
/// The catalog layer resolves product/variant into concrete prices before
/// pricing runs; the calculator never looks anything up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLine {
    /// The product's base selling price.
    pub unit_base_price: Money,
    /// The variant's price modifier relative to the base (may be zero).
    pub variant_modifier: Money,
    pub quantity: i64,
}

impl PriceLine {
    /// Effective unit price for this line.
    #[inline]
    pub fn unit_price(&self) -> Money {
        self.unit_base_price + self.variant_modifier
    }
}

/// A loyalty redemption request, validated against the balance the committer
/// read immediately before pricing (not earlier - balances drift between
/// requests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionRequest {
    pub points_to_redeem: i64,
    pub available_points: i64,
    /// Conversion rate: this many points buy one whole currency unit.
    pub points_per_currency_unit: i64,
}

/// What to do when a redemption request exceeds the customer's balance.
///
/// The business rule is deliberately a policy value rather than a hardcoded
/// choice; both branches are tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionPolicy {
    /// Silently redeem `min(requested, balance)`.
    #[default]
    Clamp,
    /// Surface `LoyaltyPointsExceeded` and commit nothing.
    Reject,
}

// =============================================================================
// Output
// =============================================================================

/// The fully computed totals for one cart.
///
/// `points_redeemed` is the number of points actually consumed, which can be
/// lower than requested when the redemption was clamped by balance or by the
/// payable total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub line_totals: Vec<Money>,
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub redemption: Money,
    pub points_redeemed: i64,
    pub final_amount: Money,
}

// =============================================================================
// Price Calculator
// =============================================================================

/// Pure arithmetic over a cart. Holds the flat tax rate and the redemption
/// policy; everything else comes in per call.
#[derive(Debug, Clone, Copy)]
pub struct PriceCalculator {
    tax_rate: TaxRate,
    redemption_policy: RedemptionPolicy,
}

impl PriceCalculator {
    pub fn new(tax_rate: TaxRate, redemption_policy: RedemptionPolicy) -> Self {
        PriceCalculator {
            tax_rate,
            redemption_policy,
        }
    }

    /// Computes the full price breakdown for a cart.
    ///
    /// ## Errors
    /// - `Validation(MustBePositive)` for a non-positive quantity
    /// - `Validation(MustNotBeNegative)` for a negative price component or
    ///   discount
    /// - `LoyaltyPointsExceeded` when the policy is `Reject` and the request
    ///   exceeds the balance
    pub fn price_cart(
        &self,
        lines: &[PriceLine],
        discount: Money,
        redemption: Option<RedemptionRequest>,
    ) -> CoreResult<PriceBreakdown> {
        if discount.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "discountAmount".to_string(),
            }
            .into());
        }

        let mut line_totals = Vec::with_capacity(lines.len());
        let mut subtotal = Money::zero();

        for line in lines {
            if line.quantity <= 0 {
                return Err(ValidationError::MustBePositive {
                    field: "quantity".to_string(),
                }
                .into());
            }
            if line.unit_base_price.is_negative() || line.variant_modifier.is_negative() {
                return Err(ValidationError::MustNotBeNegative {
                    field: "unitPrice".to_string(),
                }
                .into());
            }

            let line_total = line.unit_price().multiply_quantity(line.quantity);
            subtotal += line_total;
            line_totals.push(line_total);
        }

        // Tax base never goes below zero: a discount larger than the
        // subtotal must not produce negative tax.
        let taxable = (subtotal - discount).floor_zero();
        let tax = taxable.calculate_tax(self.tax_rate);

        let payable = (subtotal - discount + tax).floor_zero();
        let (redemption_amount, points_redeemed) =
            self.resolve_redemption(redemption, payable)?;

        let final_amount = (subtotal - discount + tax - redemption_amount).floor_zero();

        Ok(PriceBreakdown {
            line_totals,
            subtotal,
            discount,
            tax,
            redemption: redemption_amount,
            points_redeemed,
            final_amount,
        })
    }

    /// Resolves a redemption request into (currency amount, points consumed).
    ///
    /// The amount is clamped so it never exceeds the payable total; when that
    /// clamp bites, the points consumed shrink with it (rounded up, so the
    /// customer never gets currency for free).
    fn resolve_redemption(
        &self,
        redemption: Option<RedemptionRequest>,
        payable: Money,
    ) -> CoreResult<(Money, i64)> {
        let Some(req) = redemption else {
            return Ok((Money::zero(), 0));
        };

        if req.points_to_redeem <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "pointsToRedeem".to_string(),
            }
            .into());
        }
        if req.points_per_currency_unit <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "pointsToCurrencyRate".to_string(),
            }
            .into());
        }

        let points = match self.redemption_policy {
            RedemptionPolicy::Clamp => req.points_to_redeem.min(req.available_points.max(0)),
            RedemptionPolicy::Reject => {
                if req.points_to_redeem > req.available_points {
                    return Err(CoreError::LoyaltyPointsExceeded {
                        requested: req.points_to_redeem,
                        available: req.available_points,
                    });
                }
                req.points_to_redeem
            }
        };

        // points / (points per unit) whole currency units, in cents.
        let raw = Money::from_cents(points * 100 / req.points_per_currency_unit);
        let amount = raw.min(payable);

        let points_consumed = if amount == raw {
            points
        } else {
            // Clamped: charge only the points the applied amount is worth.
            (amount.cents() * req.points_per_currency_unit + 99) / 100
        };

        Ok((amount, points_consumed))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
