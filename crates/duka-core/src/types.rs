//! # Domain Types
//!
//! Core domain types for the sale transaction engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │     Sale        │   │   StockBatch    │   │ PaymentTransaction  │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  transaction_ref    │   │
//! │  │  sale_number    │   │  quantity       │   │  checkout_req_id    │   │
//! │  │  payment_status │   │  unit_cost      │   │  state              │   │
//! │  │  final_cents    │   │  expiry_date?   │   │  (STK push)         │   │
//! │  └────────┬────────┘   └─────────────────┘   └─────────────────────┘   │
//! │           │ owns                                                       │
//! │  ┌────────▼────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │    SaleItem     │   │BatchConsumption │   │   LoyaltyAccount    │   │
//! │  │  (snapshot of   │   │  (COGS record   │   │  (points balance)   │   │
//! │  │   price + COGS) │   │   per batch)    │   │                     │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID where one exists (sale_number, transaction_ref)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 800 bps = 8.00% flat sales tax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Creates a tax rate from a percentage (for convenience).
    pub fn from_percentage(pct: f64) -> Self {
        TaxRate((pct * 100.0).round() as u32)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// How a sale is settled.
///
/// Cash and card settle synchronously inside the commit; mobile money settles
/// asynchronously through an STK push and a gateway callback.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash payment.
    Cash,
    /// Card payment on external terminal.
    Card,
    /// Mobile-money STK push (deferred settlement).
    MobileMoney,
}

impl PaymentMethod {
    /// Whether this method settles synchronously inside the commit call.
    #[inline]
    pub const fn is_immediate(&self) -> bool {
        matches!(self, PaymentMethod::Cash | PaymentMethod::Card)
    }
}

// =============================================================================
// Payment Status (of a Sale)
// =============================================================================

/// Settlement status of a sale.
///
/// A sale is immutable once `Paid`; while `Pending` it is mutable only along
/// this dimension (the reconciliation path flips it to `Paid` or `Failed`).
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting asynchronous settlement (mobile money).
    Pending,
    /// Settled. The sale is final.
    Paid,
    /// Settlement failed or expired; requires operator reconciliation.
    Failed,
}

// =============================================================================
// Payment State (of a PaymentTransaction)
// =============================================================================

/// State of a deferred payment transaction.
///
/// ```text
/// INITIATED ──► PENDING ──► CONFIRMED
///                  │
///                  ├──────► FAILED
///                  └──────► EXPIRED   (sweep, no callback in time)
/// ```
/// Terminal states are immutable.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// Transaction record created, push not yet accepted by the gateway.
    Initiated,
    /// Gateway accepted the push; waiting for the customer/callback.
    Pending,
    /// Callback reported success. Terminal.
    Confirmed,
    /// Callback reported failure, or initiation was rejected. Terminal.
    Failed,
    /// No callback arrived within the timeout window. Terminal.
    Expired,
}

impl PaymentState {
    /// Whether this state accepts no further transitions.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentState::Confirmed | PaymentState::Failed | PaymentState::Expired
        )
    }
}

// =============================================================================
// Stock Batch
// =============================================================================

/// A discrete inbound lot of stock at one location.
///
/// ## Invariants
/// - `0 <= reserved_quantity <= quantity`
/// - `quantity` only decreases via allocation and never goes negative;
///   the conditional update in the stock ledger enforces this under
///   concurrent commits.
///
/// Created by restock operations (external); mutated only by the stock
/// ledger; never deleted while `quantity > 0`.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockBatch {
    pub id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub location_id: String,
    /// Units remaining in this lot.
    pub quantity: i64,
    /// Units held by external reservations; unavailable to allocation.
    pub reserved_quantity: i64,
    /// Acquisition cost per unit, in cents (COGS source).
    pub unit_cost_cents: i64,
    #[ts(as = "String")]
    pub received_at: DateTime<Utc>,
    /// Batches with an expiry are consumed first (FEFO).
    #[ts(as = "Option<String>")]
    pub expiry_date: Option<DateTime<Utc>>,
}

impl StockBatch {
    /// Units this batch can contribute to an allocation.
    #[inline]
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved_quantity
    }

    /// Unit cost as Money.
    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }
}

// =============================================================================
// Batch Consumption
// =============================================================================

/// Records how many units a sale drew from one batch, at what cost.
///
/// One SaleItem may consume from several batches; these rows are the COGS
/// sub-list that makes the weighted unit cost recoverable, and the exact
/// record needed to put stock back if a deferred payment fails.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BatchConsumption {
    pub id: String,
    pub sale_id: String,
    pub batch_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub unit_cost_cents: i64,
}

// =============================================================================
// Sale
// =============================================================================

/// A committed sale transaction.
///
/// Created once per commit attempt. Exclusively owns its SaleItems.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub sale_number: String,
    pub location_id: String,
    pub customer_id: Option<String>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    /// Loyalty redemption deducted from the payable amount (payment-side,
    /// not a taxable discount).
    pub redemption_cents: i64,
    /// Points consumed by the redemption. Kept on the sale so a failed
    /// deferred payment can refund exactly what was taken.
    pub points_redeemed: i64,
    pub final_amount_cents: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Sale Item
// =============================================================================

/// A line item in a sale.
///
/// Uses the snapshot pattern: price and cost are frozen at commit time so the
/// sale record survives later catalog changes. `unit_cost_cents` is the
/// weighted cost of the batches actually consumed (half-up rounded).
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    /// Unit selling price at time of sale (base price + variant modifier).
    pub unit_price_cents: i64,
    /// Weighted acquisition cost per unit, from consumed batches.
    pub unit_cost_cents: i64,
    /// Line total before tax (unit_price × quantity).
    pub total_cents: i64,
}

impl SaleItem {
    /// Returns the unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Returns the line total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Loyalty Account
// =============================================================================

/// A customer's redeemable point balance.
///
/// Mutated only at commit (redeem) and confirmation (accrue), atomically with
/// the sale they belong to.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LoyaltyAccount {
    pub customer_id: String,
    pub points_balance: i64,
}

// =============================================================================
// Payment Transaction
// =============================================================================

/// A deferred (mobile-money) settlement attempt for one sale.
///
/// At most one non-terminal transaction exists per sale. The
/// `checkout_request_id`/`merchant_request_id` pair is the correlation key
/// the gateway echoes back in its callback; reconciliation must work from
/// these alone, with no in-memory state from the initiating request.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentTransaction {
    pub id: String,
    /// Business reference shown to the operator and the customer.
    pub transaction_ref: String,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub sale_id: String,
    pub amount_cents: i64,
    pub phone_number: String,
    pub state: PaymentState,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Cart Line (canonical cart-item shape)
// =============================================================================

/// One line of a cart as submitted to the engine.
///
/// This is the single canonical shape every UI variant converges to;
/// display-only fields stay on the presentation side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
}

// =============================================================================
// Commit Request / Result (engine external interface)
// =============================================================================

/// The commit request consumed from the UI/cart layer.
///
/// The caller (authenticated UI layer) supplies a validated `location_id`;
/// there is no ambient "current warehouse" - the location is threaded
/// explicitly through every engine call.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub location_id: String,
    pub customer_id: Option<String>,
    pub payment_method: PaymentMethod,
    /// Policy toggle: false records the sale without touching batches.
    pub enable_stock_tracking: bool,
    /// Flat discount in cents, applied before tax.
    pub discount_cents: Option<i64>,
    pub notes: Option<String>,
    /// Required for mobile money.
    pub phone_number: Option<String>,
    pub points_to_redeem: Option<i64>,
    pub cart_items: Vec<CartLine>,
}

/// One line of a committed sale as returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleResultItem {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub unit_cost_cents: i64,
    pub total_cents: i64,
}

/// The commit response consumed by the receipt/display layer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleResult {
    pub id: String,
    pub sale_number: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub redemption_cents: i64,
    pub points_redeemed: i64,
    pub final_amount_cents: i64,
    pub items: Vec<SaleResultItem>,
    pub customer_id: Option<String>,
    /// Present for mobile-money sales: correlation key the UI can poll on.
    pub checkout_request_id: Option<String>,
    /// Present for mobile-money sales: business reference.
    pub transaction_ref: Option<String>,
    pub created_at: String,
}

// =============================================================================
// Unit Tests
// =============================================================================
