//! # duka-core: Pure Business Logic for the Sale Transaction Engine
//!
//! This crate is the **heart** of the engine. It contains all money-critical
//! business logic as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Sale Transaction Engine                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │           POS / Admin UI (external collaborator)                │    │
//! │  │     Cart UI ──► commit(request) ──► SaleResult ──► Receipt      │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │                duka-engine (SaleCommitter)                      │    │
//! │  │   validate → allocate → price → settle → persist → result       │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │               ★ duka-core (THIS CRATE) ★                        │    │
//! │  │                                                                 │    │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐    │    │
//! │  │   │   types   │  │   money   │  │  pricing  │  │  payment  │    │    │
//! │  │   │ Sale, ... │  │   Money   │  │ PriceCalc │  │ state fn  │    │    │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘    │    │
//! │  │                                                                 │    │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │                    duka-db (Database Layer)                     │    │
//! │  │       stock ledger, sales, loyalty, payment transactions        │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Sale, StockBatch, PaymentTransaction, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`pricing`] - The price calculator (line totals → final amount)
//! - [`payment`] - Pure payment state machine transitions
//! - [`error`] - Domain error types
//! - [`validation`] - Commit-request validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: deterministic - same input = same output
//! 2. **No I/O**: database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: all monetary values are cents (i64), never floats
//! 4. **Explicit Errors**: expected business outcomes are typed `Result`s

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod payment;
pub mod pricing;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use pricing::{PriceBreakdown, PriceCalculator, PriceLine, RedemptionPolicy, RedemptionRequest};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed in a single cart.
///
/// Prevents runaway carts and keeps a commit transaction bounded.
pub const MAX_CART_LINES: usize = 100;

/// Maximum quantity of a single line.
///
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_LINE_QUANTITY: i64 = 999;

/// Loyalty accrual: points earned per whole currency unit of the
/// pre-redemption subtotal.
pub const DEFAULT_ACCRUAL_POINTS_PER_UNIT: i64 = 1;

/// Loyalty redemption: points required per whole currency unit.
pub const DEFAULT_REDEMPTION_POINTS_PER_UNIT: i64 = 100;
