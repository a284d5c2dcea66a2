//! # Error Types
//!
//! Domain-specific error types for duka-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  duka-core errors (this file)                                           │
//! │  ├── CoreError        - Business-rule failures (expected, recoverable)  │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  duka-db errors (separate crate)                                        │
//! │  └── DbError          - Database operation failures                     │
//! │                                                                         │
//! │  duka-engine errors (separate crate)                                    │
//! │  └── EngineError      - Commit orchestration + gateway failures         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (product id, quantities, etc.)
//! 3. Errors are enum variants, never String
//! 4. Expected business outcomes (insufficient stock) are `Result` values
//!    the caller can branch on, not exceptions

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These represent business-rule violations the caller can recover from by
/// fixing input and resubmitting; nothing is persisted when they surface.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Not enough stock across all batches at the location to cover a line.
    ///
    /// Carries the offending line's identity, what was requested, and what
    /// was actually available, so the UI can show the exact shortfall.
    #[error(
        "Insufficient stock for product {product_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: String,
        variant_id: Option<String>,
        requested: i64,
        available: i64,
    },

    /// Redemption request exceeds the customer's point balance.
    ///
    /// Only raised under `RedemptionPolicy::Reject`; the default policy
    /// clamps instead (see `pricing`).
    #[error("Loyalty redemption of {requested} points exceeds balance of {available}")]
    LoyaltyPointsExceeded { requested: i64, available: i64 },

    /// Customer account required for the requested loyalty operation.
    #[error("Customer {0} has no loyalty account")]
    LoyaltyAccountNotFound(String),

    /// Product or variant referenced by a cart line cannot be resolved.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Payment amount is invalid.
    #[error("Invalid payment amount: {reason}")]
    InvalidPaymentAmount { reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur when a commit request doesn't meet requirements.
/// Used for early validation before any allocation or persistence runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// The cart has no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., malformed phone number).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Cart has exceeded maximum allowed lines.
    #[error("Cart cannot have more than {max} lines")]
    CartTooLarge { max: usize },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product_id: "p-77".to_string(),
            variant_id: None,
            available: 15,
            requested: 20,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product p-77: available 15, requested 20"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "locationId".to_string(),
        };
        assert_eq!(err.to_string(), "locationId is required");

        let err = ValidationError::EmptyCart;
        assert_eq!(err.to_string(), "Cart is empty");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::EmptyCart;
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
