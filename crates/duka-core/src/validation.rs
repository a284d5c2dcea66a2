//! # Validation Module
//!
//! Commit-request validation. Runs before any allocation or persistence, so
//! a rejected request leaves nothing behind.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: UI layer (external)                                           │
//! │  ├── Basic format checks, immediate feedback                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - business-rule validation of the request         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  ├── NOT NULL / UNIQUE / foreign key constraints                        │
//! │  └── Conditional-update guards on stock and loyalty                     │
//! │                                                                         │
//! │  Defense in depth: each layer catches a different class of error        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::{CommitRequest, PaymentMethod};
use crate::{MAX_CART_LINES, MAX_LINE_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Commit Request Validation
// =============================================================================

/// Validates a commit request end to end.
///
/// ## Rules
/// - `location_id` must be present (no ambient "current warehouse")
/// - cart must be non-empty and within size limits
/// - every line quantity must be positive and within limits
/// - `discount_cents` must not be negative
/// - mobile money requires a well-formed phone number
/// - `points_to_redeem`, when present, must be positive and accompanied by
///   a customer id
pub fn validate_commit_request(request: &CommitRequest) -> ValidationResult<()> {
    if request.location_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "locationId".to_string(),
        });
    }

    if request.cart_items.is_empty() {
        return Err(ValidationError::EmptyCart);
    }

    if request.cart_items.len() > MAX_CART_LINES {
        return Err(ValidationError::CartTooLarge {
            max: MAX_CART_LINES,
        });
    }

    for line in &request.cart_items {
        if line.product_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "productId".to_string(),
            });
        }
        validate_quantity(line.quantity)?;
    }

    if let Some(discount) = request.discount_cents {
        if discount < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "discountAmount".to_string(),
            });
        }
    }

    if request.payment_method == PaymentMethod::MobileMoney {
        let phone = request.phone_number.as_deref().ok_or_else(|| {
            ValidationError::Required {
                field: "phoneNumber".to_string(),
            }
        })?;
        validate_phone_number(phone)?;
    }

    if let Some(points) = request.points_to_redeem {
        if points <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "pointsToRedeem".to_string(),
            });
        }
        if request.customer_id.is_none() {
            return Err(ValidationError::Required {
                field: "customerId".to_string(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Field Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Example
/// ```rust
/// use duka_core::validation::validate_quantity;
///
/// assert!(validate_quantity(5).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(-1).is_err());
/// ```
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if quantity > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a mobile-money phone number.
///
/// ## Rules
/// - 9 to 15 digits after stripping an optional leading `+`
/// - digits only (the gateway expects MSISDN format, e.g. 254712345678)
///
/// ## Example
/// ```rust
/// use duka_core::validation::validate_phone_number;
///
/// assert!(validate_phone_number("254712345678").is_ok());
/// assert!(validate_phone_number("+254712345678").is_ok());
/// assert!(validate_phone_number("07-12-345").is_err());
/// ```
pub fn validate_phone_number(phone: &str) -> ValidationResult<()> {
    let digits = phone.trim().strip_prefix('+').unwrap_or(phone.trim());

    if digits.is_empty() {
        return Err(ValidationError::Required {
            field: "phoneNumber".to_string(),
        });
    }

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "phoneNumber".to_string(),
            reason: "must contain only digits (MSISDN format)".to_string(),
        });
    }

    if digits.len() < 9 || digits.len() > 15 {
        return Err(ValidationError::InvalidFormat {
            field: "phoneNumber".to_string(),
            reason: "must be 9 to 15 digits".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
