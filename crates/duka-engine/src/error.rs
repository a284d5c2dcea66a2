//! # Engine Errors
//!
//! The top of the error funnel: everything the commit pipeline or the
//! reconciler can fail with, folded into one enum the caller branches on.
//!
//! Business outcomes (`Core`) are recoverable by fixing the request;
//! `PaymentInitiation` means the gateway said no and nothing was persisted;
//! `Db` is operational.

use thiserror::Error;

use crate::gateway::GatewayError;
use duka_core::CoreError;
use duka_db::{DbError, StockError};

/// Errors surfaced by the sale engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Business-rule failure (validation, pricing, unknown product,
    /// insufficient stock, redemption rejected).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The mobile-money gateway refused or never answered the STK push.
    /// Allocated stock has already been put back when this surfaces.
    #[error("Payment initiation failed: {0}")]
    PaymentInitiation(#[from] GatewayError),

    /// Database operation failure.
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<StockError> for EngineError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::Insufficient {
                product_id,
                variant_id,
                requested,
                available,
            } => EngineError::Core(CoreError::InsufficientStock {
                product_id,
                variant_id,
                requested,
                available,
            }),
            StockError::Db(db) => EngineError::Db(db),
        }
    }
}

/// Convenience type alias for Results with EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Unit Tests
// =============================================================================
