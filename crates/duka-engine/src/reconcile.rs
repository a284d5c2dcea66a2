//! # Payment Reconciliation
//!
//! Settles deferred sales after the fact: confirmation callbacks from the
//! gateway, the expiry sweep for pushes the customer never answered, and
//! operator cancellation.
//!
//! ## Idempotency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Gateways retry callbacks; the sweep races the callback; an operator    │
//! │  can cancel while either is in flight. Every settlement path therefore │
//! │  goes through the same two gates:                                       │
//! │                                                                         │
//! │   1. the pure state machine decides whether the event means anything    │
//! │      (terminal states absorb everything as NoOp), and                   │
//! │   2. a compare-and-set on the payment row decides which writer wins     │
//! │      when two meaningful settlements race.                              │
//! │                                                                         │
//! │  The loser of either gate reports Duplicate and changes nothing; one    │
//! │  settlement happens exactly once.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Confirmation marks the sale paid and accrues loyalty points. Failure and
//! expiry mark it failed, put the allocated stock back and refund redeemed
//! points, all inside the same transaction as the state flip.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::committer::accrual_points;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use duka_core::payment::{apply, PaymentEvent, Transition};
use duka_core::{Money, PaymentState, PaymentTransaction, Sale};
use duka_db::{
    Database, DbError, LoyaltyRepository, PaymentRepository, SaleRepository, StockLedger,
};

// =============================================================================
// Callback Payload
// =============================================================================

/// The settlement notification as the gateway posts it (field names are the
/// gateway's, not ours). `result_code` zero means the customer paid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
}

impl CallbackPayload {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }
}

/// What a settlement attempt actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The payment confirmed; the sale is paid and points accrued.
    Confirmed { sale_id: String },
    /// The payment failed or expired; stock released, points refunded.
    Failed { sale_id: String },
    /// The transaction was already settled; nothing changed.
    Duplicate,
    /// No transaction carries this correlation key.
    Unmatched,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Applies settlement events to deferred sales.
pub struct Reconciler {
    db: Database,
    config: EngineConfig,
}

impl Reconciler {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Reconciler { db, config }
    }

    /// Handles a gateway settlement callback.
    ///
    /// Safe to call any number of times with the same payload; only the
    /// first meaningful delivery settles the sale.
    pub async fn handle_callback(&self, payload: &CallbackPayload) -> EngineResult<CallbackOutcome> {
        let Some(transaction) = self
            .db
            .payments()
            .get_by_checkout_request_id(&payload.checkout_request_id)
            .await?
        else {
            warn!(
                checkout_request_id = %payload.checkout_request_id,
                "Callback for unknown transaction"
            );
            return Ok(CallbackOutcome::Unmatched);
        };

        let event = if payload.is_success() {
            PaymentEvent::CallbackSuccess
        } else {
            PaymentEvent::CallbackFailure
        };

        match apply(transaction.state, event) {
            Transition::NoOp => {
                debug!(
                    checkout_request_id = %payload.checkout_request_id,
                    state = ?transaction.state,
                    "Duplicate callback absorbed"
                );
                Ok(CallbackOutcome::Duplicate)
            }
            Transition::To(PaymentState::Confirmed) => self.confirm(&transaction).await,
            Transition::To(next) => self.fail(&transaction, next).await,
        }
    }

    /// Expires pending transactions older than the configured timeout.
    ///
    /// Returns how many were expired this pass. A callback landing mid-sweep
    /// wins or loses the compare-and-set cleanly.
    pub async fn sweep_expired(&self) -> EngineResult<usize> {
        let cutoff = Utc::now() - self.config.stk_timeout();
        let stale = self.db.payments().stale_pending(cutoff).await?;

        let mut expired = 0;
        for transaction in stale {
            match apply(transaction.state, PaymentEvent::TimedOut) {
                Transition::To(next @ PaymentState::Expired) => {
                    if let CallbackOutcome::Failed { .. } = self.fail(&transaction, next).await? {
                        expired += 1;
                    }
                }
                _ => continue,
            }
        }

        if expired > 0 {
            info!(count = expired, "Expired stale pending payments");
        }
        Ok(expired)
    }

    /// Operator cancellation of a sale still awaiting payment.
    ///
    /// Returns whether anything was cancelled; a sale with no deferred
    /// transaction or an already-settled one reports `false`.
    pub async fn cancel_pending(&self, sale_id: &str) -> EngineResult<bool> {
        let Some(transaction) = self.db.payments().get_by_sale(sale_id).await? else {
            return Ok(false);
        };
        if transaction.state.is_terminal() {
            return Ok(false);
        }

        match self.fail(&transaction, PaymentState::Failed).await? {
            CallbackOutcome::Failed { .. } => Ok(true),
            _ => Ok(false),
        }
    }

    /// Confirmation: flip the transaction, mark the sale paid, accrue.
    async fn confirm(&self, transaction: &PaymentTransaction) -> EngineResult<CallbackOutcome> {
        let sale = self.fetch_sale(&transaction.sale_id).await?;

        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        let won = PaymentRepository::transition_in(
            &mut *tx,
            &transaction.id,
            transaction.state,
            PaymentState::Confirmed,
        )
        .await?;
        if !won {
            tx.rollback().await.map_err(DbError::from)?;
            return Ok(CallbackOutcome::Duplicate);
        }

        // The payment CAS won but the sale can still have been settled out
        // of band; surface the skew instead of committing silently over it.
        if !SaleRepository::mark_paid_in(&mut *tx, &sale.id).await? {
            warn!(
                sale_id = %sale.id,
                status = ?sale.payment_status,
                "Confirming payment for a sale that was not pending"
            );
        }

        if let Some(customer_id) = &sale.customer_id {
            let earned = accrual_points(
                Money::from_cents(sale.subtotal_cents),
                self.config.accrual_points_per_unit,
            );
            LoyaltyRepository::accrue_in(&mut *tx, customer_id, earned).await?;
        }

        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale.id,
            checkout_request_id = %transaction.checkout_request_id,
            "Deferred payment confirmed"
        );
        Ok(CallbackOutcome::Confirmed {
            sale_id: sale.id.clone(),
        })
    }

    /// Failure and expiry share one path: flip the transaction, mark the
    /// sale failed, release its stock, refund its points.
    async fn fail(
        &self,
        transaction: &PaymentTransaction,
        to: PaymentState,
    ) -> EngineResult<CallbackOutcome> {
        let sale = self.fetch_sale(&transaction.sale_id).await?;

        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        let won =
            PaymentRepository::transition_in(&mut *tx, &transaction.id, transaction.state, to)
                .await?;
        if !won {
            tx.rollback().await.map_err(DbError::from)?;
            return Ok(CallbackOutcome::Duplicate);
        }

        if !SaleRepository::mark_failed_in(&mut *tx, &sale.id).await? {
            warn!(
                sale_id = %sale.id,
                status = ?sale.payment_status,
                "Failing payment for a sale that was not pending"
            );
        }
        let released = StockLedger::release_on(&mut *tx, &sale.id).await?;

        if sale.points_redeemed > 0 {
            if let Some(customer_id) = &sale.customer_id {
                LoyaltyRepository::refund_in(&mut *tx, customer_id, sale.points_redeemed).await?;
            }
        }

        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale.id,
            to = ?to,
            units_released = released,
            points_refunded = sale.points_redeemed,
            "Deferred payment settled as failed"
        );
        Ok(CallbackOutcome::Failed {
            sale_id: sale.id.clone(),
        })
    }

    async fn fetch_sale(&self, sale_id: &str) -> EngineResult<Sale> {
        Ok(self
            .db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
