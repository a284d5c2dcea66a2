//! # duka-engine: Sale Commit Orchestration
//!
//! The top layer of the sale transaction engine: turns a validated cart
//! into a durable sale, talks to the mobile-money gateway, and settles
//! deferred payments when the gateway reports back.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            SaleEngine                                   │
//! │                                                                         │
//! │   commit_sale ───────────► SaleCommitter ──► PriceCalculator (core)     │
//! │                                 │        ──► StockLedger (db)           │
//! │                                 │        ──► PaymentGateway (HTTP)      │
//! │                                 │        ──► one persistence tx (db)    │
//! │                                                                         │
//! │   handle_payment_callback ─► Reconciler ──► payment state machine       │
//! │   sweep_expired_payments ──►   (core) + compare-and-set rows (db)       │
//! │   cancel_pending_sale ─────►                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let db = Database::new(DbConfig::new("./duka.db")).await?;
//! let gateway = Arc::new(DarajaGateway::new(gateway_config)?);
//! let engine = SaleEngine::new(db, gateway, EngineConfig::default());
//!
//! let result = engine.commit_sale(request).await?;
//! ```

pub mod committer;
pub mod config;
pub mod error;
pub mod gateway;
pub mod reconcile;

use std::sync::Arc;

use duka_db::Database;

pub use committer::SaleCommitter;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use gateway::{DarajaGateway, GatewayConfig, GatewayError, PaymentGateway, StkPushAck};
pub use reconcile::{CallbackOutcome, CallbackPayload, Reconciler};

/// Facade over the committer and the reconciler, sharing one database and
/// one configuration.
pub struct SaleEngine {
    committer: SaleCommitter,
    reconciler: Reconciler,
    db: Database,
}

impl SaleEngine {
    pub fn new(db: Database, gateway: Arc<dyn PaymentGateway>, config: EngineConfig) -> Self {
        SaleEngine {
            committer: SaleCommitter::new(db.clone(), gateway, config),
            reconciler: Reconciler::new(db.clone(), config),
            db,
        }
    }

    /// Commits a sale. See [`SaleCommitter::commit`].
    pub async fn commit_sale(
        &self,
        request: duka_core::CommitRequest,
    ) -> EngineResult<duka_core::SaleResult> {
        self.committer.commit(request).await
    }

    /// Handles a gateway settlement callback. See
    /// [`Reconciler::handle_callback`].
    pub async fn handle_payment_callback(
        &self,
        payload: &CallbackPayload,
    ) -> EngineResult<CallbackOutcome> {
        self.reconciler.handle_callback(payload).await
    }

    /// Expires stale pending payments. See [`Reconciler::sweep_expired`].
    pub async fn sweep_expired_payments(&self) -> EngineResult<usize> {
        self.reconciler.sweep_expired().await
    }

    /// Cancels a sale still awaiting payment. See
    /// [`Reconciler::cancel_pending`].
    pub async fn cancel_pending_sale(&self, sale_id: &str) -> EngineResult<bool> {
        self.reconciler.cancel_pending(sale_id).await
    }

    /// The underlying database handle (health checks, read models).
    pub fn db(&self) -> &Database {
        &self.db
    }
}
