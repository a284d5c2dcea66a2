//! # Stock Ledger
//!
//! Batch-level inventory: answers "how much is available" and performs
//! all-or-nothing allocation across batches.
//!
//! ## Allocation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Cart-Level Atomic Allocation                          │
//! │                                                                         │
//! │  BEGIN TRANSACTION                                                      │
//! │    for each cart line:                                                  │
//! │      select candidate batches, FEFO then FIFO                           │
//! │      for each batch until the line is covered:                          │
//! │        UPDATE stock_batches                                             │
//! │           SET quantity = quantity - :take                               │
//! │         WHERE id = :batch                                               │
//! │           AND quantity - reserved_quantity >= :take   ← guard           │
//! │      record a batch_consumptions row per draw                           │
//! │    any line short? ──► ROLLBACK (no batch mutated, nothing recorded)    │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  The guard makes the decrement a conditional read-modify-write: two     │
//! │  concurrent commits can never both succeed in over-allocating the       │
//! │  same units, even without row locks.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Batch Ordering
//! Ascending `expiry_date` when present (FEFO), else ascending `received_at`
//! (FIFO). Expired batches are never consumed and never counted as available.

use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use duka_core::{BatchConsumption, CartLine, StockBatch};

// =============================================================================
// Errors
// =============================================================================

/// Stock allocation errors.
///
/// `Insufficient` is an expected business outcome - the caller branches on
/// it; `Db` is a true operational failure.
#[derive(Debug, Error)]
pub enum StockError {
    /// Not enough stock at the location to cover one line. Names the line,
    /// what was requested, and what was available.
    #[error(
        "Insufficient stock for product {product_id}: available {available}, requested {requested}"
    )]
    Insufficient {
        product_id: String,
        variant_id: Option<String>,
        requested: i64,
        available: i64,
    },

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<sqlx::Error> for StockError {
    fn from(err: sqlx::Error) -> Self {
        StockError::Db(DbError::from(err))
    }
}

// =============================================================================
// Stock Ledger
// =============================================================================

/// Repository for stock-batch operations.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    /// Creates a new StockLedger.
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    /// Inserts a batch (used by the restock collaborator and tests).
    pub async fn insert_batch(&self, batch: &StockBatch) -> DbResult<()> {
        debug!(id = %batch.id, product_id = %batch.product_id, quantity = %batch.quantity, "Inserting stock batch");

        sqlx::query(
            r#"
            INSERT INTO stock_batches (
                id, product_id, variant_id, location_id,
                quantity, reserved_quantity, unit_cost_cents,
                received_at, expiry_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&batch.id)
        .bind(&batch.product_id)
        .bind(&batch.variant_id)
        .bind(&batch.location_id)
        .bind(batch.quantity)
        .bind(batch.reserved_quantity)
        .bind(batch.unit_cost_cents)
        .bind(batch.received_at)
        .bind(batch.expiry_date)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a batch by ID.
    pub async fn get_batch(&self, id: &str) -> DbResult<Option<StockBatch>> {
        let batch = sqlx::query_as::<_, StockBatch>(
            r#"
            SELECT id, product_id, variant_id, location_id,
                   quantity, reserved_quantity, unit_cost_cents,
                   received_at, expiry_date
            FROM stock_batches
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(batch)
    }

    /// Total available stock for a (product, variant, location):
    /// `Σ quantity - reserved_quantity` over non-expired batches.
    pub async fn available(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
        location_id: &str,
    ) -> DbResult<i64> {
        let now = Utc::now();

        let available: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(quantity - reserved_quantity)
            FROM stock_batches
            WHERE product_id = ?1
              AND variant_id IS ?2
              AND location_id = ?3
              AND (expiry_date IS NULL OR expiry_date > ?4)
            "#,
        )
        .bind(product_id)
        .bind(variant_id)
        .bind(location_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(available.unwrap_or(0))
    }

    /// Allocates every cart line from batches at one location, atomically.
    ///
    /// Either all lines are covered - every touched batch decremented and a
    /// consumption row written per draw, all in one transaction - or the
    /// transaction rolls back and **no batch is mutated**.
    ///
    /// Returns the consumption records (the COGS sub-list) on success.
    pub async fn allocate(
        &self,
        sale_id: &str,
        lines: &[CartLine],
        location_id: &str,
    ) -> Result<Vec<BatchConsumption>, StockError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let mut consumptions: Vec<BatchConsumption> = Vec::new();

        for line in lines {
            // Later lines see earlier lines' decrements: same transaction.
            let candidates = sqlx::query_as::<_, StockBatch>(
                r#"
                SELECT id, product_id, variant_id, location_id,
                       quantity, reserved_quantity, unit_cost_cents,
                       received_at, expiry_date
                FROM stock_batches
                WHERE product_id = ?1
                  AND variant_id IS ?2
                  AND location_id = ?3
                  AND quantity - reserved_quantity > 0
                  AND (expiry_date IS NULL OR expiry_date > ?4)
                ORDER BY (expiry_date IS NULL) ASC, expiry_date ASC, received_at ASC
                "#,
            )
            .bind(&line.product_id)
            .bind(&line.variant_id)
            .bind(location_id)
            .bind(now)
            .fetch_all(&mut *tx)
            .await
            .map_err(DbError::from)?;

            let line_available: i64 = candidates.iter().map(StockBatch::available).sum();
            let mut remaining = line.quantity;

            for batch in &candidates {
                if remaining == 0 {
                    break;
                }
                let take = remaining.min(batch.available());

                let result = sqlx::query(
                    r#"
                    UPDATE stock_batches
                    SET quantity = quantity - ?2
                    WHERE id = ?1
                      AND quantity - reserved_quantity >= ?2
                    "#,
                )
                .bind(&batch.id)
                .bind(take)
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?;

                // Guard failed: availability changed under us. Skip the
                // batch; any shortfall surfaces below.
                if result.rows_affected() == 0 {
                    continue;
                }

                consumptions.push(BatchConsumption {
                    id: Uuid::new_v4().to_string(),
                    sale_id: sale_id.to_string(),
                    batch_id: batch.id.clone(),
                    product_id: line.product_id.clone(),
                    variant_id: line.variant_id.clone(),
                    quantity: take,
                    unit_cost_cents: batch.unit_cost_cents,
                });
                remaining -= take;
            }

            if remaining > 0 {
                tx.rollback().await.map_err(DbError::from)?;
                return Err(StockError::Insufficient {
                    product_id: line.product_id.clone(),
                    variant_id: line.variant_id.clone(),
                    requested: line.quantity,
                    available: line_available,
                });
            }
        }

        for consumption in &consumptions {
            sqlx::query(
                r#"
                INSERT INTO batch_consumptions (
                    id, sale_id, batch_id, product_id, variant_id,
                    quantity, unit_cost_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&consumption.id)
            .bind(&consumption.sale_id)
            .bind(&consumption.batch_id)
            .bind(&consumption.product_id)
            .bind(&consumption.variant_id)
            .bind(consumption.quantity)
            .bind(consumption.unit_cost_cents)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;
        }

        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale_id,
            lines = lines.len(),
            batches = consumptions.len(),
            "Stock allocated"
        );

        Ok(consumptions)
    }

    /// Releases a sale's allocation: re-increments exactly the consumed
    /// batches and deletes the consumption records, in one transaction.
    ///
    /// Idempotent: releasing a sale with no consumption rows is a no-op.
    /// Returns the number of units put back.
    pub async fn release(&self, sale_id: &str) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;
        let released = Self::release_on(&mut *tx, sale_id).await?;
        tx.commit().await?;
        Ok(released)
    }

    /// The release body, on a caller-owned connection. Used by the
    /// reconciler so the release rides in the same transaction as the
    /// payment-state flip.
    pub async fn release_on(
        conn: &mut sqlx::SqliteConnection,
        sale_id: &str,
    ) -> DbResult<i64> {
        let consumptions = sqlx::query_as::<_, BatchConsumption>(
            r#"
            SELECT id, sale_id, batch_id, product_id, variant_id,
                   quantity, unit_cost_cents
            FROM batch_consumptions
            WHERE sale_id = ?1
            "#,
        )
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut released = 0i64;
        for consumption in &consumptions {
            sqlx::query(
                r#"
                UPDATE stock_batches
                SET quantity = quantity + ?2
                WHERE id = ?1
                "#,
            )
            .bind(&consumption.batch_id)
            .bind(consumption.quantity)
            .execute(&mut *conn)
            .await?;
            released += consumption.quantity;
        }

        sqlx::query("DELETE FROM batch_consumptions WHERE sale_id = ?1")
            .bind(sale_id)
            .execute(&mut *conn)
            .await?;

        if released > 0 {
            info!(sale_id = %sale_id, units = %released, "Stock allocation released");
        }

        Ok(released)
    }

    /// Gets the consumption records for a sale (COGS reporting).
    pub async fn consumptions(&self, sale_id: &str) -> DbResult<Vec<BatchConsumption>> {
        let rows = sqlx::query_as::<_, BatchConsumption>(
            r#"
            SELECT id, sale_id, batch_id, product_id, variant_id,
                   quantity, unit_cost_cents
            FROM batch_consumptions
            WHERE sale_id = ?1
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{Duration, Utc};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn batch(id: &str, qty: i64, cost_cents: i64, received_offset_secs: i64) -> StockBatch {
        StockBatch {
            id: id.to_string(),
            product_id: "p1".to_string(),
            variant_id: Some("v1".to_string()),
            location_id: "loc1".to_string(),
            quantity: qty,
            reserved_quantity: 0,
            unit_cost_cents: cost_cents,
            received_at: Utc::now() + Duration::seconds(received_offset_secs),
            expiry_date: None,
        }
    }

    fn line(qty: i64) -> CartLine {
        CartLine {
            product_id: "p1".to_string(),
            variant_id: Some("v1".to_string()),
            quantity: qty,
        }
    }

    /// Scenario: batches [5 @ 10.00, 10 @ 12.00] by received_at; allocating 8
    /// consumes 5 from the first and 3 from the second (FIFO).
    #[tokio::test]
    async fn test_fifo_allocation_spans_batches() {
        let db = db().await;
        let stock = db.stock();
        stock.insert_batch(&batch("b1", 5, 1000, 0)).await.unwrap();
        stock.insert_batch(&batch("b2", 10, 1200, 60)).await.unwrap();

        let consumptions = stock.allocate("sale-1", &[line(8)], "loc1").await.unwrap();

        assert_eq!(consumptions.len(), 2);
        assert_eq!(consumptions[0].batch_id, "b1");
        assert_eq!(consumptions[0].quantity, 5);
        assert_eq!(consumptions[0].unit_cost_cents, 1000);
        assert_eq!(consumptions[1].batch_id, "b2");
        assert_eq!(consumptions[1].quantity, 3);
        assert_eq!(consumptions[1].unit_cost_cents, 1200);

        assert_eq!(stock.get_batch("b1").await.unwrap().unwrap().quantity, 0);
        assert_eq!(stock.get_batch("b2").await.unwrap().unwrap().quantity, 7);
    }

    /// Scenario: same batches, allocate 20 with only 15 available - the call
    /// fails, both batches keep their pre-call quantities, and the error
    /// names the shortfall.
    #[tokio::test]
    async fn test_insufficient_stock_mutates_nothing() {
        let db = db().await;
        let stock = db.stock();
        stock.insert_batch(&batch("b1", 5, 1000, 0)).await.unwrap();
        stock.insert_batch(&batch("b2", 10, 1200, 60)).await.unwrap();

        let err = stock
            .allocate("sale-1", &[line(20)], "loc1")
            .await
            .unwrap_err();

        match err {
            StockError::Insufficient {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 20);
                assert_eq!(available, 15);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(stock.get_batch("b1").await.unwrap().unwrap().quantity, 5);
        assert_eq!(stock.get_batch("b2").await.unwrap().unwrap().quantity, 10);
        assert!(stock.consumptions("sale-1").await.unwrap().is_empty());
    }

    /// Cart-level atomicity: when the second line fails, the first line's
    /// already-made allocation is rolled back too.
    #[tokio::test]
    async fn test_multi_line_failure_rolls_back_earlier_lines() {
        let db = db().await;
        let stock = db.stock();
        stock.insert_batch(&batch("b1", 5, 1000, 0)).await.unwrap();

        let mut other = batch("b2", 2, 500, 0);
        other.product_id = "p2".to_string();
        other.variant_id = None;
        stock.insert_batch(&other).await.unwrap();

        let lines = [
            line(3), // coverable
            CartLine {
                product_id: "p2".to_string(),
                variant_id: None,
                quantity: 10, // only 2 available
            },
        ];

        let err = stock.allocate("sale-1", &lines, "loc1").await.unwrap_err();
        assert!(matches!(err, StockError::Insufficient { .. }));

        // First line's batch untouched.
        assert_eq!(stock.get_batch("b1").await.unwrap().unwrap().quantity, 5);
    }

    /// FEFO: a batch with an expiry date is consumed before an older batch
    /// without one.
    #[tokio::test]
    async fn test_fefo_prefers_expiring_batches() {
        let db = db().await;
        let stock = db.stock();
        stock.insert_batch(&batch("old", 10, 1000, 0)).await.unwrap();

        let mut expiring = batch("expiring", 10, 1100, 3600);
        expiring.expiry_date = Some(Utc::now() + Duration::days(3));
        stock.insert_batch(&expiring).await.unwrap();

        let consumptions = stock.allocate("sale-1", &[line(4)], "loc1").await.unwrap();
        assert_eq!(consumptions.len(), 1);
        assert_eq!(consumptions[0].batch_id, "expiring");
    }

    #[tokio::test]
    async fn test_expired_batches_are_ignored() {
        let db = db().await;
        let stock = db.stock();

        let mut expired = batch("expired", 10, 1000, 0);
        expired.expiry_date = Some(Utc::now() - Duration::days(1));
        stock.insert_batch(&expired).await.unwrap();
        stock.insert_batch(&batch("fresh", 3, 1200, 60)).await.unwrap();

        assert_eq!(stock.available("p1", Some("v1"), "loc1").await.unwrap(), 3);

        let err = stock.allocate("s", &[line(5)], "loc1").await.unwrap_err();
        match err {
            StockError::Insufficient { available, .. } => assert_eq!(available, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_available_excludes_reserved() {
        let db = db().await;
        let stock = db.stock();

        let mut b = batch("b1", 10, 1000, 0);
        b.reserved_quantity = 4;
        stock.insert_batch(&b).await.unwrap();

        assert_eq!(stock.available("p1", Some("v1"), "loc1").await.unwrap(), 6);

        // Allocation cannot dip into the reservation either.
        let err = stock.allocate("s", &[line(7)], "loc1").await.unwrap_err();
        assert!(matches!(err, StockError::Insufficient { available: 6, .. }));
    }

    #[tokio::test]
    async fn test_release_restores_consumed_batches() {
        let db = db().await;
        let stock = db.stock();
        stock.insert_batch(&batch("b1", 5, 1000, 0)).await.unwrap();
        stock.insert_batch(&batch("b2", 10, 1200, 60)).await.unwrap();

        stock.allocate("sale-1", &[line(8)], "loc1").await.unwrap();
        let released = stock.release("sale-1").await.unwrap();
        assert_eq!(released, 8);

        assert_eq!(stock.get_batch("b1").await.unwrap().unwrap().quantity, 5);
        assert_eq!(stock.get_batch("b2").await.unwrap().unwrap().quantity, 10);

        // Second release is a no-op.
        assert_eq!(stock.release("sale-1").await.unwrap(), 0);
    }

    /// Σ consumedQty == requestedQty on success.
    #[tokio::test]
    async fn test_consumed_sums_to_requested() {
        let db = db().await;
        let stock = db.stock();
        stock.insert_batch(&batch("b1", 3, 1000, 0)).await.unwrap();
        stock.insert_batch(&batch("b2", 3, 1100, 10)).await.unwrap();
        stock.insert_batch(&batch("b3", 3, 1200, 20)).await.unwrap();

        let consumptions = stock.allocate("sale-1", &[line(7)], "loc1").await.unwrap();
        let total: i64 = consumptions.iter().map(|c| c.quantity).sum();
        assert_eq!(total, 7);
    }
}
