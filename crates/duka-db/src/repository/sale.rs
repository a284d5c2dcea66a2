//! # Sale Repository
//!
//! Database operations for sales and sale items.
//!
//! ## Transaction Boundaries
//! The durable unit of a commit (sale + items + payment transaction +
//! loyalty delta) is owned by the SaleCommitter in duka-engine. This
//! repository therefore exposes `*_in` methods that run against any
//! executor - a pool for standalone reads, a `&mut *tx` when the committer
//! stitches several writes into one transaction.
//!
//! ## Payment-Status Writes
//! `mark_paid_in` / `mark_failed_in` are conditional updates guarded by
//! `payment_status = 'pending'`: a sale is immutable once paid, and a
//! replayed callback that tries to flip it again simply matches zero rows.

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use duka_core::{Sale, SaleItem};

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Inserts a sale row on the given executor.
    pub async fn insert_in<'e, E>(executor: E, sale: &Sale) -> DbResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        debug!(id = %sale.id, sale_number = %sale.sale_number, "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, sale_number, location_id, customer_id,
                subtotal_cents, discount_cents, tax_cents,
                redemption_cents, points_redeemed, final_amount_cents,
                payment_method, payment_status, notes,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.sale_number)
        .bind(&sale.location_id)
        .bind(&sale.customer_id)
        .bind(sale.subtotal_cents)
        .bind(sale.discount_cents)
        .bind(sale.tax_cents)
        .bind(sale.redemption_cents)
        .bind(sale.points_redeemed)
        .bind(sale.final_amount_cents)
        .bind(sale.payment_method)
        .bind(sale.payment_status)
        .bind(&sale.notes)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Inserts a sale item on the given executor.
    ///
    /// ## Snapshot Pattern
    /// Price and weighted cost are frozen onto the item so the sale record
    /// survives later catalog or batch changes.
    pub async fn insert_item_in<'e, E>(executor: E, item: &SaleItem) -> DbResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, product_id, variant_id,
                quantity, unit_price_cents, unit_cost_cents, total_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(&item.variant_id)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.unit_cost_cents)
        .bind(item.total_cents)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(
            r#"
            SELECT id, sale_number, location_id, customer_id,
                   subtotal_cents, discount_cents, tax_cents,
                   redemption_cents, points_redeemed, final_amount_cents,
                   payment_method, payment_status, notes,
                   created_at, updated_at
            FROM sales
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    /// Gets all items for a sale.
    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let items = sqlx::query_as::<_, SaleItem>(
            r#"
            SELECT id, sale_id, product_id, variant_id,
                   quantity, unit_price_cents, unit_cost_cents, total_cents
            FROM sale_items
            WHERE sale_id = ?1
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Marks a pending sale as paid. Returns false if the sale was not in
    /// `pending` (already paid, failed, or missing) - the caller decides
    /// whether that is a duplicate callback or a bug.
    pub async fn mark_paid_in<'e, E>(executor: E, sale_id: &str) -> DbResult<bool>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE sales
            SET payment_status = 'paid', updated_at = ?2
            WHERE id = ?1 AND payment_status = 'pending'
            "#,
        )
        .bind(sale_id)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Marks a pending sale as failed. Same guard semantics as
    /// [`mark_paid_in`](Self::mark_paid_in).
    pub async fn mark_failed_in<'e, E>(executor: E, sale_id: &str) -> DbResult<bool>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE sales
            SET payment_status = 'failed', updated_at = ?2
            WHERE id = ?1 AND payment_status = 'pending'
            "#,
        )
        .bind(sale_id)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl SaleRepository {
    /// Mints the next sale number for a location: `YYYYMMDD-LL-NNNN`.
    ///
    /// ## Format
    /// - YYYYMMDD: date
    /// - LL: location code (last 2 chars of location_id)
    /// - NNNN: per-day, per-location sequence, padded to 4 digits
    ///
    /// The sequence comes from an atomic upsert on `sale_counters`, so
    /// concurrent commits always get distinct numbers (`sales.sale_number`
    /// is UNIQUE; a duplicate would abort the commit). An aborted commit
    /// skips a number, which is fine.
    ///
    /// ## Example
    /// `20260830-01-0042`
    pub async fn next_sale_number(&self, location_id: &str) -> DbResult<String> {
        let day = Utc::now().format("%Y%m%d").to_string();

        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sale_counters (day, location_id, seq)
            VALUES (?1, ?2, 1)
            ON CONFLICT(day, location_id) DO UPDATE SET seq = seq + 1
            RETURNING seq
            "#,
        )
        .bind(&day)
        .bind(location_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(format!("{}-{}-{:04}", day, location_code(location_id), seq))
    }
}

fn location_code(location_id: &str) -> String {
    let code: String = location_id
        .chars()
        .rev()
        .take(2)
        .collect::<String>()
        .chars()
        .rev()
        .collect();
    if code.len() < 2 {
        "00".to_string()
    } else {
        code
    }
}

/// Generates a new sale item ID.
pub fn generate_sale_item_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use duka_core::{PaymentMethod, PaymentStatus};

    fn sale(id: &str, status: PaymentStatus) -> Sale {
        let now = Utc::now();
        Sale {
            id: id.to_string(),
            sale_number: format!("20260830-01-{id}"),
            location_id: "loc-01".to_string(),
            customer_id: None,
            subtotal_cents: 30000,
            discount_cents: 0,
            tax_cents: 2400,
            redemption_cents: 0,
            points_redeemed: 0,
            final_amount_cents: 32400,
            payment_method: PaymentMethod::Cash,
            payment_status: status,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_sale() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let s = sale("s1", PaymentStatus::Paid);
        SaleRepository::insert_in(db.pool(), &s).await.unwrap();

        let fetched = db.sales().get_by_id("s1").await.unwrap().unwrap();
        assert_eq!(fetched.sale_number, s.sale_number);
        assert_eq!(fetched.final_amount_cents, 32400);
        assert_eq!(fetched.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_items_resum_to_totals() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let s = sale("s1", PaymentStatus::Paid);
        SaleRepository::insert_in(db.pool(), &s).await.unwrap();

        for (i, (qty, price)) in [(2i64, 10000i64), (1, 10000)].iter().enumerate() {
            let item = SaleItem {
                id: format!("i{i}"),
                sale_id: "s1".to_string(),
                product_id: "p1".to_string(),
                variant_id: None,
                quantity: *qty,
                unit_price_cents: *price,
                unit_cost_cents: 800,
                total_cents: qty * price,
            };
            SaleRepository::insert_item_in(db.pool(), &item).await.unwrap();
        }

        let items = db.sales().get_items("s1").await.unwrap();
        let resummed: i64 = items.iter().map(|i| i.total_cents).sum();
        assert_eq!(resummed, s.subtotal_cents);
    }

    #[tokio::test]
    async fn test_mark_paid_requires_pending() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let s = sale("s1", PaymentStatus::Pending);
        SaleRepository::insert_in(db.pool(), &s).await.unwrap();

        assert!(SaleRepository::mark_paid_in(db.pool(), "s1").await.unwrap());
        // Second attempt matches no rows: the sale is immutable once paid.
        assert!(!SaleRepository::mark_paid_in(db.pool(), "s1").await.unwrap());
        assert!(!SaleRepository::mark_failed_in(db.pool(), "s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_sale_number_format() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let number = db.sales().next_sale_number("loc-01").await.unwrap();
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1], "01");
        assert_eq!(parts[2], "0001");
    }

    /// Back-to-back mints in the same millisecond must still produce
    /// distinct numbers; sale_number is UNIQUE and a collision would abort
    /// a commit after its stock allocation.
    #[tokio::test]
    async fn test_sale_numbers_never_collide() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let first = db.sales().next_sale_number("loc-01").await.unwrap();
        let second = db.sales().next_sale_number("loc-01").await.unwrap();
        assert_ne!(first, second);
        assert!(second.ends_with("-0002"));

        // Each location counts independently.
        let other = db.sales().next_sale_number("loc-02").await.unwrap();
        assert!(other.ends_with("-0001"));

        // Both numbers insert cleanly under the UNIQUE constraint.
        for (i, number) in [first, second].into_iter().enumerate() {
            let mut s = sale(&format!("s{i}"), PaymentStatus::Paid);
            s.sale_number = number;
            SaleRepository::insert_in(db.pool(), &s).await.unwrap();
        }
    }
}
