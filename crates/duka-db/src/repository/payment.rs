//! # Payment Transaction Repository
//!
//! Persistence for the deferred-payment state machine. The rules of which
//! transitions exist live in `duka_core::payment`; this repository makes
//! them durable with conditional updates, so a transition either wins the
//! row or observes that someone else already did.
//!
//! ## Why Conditional Updates
//! The confirmation callback can arrive twice (gateway retries), or race
//! the expiry sweep. `transition_in` is a compare-and-set on the `state`
//! column: exactly one writer moves the row out of `pending`, every other
//! writer sees `rows_affected == 0` and treats the event as a no-op.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use duka_core::{PaymentState, PaymentTransaction};

/// Repository for payment transaction operations.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Inserts a payment transaction on the given executor.
    pub async fn insert_in<'e, E>(executor: E, transaction: &PaymentTransaction) -> DbResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        debug!(
            transaction_ref = %transaction.transaction_ref,
            checkout_request_id = %transaction.checkout_request_id,
            sale_id = %transaction.sale_id,
            "Inserting payment transaction"
        );

        sqlx::query(
            r#"
            INSERT INTO payment_transactions (
                id, transaction_ref, checkout_request_id, merchant_request_id,
                sale_id, amount_cents, phone_number, state,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&transaction.id)
        .bind(&transaction.transaction_ref)
        .bind(&transaction.checkout_request_id)
        .bind(&transaction.merchant_request_id)
        .bind(&transaction.sale_id)
        .bind(transaction.amount_cents)
        .bind(&transaction.phone_number)
        .bind(transaction.state)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Looks a transaction up by the gateway's correlation key.
    pub async fn get_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> DbResult<Option<PaymentTransaction>> {
        let transaction = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            SELECT id, transaction_ref, checkout_request_id, merchant_request_id,
                   sale_id, amount_cents, phone_number, state,
                   created_at, updated_at
            FROM payment_transactions
            WHERE checkout_request_id = ?1
            "#,
        )
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    /// Gets the transaction for a sale, if any.
    pub async fn get_by_sale(&self, sale_id: &str) -> DbResult<Option<PaymentTransaction>> {
        let transaction = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            SELECT id, transaction_ref, checkout_request_id, merchant_request_id,
                   sale_id, amount_cents, phone_number, state,
                   created_at, updated_at
            FROM payment_transactions
            WHERE sale_id = ?1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(sale_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    /// Compare-and-set state transition on the given executor.
    ///
    /// Moves the row from `from` to `to` and returns whether this writer
    /// won. `false` means the row was not in `from` - a duplicate callback
    /// or a lost race, both handled as no-ops upstream.
    pub async fn transition_in<'e, E>(
        executor: E,
        transaction_id: &str,
        from: PaymentState,
        to: PaymentState,
    ) -> DbResult<bool>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET state = ?3, updated_at = ?4
            WHERE id = ?1 AND state = ?2
            "#,
        )
        .bind(transaction_id)
        .bind(from)
        .bind(to)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Finds `pending` transactions last touched before the cutoff.
    ///
    /// Fed to the expiry sweep; the sweep still transitions each row with
    /// the compare-and-set above, so a callback landing mid-sweep wins or
    /// loses cleanly.
    pub async fn stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<PaymentTransaction>> {
        let transactions = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            SELECT id, transaction_ref, checkout_request_id, merchant_request_id,
                   sale_id, amount_cents, phone_number, state,
                   created_at, updated_at
            FROM payment_transactions
            WHERE state = 'pending' AND updated_at < ?1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::sale::SaleRepository;
    use duka_core::{PaymentMethod, PaymentStatus, Sale};

    async fn db_with_sale(sale_id: &str) -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let sale = Sale {
            id: sale_id.to_string(),
            sale_number: format!("SN-{sale_id}"),
            location_id: "loc-1".to_string(),
            customer_id: None,
            subtotal_cents: 1000,
            discount_cents: 0,
            tax_cents: 80,
            redemption_cents: 0,
            points_redeemed: 0,
            final_amount_cents: 1080,
            payment_method: PaymentMethod::MobileMoney,
            payment_status: PaymentStatus::Pending,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        SaleRepository::insert_in(db.pool(), &sale).await.unwrap();
        db
    }

    fn transaction(id: &str, sale_id: &str, state: PaymentState) -> PaymentTransaction {
        let now = Utc::now();
        PaymentTransaction {
            id: id.to_string(),
            transaction_ref: format!("TXN-{id}"),
            checkout_request_id: format!("ws_CO_{id}"),
            merchant_request_id: format!("mr_{id}"),
            sale_id: sale_id.to_string(),
            amount_cents: 1080,
            phone_number: "254712345678".to_string(),
            state,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup_by_correlation_key() {
        let db = db_with_sale("s1").await;
        let t = transaction("t1", "s1", PaymentState::Pending);
        PaymentRepository::insert_in(db.pool(), &t).await.unwrap();

        let fetched = db
            .payments()
            .get_by_checkout_request_id("ws_CO_t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.sale_id, "s1");
        assert_eq!(fetched.state, PaymentState::Pending);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let db = db_with_sale("s1").await;
        let t = transaction("t1", "s1", PaymentState::Pending);
        PaymentRepository::insert_in(db.pool(), &t).await.unwrap();

        // First confirmation wins.
        assert!(PaymentRepository::transition_in(
            db.pool(),
            "t1",
            PaymentState::Pending,
            PaymentState::Confirmed
        )
        .await
        .unwrap());

        // A replayed confirmation matches no rows.
        assert!(!PaymentRepository::transition_in(
            db.pool(),
            "t1",
            PaymentState::Pending,
            PaymentState::Confirmed
        )
        .await
        .unwrap());

        // So does a racing expiry.
        assert!(!PaymentRepository::transition_in(
            db.pool(),
            "t1",
            PaymentState::Pending,
            PaymentState::Expired
        )
        .await
        .unwrap());
    }

    #[tokio::test]
    async fn test_stale_pending_finds_old_rows() {
        let db = db_with_sale("s1").await;
        let t = transaction("t1", "s1", PaymentState::Pending);
        PaymentRepository::insert_in(db.pool(), &t).await.unwrap();

        let future_cutoff = Utc::now() + chrono::Duration::seconds(5);
        let stale = db.payments().stale_pending(future_cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);

        let past_cutoff = Utc::now() - chrono::Duration::hours(1);
        let stale = db.payments().stale_pending(past_cutoff).await.unwrap();
        assert!(stale.is_empty());
    }
}
