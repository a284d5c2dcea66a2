//! # Loyalty Repository
//!
//! Point balances, mutated only inside a commit or reconciliation
//! transaction: redemption decrements at commit, accrual increments at
//! settlement, refunds re-credit when a deferred payment dies.
//!
//! Redemption uses a conditional update guarded by the current balance, so
//! two concurrent commits redeeming from the same account cannot push it
//! negative; the schema CHECK backs the guard up.

use sqlx::{Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use duka_core::LoyaltyAccount;

/// Repository for loyalty account operations.
#[derive(Debug, Clone)]
pub struct LoyaltyRepository {
    pool: SqlitePool,
}

impl LoyaltyRepository {
    /// Creates a new LoyaltyRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LoyaltyRepository { pool }
    }

    /// Gets an account by customer ID.
    pub async fn get_account(&self, customer_id: &str) -> DbResult<Option<LoyaltyAccount>> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(
            r#"
            SELECT customer_id, points_balance
            FROM loyalty_accounts
            WHERE customer_id = ?1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// Returns the customer's balance, or zero for an unknown customer.
    pub async fn balance(&self, customer_id: &str) -> DbResult<i64> {
        Ok(self
            .get_account(customer_id)
            .await?
            .map(|a| a.points_balance)
            .unwrap_or(0))
    }

    /// Creates an account with an initial balance (tests, onboarding).
    pub async fn create_account(&self, customer_id: &str, initial_points: i64) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loyalty_accounts (customer_id, points_balance)
            VALUES (?1, ?2)
            "#,
        )
        .bind(customer_id)
        .bind(initial_points)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Redeems points on the given executor.
    ///
    /// Guarded by `points_balance >= points`; when the balance changed since
    /// the committer's read, the update matches no rows and
    /// `PreconditionFailed` surfaces, rolling back the enclosing
    /// transaction.
    pub async fn redeem_in<'e, E>(executor: E, customer_id: &str, points: i64) -> DbResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        if points == 0 {
            return Ok(());
        }

        debug!(customer_id = %customer_id, points = %points, "Redeeming loyalty points");

        let result = sqlx::query(
            r#"
            UPDATE loyalty_accounts
            SET points_balance = points_balance - ?2
            WHERE customer_id = ?1 AND points_balance >= ?2
            "#,
        )
        .bind(customer_id)
        .bind(points)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::precondition("LoyaltyAccount", customer_id));
        }

        Ok(())
    }

    /// Accrues points on the given executor.
    ///
    /// Upserts, so a customer without an account yet still earns points on
    /// their first sale.
    pub async fn accrue_in<'e, E>(executor: E, customer_id: &str, points: i64) -> DbResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        if points == 0 {
            return Ok(());
        }

        debug!(customer_id = %customer_id, points = %points, "Accruing loyalty points");

        sqlx::query(
            r#"
            INSERT INTO loyalty_accounts (customer_id, points_balance)
            VALUES (?1, ?2)
            ON CONFLICT(customer_id) DO UPDATE
            SET points_balance = points_balance + ?2
            "#,
        )
        .bind(customer_id)
        .bind(points)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Re-credits points held by a failed/expired deferred payment.
    ///
    /// Same mechanics as accrual; a separate name because it means something
    /// different in the audit trail.
    pub async fn refund_in<'e, E>(executor: E, customer_id: &str, points: i64) -> DbResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        Self::accrue_in(executor, customer_id, points).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_redeem_decrements_balance() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.loyalty().create_account("cust-1", 500).await.unwrap();

        LoyaltyRepository::redeem_in(db.pool(), "cust-1", 200)
            .await
            .unwrap();

        assert_eq!(db.loyalty().balance("cust-1").await.unwrap(), 300);
    }

    #[tokio::test]
    async fn test_redeem_beyond_balance_fails() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.loyalty().create_account("cust-1", 100).await.unwrap();

        let err = LoyaltyRepository::redeem_in(db.pool(), "cust-1", 200)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::PreconditionFailed { .. }));

        // Balance untouched.
        assert_eq!(db.loyalty().balance("cust-1").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_accrue_upserts_missing_account() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        LoyaltyRepository::accrue_in(db.pool(), "new-cust", 42)
            .await
            .unwrap();
        assert_eq!(db.loyalty().balance("new-cust").await.unwrap(), 42);

        LoyaltyRepository::accrue_in(db.pool(), "new-cust", 8)
            .await
            .unwrap();
        assert_eq!(db.loyalty().balance("new-cust").await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_unknown_customer_has_zero_balance() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert_eq!(db.loyalty().balance("ghost").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_point_operations_are_noops() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        LoyaltyRepository::redeem_in(db.pool(), "ghost", 0).await.unwrap();
        LoyaltyRepository::accrue_in(db.pool(), "ghost", 0).await.unwrap();
        assert!(db.loyalty().get_account("ghost").await.unwrap().is_none());
    }
}
