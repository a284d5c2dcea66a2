//! # duka-db: Database Layer for the Sale Transaction Engine
//!
//! SQLite persistence for stock batches, sales, loyalty accounts and
//! payment transactions.
//!
//! ## Design
//! - `sqlx` with WAL mode; readers don't block the committing writer
//! - Embedded migrations, applied on connect
//! - Conditional updates (`WHERE quantity - reserved_quantity >= ?`,
//!   `WHERE state = 'pending'`, `WHERE points_balance >= ?`) serialize
//!   concurrent commits without explicit locks
//! - Transaction boundaries for the commit itself are owned by the
//!   SaleCommitter in duka-engine; repositories expose executor-generic
//!   `_in` methods for that purpose
//!
//! ## Usage
//! ```rust,ignore
//! let db = Database::new(DbConfig::new("./duka.db")).await?;
//! let available = db.stock().available("p1", None, "loc1").await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::{
    CatalogRepository, LoyaltyRepository, PaymentRepository, SaleRepository, StockError,
    StockLedger,
};
