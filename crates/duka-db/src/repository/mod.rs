//! # Repository Module
//!
//! Repository implementations for all engine tables.
//!
//! ## Repository Pattern
//! Each repository wraps the connection pool and owns the SQL for one
//! concern. Methods suffixed `_in` take an explicit executor so the
//! SaleCommitter can run several repositories' writes inside one
//! transaction.
//!
//! - [`catalog`] - product/variant price resolution (read model)
//! - [`stock`] - the stock ledger: availability, FEFO/FIFO allocation
//! - [`sale`] - sales and sale items
//! - [`loyalty`] - point balances (redeem/accrue/refund)
//! - [`payment`] - deferred payment transactions (compare-and-set states)

pub mod catalog;
pub mod loyalty;
pub mod payment;
pub mod sale;
pub mod stock;

pub use catalog::CatalogRepository;
pub use loyalty::LoyaltyRepository;
pub use payment::PaymentRepository;
pub use sale::SaleRepository;
pub use stock::{StockError, StockLedger};
