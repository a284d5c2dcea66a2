//! # Sale Committer
//!
//! The one component with commit semantics. Everything else computes or
//! persists; this module decides the order and owns the failure paths.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Commit Pipeline                                 │
//! │                                                                         │
//! │  validate ──► resolve prices ──► price cart ──► allocate stock          │
//! │     │              │                 │               │                  │
//! │     ▼ (fail)       ▼ (fail)          ▼ (fail)        ▼ (fail)           │
//! │   nothing        nothing           nothing         rolled back          │
//! │                                                                         │
//! │  then settle:                                                           │
//! │   CASH/CARD ──► one transaction: sale(paid) + items + redeem + accrue   │
//! │   MOBILE    ──► STK push (no locks held during the network call)        │
//! │                   │ rejected ──► release stock, persist nothing         │
//! │                   ▼ accepted                                            │
//! │                 one transaction: sale(pending) + items +                │
//! │                 payment_transaction(pending) + redeem                   │
//! │                 (accrual waits for the confirmation callback)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock allocation is durable in its own transaction, keyed by the sale id
//! generated up front; every abort path after it runs `release` so the units
//! go back and the consumption trail disappears.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::gateway::PaymentGateway;
use duka_core::payment::{apply, PaymentEvent, Transition};
use duka_core::validation::validate_commit_request;
use duka_core::{
    BatchConsumption, CartLine, CommitRequest, CoreError, Money,
    PaymentState, PaymentStatus, PaymentTransaction, PriceBreakdown, PriceCalculator, PriceLine,
    RedemptionRequest, Sale, SaleItem, SaleResult, SaleResultItem, ValidationError,
};
use duka_db::repository::sale::generate_sale_item_id;
use duka_db::{Database, DbError, LoyaltyRepository, PaymentRepository, SaleRepository};

// =============================================================================
// Sale Committer
// =============================================================================

/// Orchestrates the commit of one sale.
pub struct SaleCommitter {
    db: Database,
    gateway: Arc<dyn PaymentGateway>,
    config: EngineConfig,
}

impl SaleCommitter {
    pub fn new(db: Database, gateway: Arc<dyn PaymentGateway>, config: EngineConfig) -> Self {
        SaleCommitter {
            db,
            gateway,
            config,
        }
    }

    /// Commits a sale.
    ///
    /// On success the sale, its items, the stock decrement and the loyalty
    /// delta are all durable. On any error nothing observable remains: the
    /// pipeline either failed before allocation or put the allocation back.
    pub async fn commit(&self, request: CommitRequest) -> EngineResult<SaleResult> {
        validate_commit_request(&request).map_err(CoreError::from)?;

        let sale_id = Uuid::new_v4().to_string();
        let sale_number = self.db.sales().next_sale_number(&request.location_id).await?;

        // Resolve every line against the catalog before touching anything.
        let mut price_lines = Vec::with_capacity(request.cart_items.len());
        for line in &request.cart_items {
            let resolved = self
                .db
                .catalog()
                .resolve_price(&line.product_id, line.variant_id.as_deref())
                .await?
                .ok_or_else(|| CoreError::ProductNotFound(line.product_id.clone()))?;

            price_lines.push(PriceLine {
                unit_base_price: Money::from_cents(resolved.unit_base_price_cents),
                variant_modifier: Money::from_cents(resolved.variant_modifier_cents),
                quantity: line.quantity,
            });
        }

        // Balance read immediately before pricing; the conditional update at
        // persist time is what actually guards against a concurrent drain.
        let redemption = match (&request.customer_id, request.points_to_redeem) {
            (Some(customer_id), Some(points)) if points > 0 => {
                let balance = self.db.loyalty().balance(customer_id).await?;
                Some(RedemptionRequest {
                    points_to_redeem: points,
                    available_points: balance,
                    points_per_currency_unit: self.config.redemption_points_per_unit,
                })
            }
            _ => None,
        };

        let calculator = PriceCalculator::new(self.config.tax_rate(), self.config.redemption_policy);
        let discount = Money::from_cents(request.discount_cents.unwrap_or(0));
        let breakdown = calculator.price_cart(&price_lines, discount, redemption)?;

        // Durable allocation, keyed by the sale id we just minted. All-or-
        // nothing across the cart.
        let consumptions = if request.enable_stock_tracking {
            self.db
                .stock()
                .allocate(&sale_id, &request.cart_items, &request.location_id)
                .await?
        } else {
            Vec::new()
        };

        // From here on, any failure must put the allocation back.
        let settled = self
            .settle(&request, &sale_id, &sale_number, &price_lines, &breakdown, &consumptions)
            .await;

        match settled {
            Ok(result) => Ok(result),
            Err(err) => {
                if request.enable_stock_tracking {
                    if let Err(release_err) = self.db.stock().release(&sale_id).await {
                        error!(
                            sale_id = %sale_id,
                            error = %release_err,
                            "Stock release after aborted commit failed; units remain held"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Settlement: the payment-method split and the single persistence
    /// transaction for each branch.
    async fn settle(
        &self,
        request: &CommitRequest,
        sale_id: &str,
        sale_number: &str,
        price_lines: &[PriceLine],
        breakdown: &PriceBreakdown,
        consumptions: &[BatchConsumption],
    ) -> EngineResult<SaleResult> {
        let items = build_sale_items(request, sale_id, price_lines, breakdown, consumptions);

        // A redemption can cover the whole sale; there is nothing left for
        // the gateway to collect, so the sale settles immediately.
        if request.payment_method.is_immediate() || breakdown.final_amount.is_zero() {
            self.settle_immediate(request, sale_id, sale_number, breakdown, items)
                .await
        } else {
            self.settle_deferred(request, sale_id, sale_number, breakdown, items)
                .await
        }
    }

    async fn settle_immediate(
        &self,
        request: &CommitRequest,
        sale_id: &str,
        sale_number: &str,
        breakdown: &PriceBreakdown,
        items: Vec<SaleItem>,
    ) -> EngineResult<SaleResult> {
        let sale = build_sale(request, sale_id, sale_number, breakdown, PaymentStatus::Paid);

        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;
        SaleRepository::insert_in(&mut *tx, &sale).await?;
        for item in &items {
            SaleRepository::insert_item_in(&mut *tx, item).await?;
        }
        if let Some(customer_id) = &request.customer_id {
            LoyaltyRepository::redeem_in(&mut *tx, customer_id, breakdown.points_redeemed).await?;
            let earned = accrual_points(breakdown.subtotal, self.config.accrual_points_per_unit);
            LoyaltyRepository::accrue_in(&mut *tx, customer_id, earned).await?;
        }
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale_id,
            sale_number = %sale_number,
            final_amount = %breakdown.final_amount,
            method = ?request.payment_method,
            "Sale committed (paid)"
        );

        Ok(build_result(&sale, items, None))
    }

    async fn settle_deferred(
        &self,
        request: &CommitRequest,
        sale_id: &str,
        sale_number: &str,
        breakdown: &PriceBreakdown,
        items: Vec<SaleItem>,
    ) -> EngineResult<SaleResult> {
        let phone_number = request
            .phone_number
            .clone()
            .ok_or(CoreError::Validation(ValidationError::Required {
                field: "phoneNumber".to_string(),
            }))?;

        // The network call holds no database locks; allocation is already
        // durable and gets released by the caller if this errors.
        let ack = self
            .gateway
            .initiate_stk_push(&phone_number, breakdown.final_amount, sale_number)
            .await?;

        let state = match apply(PaymentState::Initiated, PaymentEvent::GatewayAccepted) {
            Transition::To(next) => next,
            Transition::NoOp => PaymentState::Initiated,
        };

        let now = Utc::now();
        let transaction = PaymentTransaction {
            id: Uuid::new_v4().to_string(),
            transaction_ref: format!("TXN-{}", Uuid::new_v4().simple()),
            checkout_request_id: ack.checkout_request_id,
            merchant_request_id: ack.merchant_request_id,
            sale_id: sale_id.to_string(),
            amount_cents: breakdown.final_amount.cents(),
            phone_number,
            state,
            created_at: now,
            updated_at: now,
        };

        let sale = build_sale(request, sale_id, sale_number, breakdown, PaymentStatus::Pending);

        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;
        SaleRepository::insert_in(&mut *tx, &sale).await?;
        for item in &items {
            SaleRepository::insert_item_in(&mut *tx, item).await?;
        }
        PaymentRepository::insert_in(&mut *tx, &transaction).await?;
        // Points leave the balance now; the confirmation callback accrues,
        // a failure or expiry refunds.
        if let Some(customer_id) = &request.customer_id {
            LoyaltyRepository::redeem_in(&mut *tx, customer_id, breakdown.points_redeemed).await?;
        }
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale_id,
            sale_number = %sale_number,
            checkout_request_id = %transaction.checkout_request_id,
            final_amount = %breakdown.final_amount,
            "Sale committed (awaiting mobile-money confirmation)"
        );

        Ok(build_result(&sale, items, Some(&transaction)))
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Points earned on a sale: per whole currency unit of the pre-redemption
/// subtotal.
pub(crate) fn accrual_points(subtotal: Money, points_per_unit: i64) -> i64 {
    (subtotal.cents() / 100) * points_per_unit
}

fn build_sale(
    request: &CommitRequest,
    sale_id: &str,
    sale_number: &str,
    breakdown: &PriceBreakdown,
    status: PaymentStatus,
) -> Sale {
    let now = Utc::now();
    Sale {
        id: sale_id.to_string(),
        sale_number: sale_number.to_string(),
        location_id: request.location_id.clone(),
        customer_id: request.customer_id.clone(),
        subtotal_cents: breakdown.subtotal.cents(),
        discount_cents: breakdown.discount.cents(),
        tax_cents: breakdown.tax.cents(),
        redemption_cents: breakdown.redemption.cents(),
        points_redeemed: breakdown.points_redeemed,
        final_amount_cents: breakdown.final_amount.cents(),
        payment_method: request.payment_method,
        payment_status: status,
        notes: request.notes.clone(),
        created_at: now,
        updated_at: now,
    }
}

fn build_sale_items(
    request: &CommitRequest,
    sale_id: &str,
    price_lines: &[PriceLine],
    breakdown: &PriceBreakdown,
    consumptions: &[BatchConsumption],
) -> Vec<SaleItem> {
    let unit_costs = unit_costs_per_line(&request.cart_items, consumptions);

    request
        .cart_items
        .iter()
        .enumerate()
        .map(|(i, line)| SaleItem {
            id: generate_sale_item_id(),
            sale_id: sale_id.to_string(),
            product_id: line.product_id.clone(),
            variant_id: line.variant_id.clone(),
            quantity: line.quantity,
            unit_price_cents: price_lines[i].unit_price().cents(),
            unit_cost_cents: unit_costs[i],
            total_cents: breakdown.line_totals[i].cents(),
        })
        .collect()
}

/// Weighted unit cost per line from the allocation's consumption records.
///
/// `allocate` records draws line by line in cart order and each line's draws
/// sum exactly to its quantity, so a cursor walk attributes them without
/// ambiguity. With stock tracking off there are no records and every cost
/// is zero.
fn unit_costs_per_line(lines: &[CartLine], consumptions: &[BatchConsumption]) -> Vec<i64> {
    let mut costs = Vec::with_capacity(lines.len());
    let mut draws = consumptions.iter();

    for line in lines {
        let mut remaining = line.quantity;
        let mut cost_total = 0i64;
        while remaining > 0 {
            match draws.next() {
                Some(draw) => {
                    cost_total += draw.quantity * draw.unit_cost_cents;
                    remaining -= draw.quantity;
                }
                None => break,
            }
        }
        let unit = if line.quantity > 0 && cost_total > 0 {
            (cost_total + line.quantity / 2) / line.quantity
        } else {
            0
        };
        costs.push(unit);
    }

    costs
}

fn build_result(
    sale: &Sale,
    items: Vec<SaleItem>,
    transaction: Option<&PaymentTransaction>,
) -> SaleResult {
    SaleResult {
        id: sale.id.clone(),
        sale_number: sale.sale_number.clone(),
        payment_method: sale.payment_method,
        payment_status: sale.payment_status,
        subtotal_cents: sale.subtotal_cents,
        discount_cents: sale.discount_cents,
        tax_cents: sale.tax_cents,
        redemption_cents: sale.redemption_cents,
        points_redeemed: sale.points_redeemed,
        final_amount_cents: sale.final_amount_cents,
        items: items
            .into_iter()
            .map(|item| SaleResultItem {
                product_id: item.product_id,
                variant_id: item.variant_id,
                quantity: item.quantity,
                unit_price_cents: item.unit_price_cents,
                unit_cost_cents: item.unit_cost_cents,
                total_cents: item.total_cents,
            })
            .collect(),
        customer_id: sale.customer_id.clone(),
        checkout_request_id: transaction.map(|t| t.checkout_request_id.clone()),
        transaction_ref: transaction.map(|t| t.transaction_ref.clone()),
        created_at: sale.created_at.to_rfc3339(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockGateway;
    use chrono::Duration;
    use duka_core::{PaymentMethod, StockBatch};
    use duka_db::repository::catalog::Product;
    use duka_db::DbConfig;

    fn config() -> EngineConfig {
        EngineConfig::default().with_tax_rate_bps(800)
    }

    async fn seeded_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.catalog()
            .insert_product(&Product {
                id: "p1".to_string(),
                name: "Blue Paint 1L".to_string(),
                price_cents: 10000,
                is_active: true,
            })
            .await
            .unwrap();
        db
    }

    async fn seed_batches(db: &Database) {
        for (id, qty, cost, offset) in [("b1", 5i64, 1000i64, 0i64), ("b2", 10, 1200, 60)] {
            db.stock()
                .insert_batch(&StockBatch {
                    id: id.to_string(),
                    product_id: "p1".to_string(),
                    variant_id: None,
                    location_id: "loc-01".to_string(),
                    quantity: qty,
                    reserved_quantity: 0,
                    unit_cost_cents: cost,
                    received_at: Utc::now() + Duration::seconds(offset),
                    expiry_date: None,
                })
                .await
                .unwrap();
        }
    }

    fn request(method: PaymentMethod, quantity: i64) -> CommitRequest {
        CommitRequest {
            location_id: "loc-01".to_string(),
            customer_id: None,
            payment_method: method,
            enable_stock_tracking: true,
            discount_cents: None,
            notes: None,
            phone_number: match method {
                PaymentMethod::MobileMoney => Some("254712345678".to_string()),
                _ => None,
            },
            points_to_redeem: None,
            cart_items: vec![CartLine {
                product_id: "p1".to_string(),
                variant_id: None,
                quantity,
            }],
        }
    }

    fn committer(db: Database, gateway: Arc<MockGateway>) -> SaleCommitter {
        SaleCommitter::new(db, gateway, config())
    }

    /// 3 × 100.00 at 8% tax: subtotal 300.00, tax 24.00, final 324.00.
    #[tokio::test]
    async fn test_cash_sale_commits_paid() {
        let db = seeded_db().await;
        seed_batches(&db).await;
        let committer = committer(db.clone(), Arc::new(MockGateway::accepting()));

        let result = committer
            .commit(request(PaymentMethod::Cash, 3))
            .await
            .unwrap();

        assert_eq!(result.subtotal_cents, 30000);
        assert_eq!(result.tax_cents, 2400);
        assert_eq!(result.final_amount_cents, 32400);
        assert_eq!(result.payment_status, PaymentStatus::Paid);
        assert!(result.checkout_request_id.is_none());

        let sale = db.sales().get_by_id(&result.id).await.unwrap().unwrap();
        assert_eq!(sale.payment_status, PaymentStatus::Paid);
        assert_eq!(db.stock().get_batch("b1").await.unwrap().unwrap().quantity, 2);
    }

    /// 8 units drawn as 5 @ 10.00 + 3 @ 12.00: weighted unit cost 10.75,
    /// frozen onto the item.
    #[tokio::test]
    async fn test_item_carries_weighted_unit_cost() {
        let db = seeded_db().await;
        seed_batches(&db).await;
        let committer = committer(db.clone(), Arc::new(MockGateway::accepting()));

        let result = committer
            .commit(request(PaymentMethod::Cash, 8))
            .await
            .unwrap();

        assert_eq!(result.items.len(), 1);
        // (5*1000 + 3*1200) / 8 = 1075
        assert_eq!(result.items[0].unit_cost_cents, 1075);
    }

    #[tokio::test]
    async fn test_insufficient_stock_persists_nothing() {
        let db = seeded_db().await;
        seed_batches(&db).await;
        let committer = committer(db.clone(), Arc::new(MockGateway::accepting()));

        let err = committer
            .commit(request(PaymentMethod::Cash, 20))
            .await
            .unwrap_err();

        match err {
            crate::EngineError::Core(CoreError::InsufficientStock {
                requested,
                available,
                ..
            }) => {
                assert_eq!(requested, 20);
                assert_eq!(available, 15);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(db.stock().get_batch("b1").await.unwrap().unwrap().quantity, 5);
        assert_eq!(db.stock().get_batch("b2").await.unwrap().unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn test_unknown_product_fails_before_allocation() {
        let db = seeded_db().await;
        let committer = committer(db.clone(), Arc::new(MockGateway::accepting()));

        let mut req = request(PaymentMethod::Cash, 1);
        req.cart_items[0].product_id = "ghost".to_string();

        let err = committer.commit(req).await.unwrap_err();
        assert!(matches!(
            err,
            crate::EngineError::Core(CoreError::ProductNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_point_redemption_is_rejected_not_ignored() {
        let db = seeded_db().await;
        seed_batches(&db).await;
        let committer = committer(db.clone(), Arc::new(MockGateway::accepting()));

        let mut req = request(PaymentMethod::Cash, 3);
        req.customer_id = Some("cust-1".to_string());
        req.points_to_redeem = Some(0);

        let err = committer.commit(req).await.unwrap_err();
        assert!(matches!(
            err,
            crate::EngineError::Core(CoreError::Validation(_))
        ));

        // Rejected before allocation.
        assert_eq!(db.stock().get_batch("b1").await.unwrap().unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn test_mobile_money_persists_pending_sale_and_transaction() {
        let db = seeded_db().await;
        seed_batches(&db).await;
        let gateway = Arc::new(MockGateway::accepting());
        let committer = committer(db.clone(), gateway.clone());

        let result = committer
            .commit(request(PaymentMethod::MobileMoney, 3))
            .await
            .unwrap();

        assert_eq!(result.payment_status, PaymentStatus::Pending);
        let checkout_id = result.checkout_request_id.as_deref().unwrap();
        assert_eq!(gateway.calls(), 1);

        let sale = db.sales().get_by_id(&result.id).await.unwrap().unwrap();
        assert_eq!(sale.payment_status, PaymentStatus::Pending);

        let txn = db
            .payments()
            .get_by_checkout_request_id(checkout_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(txn.state, PaymentState::Pending);
        assert_eq!(txn.amount_cents, result.final_amount_cents);

        // Stock is held while the payment is pending.
        assert_eq!(db.stock().get_batch("b1").await.unwrap().unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_gateway_rejection_releases_stock_and_persists_nothing() {
        let db = seeded_db().await;
        seed_batches(&db).await;
        let committer = committer(db.clone(), Arc::new(MockGateway::rejecting()));

        let err = committer
            .commit(request(PaymentMethod::MobileMoney, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::EngineError::PaymentInitiation(_)));

        // Allocation was rolled back.
        assert_eq!(db.stock().get_batch("b1").await.unwrap().unwrap().quantity, 5);
        assert_eq!(db.stock().get_batch("b2").await.unwrap().unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn test_redemption_clamped_to_balance_and_deducted() {
        let db = seeded_db().await;
        seed_batches(&db).await;
        db.loyalty().create_account("cust-1", 150).await.unwrap();
        let committer = committer(db.clone(), Arc::new(MockGateway::accepting()));

        let mut req = request(PaymentMethod::Cash, 3);
        req.customer_id = Some("cust-1".to_string());
        req.points_to_redeem = Some(500); // balance only covers 150

        let result = committer.commit(req).await.unwrap();

        // 150 points at 100/unit = 1.50 off the payable amount.
        assert_eq!(result.points_redeemed, 150);
        assert_eq!(result.redemption_cents, 150);
        assert_eq!(result.final_amount_cents, 32400 - 150);

        // Balance drained by the redemption, then credited 300 for the
        // 300.00 subtotal.
        assert_eq!(db.loyalty().balance("cust-1").await.unwrap(), 300);
    }

    #[tokio::test]
    async fn test_redemption_covering_everything_skips_the_gateway() {
        let db = seeded_db().await;
        seed_batches(&db).await;
        // More than enough points to cover 324.00.
        db.loyalty().create_account("cust-1", 50000).await.unwrap();
        let gateway = Arc::new(MockGateway::accepting());
        let committer = committer(db.clone(), gateway.clone());

        let mut req = request(PaymentMethod::MobileMoney, 3);
        req.customer_id = Some("cust-1".to_string());
        req.points_to_redeem = Some(50000);

        let result = committer.commit(req).await.unwrap();

        assert_eq!(result.final_amount_cents, 0);
        assert_eq!(result.payment_status, PaymentStatus::Paid);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_stock_tracking_disabled_skips_the_ledger() {
        let db = seeded_db().await;
        // No batches seeded at all.
        let committer = committer(db.clone(), Arc::new(MockGateway::accepting()));

        let mut req = request(PaymentMethod::Cash, 3);
        req.enable_stock_tracking = false;

        let result = committer.commit(req).await.unwrap();
        assert_eq!(result.items[0].unit_cost_cents, 0);
        assert_eq!(result.final_amount_cents, 32400);
    }

    #[test]
    fn test_accrual_is_per_whole_unit() {
        assert_eq!(accrual_points(Money::from_cents(30000), 1), 300);
        assert_eq!(accrual_points(Money::from_cents(30099), 1), 300);
        assert_eq!(accrual_points(Money::from_cents(99), 1), 0);
        assert_eq!(accrual_points(Money::from_cents(30000), 2), 600);
    }
}
