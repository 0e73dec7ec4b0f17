//! Order ledger: placement and payment reconciliation.
//!
//! Placement runs entirely inside one database transaction, including the
//! gateway handshake, so a gateway failure rolls back the order, its items
//! and the stock decrement. Reconciliation enforces an exactly-once terminal
//! transition with a conditional update so redelivered webhooks are no-ops.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::order::{
    self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel, OrderStatus,
};
use crate::entities::order_item::{
    self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity, Model as OrderItemModel,
};
use crate::entities::product::{self, Entity as ProductEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::paymob::{BillingData, PaymentGateway};

/// One cart line as submitted by the client. Prices are never accepted from
/// the client; only the product reference and quantity.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CartLine {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// Shipping details captured at checkout. Stored verbatim on the order and
/// reused as the gateway billing block.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShippingDetails {
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 5, message = "A phone number is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PlaceOrderRequest {
    #[validate]
    pub lines: Vec<CartLine>,
    #[validate]
    pub shipping_details: ShippingDetails,
}

/// Result of a successful placement: the ledger id and the token the
/// storefront needs to open the hosted payment page.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub payment_token: String,
}

#[derive(Debug, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// What a webhook delivery did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// This delivery won the transition to the given terminal status.
    Applied(OrderStatus),
    /// The order was already terminal; the delivery changed nothing.
    AlreadyProcessed,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, gateway: Arc<dyn PaymentGateway>, event_sender: EventSender) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    /// Places an order for `user_id`. One transaction covers product lookup,
    /// order and item inserts, the conditional stock decrement, and the
    /// gateway handshake; an error anywhere rolls the whole thing back.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        request: PlaceOrderRequest,
    ) -> Result<PlacedOrder, ServiceError> {
        request.validate()?;
        if request.lines.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }

        // Duplicate product ids collapse into one line so the conditional
        // decrement sees the combined quantity.
        let mut quantities: BTreeMap<Uuid, i32> = BTreeMap::new();
        for line in &request.lines {
            let entry = quantities.entry(line.product_id).or_insert(0);
            *entry = entry.checked_add(line.quantity).ok_or_else(|| {
                ServiceError::ValidationError("Quantity overflows".to_string())
            })?;
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order placement");
            ServiceError::DatabaseError(e)
        })?;

        let product_ids: Vec<Uuid> = quantities.keys().copied().collect();
        let products = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&txn)
            .await?;

        let by_id: BTreeMap<Uuid, &product::Model> =
            products.iter().map(|p| (p.id, p)).collect();

        let mut total_amount = Decimal::ZERO;
        for (&product_id, &quantity) in &quantities {
            let product = by_id
                .get(&product_id)
                .filter(|p| p.is_active)
                .ok_or(ServiceError::ProductNotFound(product_id))?;

            total_amount += product.price * Decimal::from(quantity);
        }

        let shipping_json = serde_json::to_string(&request.shipping_details)
            .map_err(|e| ServiceError::InternalError(format!("shipping serialization: {}", e)))?;

        let order_active = OrderActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            total_amount: Set(total_amount),
            status: Set(OrderStatus::Pending),
            shipping_address: Set(shipping_json),
            payment_transaction_id: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };
        order_active.insert(&txn).await?;

        for (&product_id, &quantity) in &quantities {
            let unit_price = by_id[&product_id].price;
            let item = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product_id),
                quantity: Set(quantity),
                unit_price: Set(unit_price),
                created_at: Set(now),
            };
            item.insert(&txn).await?;

            // Guarded decrement, the only stock check. Zero rows affected
            // means current stock no longer covers this line.
            let result = ProductEntity::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).sub(quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(product_id))
                .filter(product::Column::Stock.gte(quantity))
                .exec(&txn)
                .await?;

            if result.rows_affected == 0 {
                // Re-read inside the transaction so the error reports what
                // is actually left, not a pre-transaction snapshot.
                let available = ProductEntity::find_by_id(product_id)
                    .one(&txn)
                    .await?
                    .map(|p| p.stock)
                    .unwrap_or_default();
                warn!(%product_id, quantity, available, "stock decrement refused");
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    available,
                    requested: quantity,
                });
            }
        }

        // The handshake happens before commit: a gateway error or timeout
        // leaves no order, no items and no stock change behind.
        let billing = BillingData::new(
            Some(&request.shipping_details.first_name),
            Some(&request.shipping_details.last_name),
            Some(&request.shipping_details.email),
            Some(&request.shipping_details.phone),
        );
        let payment_token = self
            .gateway
            .request_payment_token(total_amount, order_id, &billing)
            .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit order placement");
            ServiceError::DatabaseError(e)
        })?;

        info!(%order_id, %total_amount, "order placed");

        self.event_sender
            .send(Event::OrderPlaced {
                order_id,
                user_id,
                total_amount,
            })
            .await;

        Ok(PlacedOrder {
            order_id,
            payment_token,
        })
    }

    /// Applies a verified gateway outcome to the order named by the merchant
    /// order id. The conditional update makes the Pending -> terminal
    /// transition happen exactly once; redeliveries return
    /// [`PaymentOutcome::AlreadyProcessed`].
    #[instrument(skip(self), fields(order_id = %merchant_order_id))]
    pub async fn apply_payment_outcome(
        &self,
        merchant_order_id: Uuid,
        success: bool,
        transaction_id: i64,
    ) -> Result<PaymentOutcome, ServiceError> {
        let target = if success {
            OrderStatus::Paid
        } else {
            OrderStatus::Failed
        };
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for payment outcome");
            ServiceError::DatabaseError(e)
        })?;

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(target))
            .col_expr(
                order::Column::PaymentTransactionId,
                Expr::value(Some(transaction_id)),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(merchant_order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            // Either the order never existed or another delivery already
            // moved it to a terminal state.
            let existing = OrderEntity::find_by_id(merchant_order_id).one(&txn).await?;
            return match existing {
                None => Err(ServiceError::OrderNotFound(merchant_order_id)),
                Some(order) => {
                    info!(status = %order.status, "payment outcome redelivered, no-op");
                    Ok(PaymentOutcome::AlreadyProcessed)
                }
            };
        }

        let mut restored: Vec<(Uuid, i32)> = Vec::new();
        if !success {
            // Failed payment releases the reserved stock in the same
            // transaction that records the failure.
            let items = OrderItemEntity::find()
                .filter(order_item::Column::OrderId.eq(merchant_order_id))
                .all(&txn)
                .await?;

            for item in items {
                ProductEntity::update_many()
                    .col_expr(
                        product::Column::Stock,
                        Expr::col(product::Column::Stock).add(item.quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(now))
                    .filter(product::Column::Id.eq(item.product_id))
                    .exec(&txn)
                    .await?;
                restored.push((item.product_id, item.quantity));
            }
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, %merchant_order_id, "Failed to commit payment outcome");
            ServiceError::DatabaseError(e)
        })?;

        if success {
            info!(transaction_id, "order marked paid");
            self.event_sender
                .send(Event::OrderPaid {
                    order_id: merchant_order_id,
                    transaction_id,
                })
                .await;
        } else {
            warn!(transaction_id, "order marked failed, stock restored");
            self.event_sender
                .send(Event::OrderPaymentFailed {
                    order_id: merchant_order_id,
                    transaction_id,
                })
                .await;
            for (product_id, quantity) in restored {
                self.event_sender
                    .send(Event::StockRestored {
                        order_id: merchant_order_id,
                        product_id,
                        quantity,
                    })
                    .await;
            }
        }

        Ok(PaymentOutcome::Applied(target))
    }

    /// Fetches one order with its items. Callers only ever see their own
    /// orders; anything else reads as not found.
    #[instrument(skip(self), fields(order_id = %order_id, user_id = %user_id))]
    pub async fn get_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        Ok(OrderDetails { order, items })
    }

    /// Lists the caller's orders, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_orders(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let paginator = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }
}
