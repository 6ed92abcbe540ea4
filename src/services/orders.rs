use crate::{
    entities::{
        order, FulfillmentStatus, Order, OrderItem, OrderItemModel, OrderModel, OrderStatus,
        PaymentState,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::inventory::StockLedger,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Order with its line items.
#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Paginated order listing.
#[derive(Debug, Serialize)]
pub struct OrderPage {
    pub orders: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Filters for the admin listing.
#[derive(Debug, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentState>,
}

/// Tracking details attached when an order ships.
#[derive(Debug, Deserialize)]
pub struct TrackingInput {
    pub tracking_number: String,
    pub tracking_url: Option<String>,
    pub shipping_method: Option<String>,
}

/// Order queries and the order state machine.
///
/// Orders are created by the checkout engine and never physically deleted;
/// after creation only the status axes, lifecycle timestamps, tracking
/// fields, and the append-only internal notes change, and every transition
/// goes through here. Transitions are strictly sequential per order: an
/// event arriving for a state that cannot accept it is rejected with
/// `InvalidTransition`, never reordered.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Fetches an order by id. When `user_id` is given, orders belonging
    /// to someone else are reported as absent rather than forbidden.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|order| user_id.is_none() || order.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order.find_related(OrderItem).all(&*self.db).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Fetches an order by its human-readable number.
    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
        user_id: Option<Uuid>,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .filter(|order| user_id.is_none() || order.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;

        let items = order.find_related(OrderItem).all(&*self.db).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Lists a user's orders, newest first, optionally filtered by status.
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
        status: Option<OrderStatus>,
    ) -> Result<OrderPage, ServiceError> {
        let mut query = Order::find().filter(order::Column::UserId.eq(user_id));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(OrderPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Lists all orders (admin), newest first, with optional filters.
    #[instrument(skip(self))]
    pub async fn list_all(
        &self,
        page: u64,
        per_page: u64,
        filter: OrderFilter,
    ) -> Result<OrderPage, ServiceError> {
        let mut query = Order::find();
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(payment_status) = filter.payment_status {
            query = query.filter(order::Column::PaymentStatus.eq(payment_status));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(OrderPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Marks an order paid and moves it to `processing`.
    ///
    /// Status-guarded conditional update: only a `pending`/`pending`
    /// order is touched, so replaying the same payment success (duplicate
    /// webhook delivery, webhook racing the synchronous confirm path) is
    /// a no-op. Returns whether the transition was applied.
    pub(crate) async fn apply_payment_success<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = Order::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Processing.to_value()),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentState::Paid.to_value()),
            )
            .col_expr(order::Column::PaidAt, Expr::value(paid_at))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::PaymentStatus.eq(PaymentState::Pending))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Marks the payment axis failed without touching the lifecycle axis.
    pub(crate) async fn apply_payment_failure<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let result = Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentState::Failed.to_value()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentState::Pending))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Moves a non-terminal order to `refunded` on both axes.
    pub(crate) async fn apply_refund<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let result = Order::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Refunded.to_value()),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentState::Refunded.to_value()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in([
                OrderStatus::Pending,
                OrderStatus::Processing,
                OrderStatus::Shipped,
            ]))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Attaches tracking details and advances `processing` to `shipped`.
    #[instrument(skip(self, input), fields(tracking_number = %input.tracking_number))]
    pub async fn add_tracking(
        &self,
        order_id: Uuid,
        input: TrackingInput,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Self::get_for_update(&txn, order_id).await?;
        if order.status != OrderStatus::Processing {
            return Err(ServiceError::InvalidTransition {
                from: order.status.to_string(),
                event: "tracking added".to_string(),
            });
        }

        let old_status = order.status;
        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Shipped);
        active.fulfillment_status = Set(FulfillmentStatus::Fulfilled);
        active.tracking_number = Set(Some(input.tracking_number));
        active.tracking_url = Set(input.tracking_url);
        if input.shipping_method.is_some() {
            active.shipping_method = Set(input.shipping_method);
        }
        active.shipped_at = Set(Some(now));
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.notify_status_change(order_id, old_status, OrderStatus::Shipped)
            .await;
        Ok(updated)
    }

    /// Confirms delivery of a shipped order.
    #[instrument(skip(self))]
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Self::get_for_update(&txn, order_id).await?;
        if order.status != OrderStatus::Shipped {
            return Err(ServiceError::InvalidTransition {
                from: order.status.to_string(),
                event: "delivery confirmed".to_string(),
            });
        }

        let old_status = order.status;
        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Delivered);
        active.delivered_at = Set(Some(now));
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.notify_status_change(order_id, old_status, OrderStatus::Delivered)
            .await;
        Ok(updated)
    }

    /// Cancels a pending or processing order and restores its stock.
    ///
    /// The status change and every stock restoration commit together; an
    /// order can never be observed `cancelled` with stock un-restored, and
    /// a second cancel is rejected before touching stock again.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Self::get_for_update(&txn, order_id).await?;
        if !order.status.can_cancel() {
            return Err(ServiceError::InvalidTransition {
                from: order.status.to_string(),
                event: "cancel".to_string(),
            });
        }

        let items = order.find_related(OrderItem).all(&txn).await?;
        for item in &items {
            StockLedger::restore(&txn, item.product_id, item.quantity).await?;
        }

        let old_status = order.status;
        let now = Utc::now();
        let note = match &reason {
            Some(reason) => format!("Order cancelled: {}", reason),
            None => "Order cancelled".to_string(),
        };
        let notes = append_note(order.internal_notes.clone(), now, &note);

        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.fulfillment_status = Set(FulfillmentStatus::Cancelled);
        active.cancelled_at = Set(Some(now));
        active.internal_notes = Set(Some(notes));
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;
        for item in &items {
            self.event_sender
                .send_or_log(Event::StockRestored {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .await;
        }
        self.notify_status_change(order_id, old_status, OrderStatus::Cancelled)
            .await;

        info!(%order_id, "order cancelled, stock restored");
        Ok(updated)
    }

    /// Appends a line to the order's internal audit notes.
    #[instrument(skip(self, note))]
    pub async fn add_internal_note(
        &self,
        order_id: Uuid,
        note: &str,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Self::get_for_update(&txn, order_id).await?;
        let now = Utc::now();
        let notes = append_note(order.internal_notes.clone(), now, note);

        let mut active: order::ActiveModel = order.into();
        active.internal_notes = Set(Some(notes));
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        txn.commit().await?;
        Ok(updated)
    }

    async fn get_for_update<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        Order::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn notify_status_change(
        &self,
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    ) {
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;
    }
}

/// Appends `[timestamp] note` to the existing notes blob.
fn append_note(existing: Option<String>, at: DateTime<Utc>, note: &str) -> String {
    let stamp = at.format("%Y-%m-%d %H:%M:%S");
    match existing {
        Some(existing) if !existing.is_empty() => format!("{existing}\n[{stamp}] {note}"),
        _ => format!("[{stamp}] {note}"),
    }
}
