use crate::{
    config::AppConfig,
    entities::{
        order, order_item, CartItem, FulfillmentStatus, OrderModel, OrderStatus, PaymentState,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts::{CartOwner, CartService},
        inventory::StockLedger,
        pricing::{self, PricedLine},
    },
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Postal address captured at checkout and frozen onto the order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
    #[validate(length(min = 1, message = "Address line is required"))]
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    pub province: Option<String>,
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 2, message = "Country code must be 2 characters"))]
    pub country_code: String,
    pub phone: Option<String>,
}

/// Customer identity snapshot supplied by the session layer (authenticated
/// checkout) or by the customer directly (guest checkout).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CustomerInfo {
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

/// Input for converting a cart into an order.
#[derive(Debug, Deserialize)]
pub struct CreateOrderInput {
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub customer_info: Option<CustomerInfo>,
    pub customer_notes: Option<String>,
}

/// Checkout engine: converts a mutable cart into an immutable order.
///
/// The whole conversion is a single transaction: stock re-validation,
/// order + item inserts, conditional stock decrements, and the cart clear
/// all commit together or not at all. Two concurrent checkouts contending
/// for a product's last unit are decided by the stock ledger's guarded
/// decrement; the loser's transaction rolls back completely, leaving its
/// cart intact.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Creates an order from the identity's cart.
    #[instrument(skip(self, input))]
    pub async fn create_order(
        &self,
        owner: &CartOwner,
        input: CreateOrderInput,
    ) -> Result<OrderModel, ServiceError> {
        input.shipping_address.validate()?;
        if let Some(billing) = &input.billing_address {
            billing.validate()?;
        }

        let customer = self.resolve_customer(owner, input.customer_info)?;

        let txn = self.db.begin().await?;

        // Load the cart inside the transaction so the items we validate
        // are the items we convert.
        let cart = match owner {
            CartOwner::User(user_id) => {
                crate::entities::Cart::find()
                    .filter(crate::entities::cart::Column::UserId.eq(*user_id))
                    .one(&txn)
                    .await?
            }
            CartOwner::Guest(session_id) => {
                crate::entities::Cart::find()
                    .filter(crate::entities::cart::Column::SessionId.eq(session_id.clone()))
                    .one(&txn)
                    .await?
            }
        }
        .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let items = CartItem::find()
            .filter(crate::entities::cart_item::Column::CartId.eq(cart.id))
            .all(&txn)
            .await?;

        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        // Re-validate every line against live stock; snapshot the products
        // while we hold them. Any violation aborts the whole checkout.
        let mut validated = Vec::with_capacity(items.len());
        for item in &items {
            let product =
                StockLedger::check_availability(&txn, item.product_id, item.quantity).await?;
            validated.push((item, product));
        }

        let totals = pricing::totals(
            items
                .iter()
                .map(|item| PricedLine::new(item.unit_price, item.quantity)),
            &self.config.pricing,
        );

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let billing_address = input
            .billing_address
            .as_ref()
            .or(Some(&input.shipping_address));

        let order_row = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order::generate_order_number(now)),
            user_id: Set(match owner {
                CartOwner::User(user_id) => Some(*user_id),
                CartOwner::Guest(_) => None,
            }),
            customer_email: Set(customer.email.clone()),
            customer_first_name: Set(customer.first_name.clone()),
            customer_last_name: Set(customer.last_name.clone()),
            customer_phone: Set(customer.phone.clone()),
            subtotal: Set(totals.subtotal),
            tax_amount: Set(totals.tax),
            shipping_amount: Set(totals.shipping),
            total_amount: Set(totals.total),
            currency: Set(self.config.pricing.currency.clone()),
            shipping_address: Set(serde_json::to_value(&input.shipping_address)?),
            billing_address: Set(billing_address.map(serde_json::to_value).transpose()?),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentState::Pending),
            fulfillment_status: Set(FulfillmentStatus::Unfulfilled),
            shipping_method: Set(None),
            tracking_number: Set(None),
            tracking_url: Set(None),
            customer_notes: Set(input.customer_notes),
            internal_notes: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            paid_at: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            cancelled_at: Set(None),
        };
        let order_model = order_row.insert(&txn).await?;

        let mut low_stock = Vec::new();
        for (item, product) in &validated {
            let order_item_row = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                product_sku: Set(product.sku.clone()),
                product_image: Set(product.image_url.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total_price: Set(item.line_total()),
                created_at: Set(now),
            };
            order_item_row.insert(&txn).await?;

            // Guarded decrement: should always succeed after validation,
            // but decides the race between validation and this write.
            StockLedger::decrement(&txn, product.id, item.quantity).await?;

            let remaining = product.stock_quantity - item.quantity;
            if remaining <= product.low_stock_threshold {
                low_stock.push((product.id, remaining));
            }
        }

        CartService::clear_in_txn(&txn, cart.id).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;
        for (item, product) in &validated {
            self.event_sender
                .send_or_log(Event::StockDecremented {
                    product_id: product.id,
                    quantity: item.quantity,
                })
                .await;
        }
        for (product_id, remaining) in low_stock {
            self.event_sender
                .send_or_log(Event::LowStock {
                    product_id,
                    remaining,
                })
                .await;
        }

        info!(
            %order_id,
            order_number = %order_model.order_number,
            total = %order_model.total_amount,
            "order created from cart"
        );
        Ok(order_model)
    }

    /// Guest checkout requires a valid email; authenticated checkout gets
    /// the snapshot from the session layer that owns the user record.
    fn resolve_customer(
        &self,
        owner: &CartOwner,
        customer_info: Option<CustomerInfo>,
    ) -> Result<CustomerInfo, ServiceError> {
        let info = match customer_info {
            Some(info) => info,
            None => {
                return Err(match owner {
                    CartOwner::Guest(_) => ServiceError::MissingCustomerInfo,
                    CartOwner::User(_) => ServiceError::ValidationError(
                        "Customer snapshot is required".to_string(),
                    ),
                })
            }
        };

        if info.email.trim().is_empty() {
            return Err(ServiceError::MissingCustomerInfo);
        }
        info.validate()?;
        Ok(info)
    }
}
