#![allow(dead_code)]

use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use sha2::Sha256;
use std::sync::Arc;
use storefront_api::{
    config::{AppConfig, GatewayCredentials, PaymentProvider},
    db,
    entities::{payment, product, GatewayKind, PaymentStatus},
    events::{self, EventSender},
    gateway::RazorpayGateway,
    services::{
        AddItemInput, CartOwner, CartService, CheckoutService, CreateOrderInput, CustomerInfo,
        OrderService, PaymentService,
    },
};
use tempfile::TempDir;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "test_webhook_secret";
pub const KEY_SECRET: &str = "test_key_secret";

type HmacSha256 = Hmac<Sha256>;

/// Test harness backed by a throwaway sqlite database with the full
/// service graph wired against a regional-processor gateway whose
/// secrets the tests know.
pub struct TestApp {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub cart: CartService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
    pub payments: PaymentService,
    _event_task: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let db_path = tmp.path().join("storefront_test.db");
        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.payment.provider = PaymentProvider::Razorpay;
        cfg.payment.razorpay = GatewayCredentials {
            key_id: "rzp_test_key".to_string(),
            key_secret: KEY_SECRET.to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            // Never dialled by these tests; wiremock-backed tests override it.
            api_base: Some("http://127.0.0.1:9".to_string()),
        };

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool).await.expect("migrations");

        let db = Arc::new(pool);
        let config = Arc::new(cfg);
        let (event_sender, rx) = events::channel(256);
        let event_sender = Arc::new(event_sender);
        let event_task = tokio::spawn(events::process_events(rx));

        let gateway = storefront_api::gateway::from_config(&config.payment);
        let cart = CartService::new(db.clone(), event_sender.clone());
        let checkout = CheckoutService::new(db.clone(), event_sender.clone(), config.clone());
        let orders = OrderService::new(db.clone(), event_sender.clone());
        let payments = PaymentService::new(db.clone(), event_sender.clone(), gateway);

        Self {
            db,
            config,
            event_sender,
            cart,
            checkout,
            orders,
            payments,
            _event_task: event_task,
            _tmp: tmp,
        }
    }

    /// Same harness, but the payment gateway points at the given API base
    /// (a wiremock server).
    pub async fn with_gateway_base(api_base: &str) -> Self {
        let mut app = Self::new().await;
        let mut cfg = (*app.config).clone();
        cfg.payment.razorpay.api_base = Some(api_base.to_string());
        let config = Arc::new(cfg);
        let gateway = Arc::new(RazorpayGateway::new(
            config.payment.razorpay.clone(),
            config.payment.request_timeout_secs,
        ));
        app.payments = PaymentService::new(app.db.clone(), app.event_sender.clone(), gateway);
        app.config = config;
        app
    }

    /// Seeds a product and returns its id.
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> Uuid {
        self.seed_product_full(name, price, stock, true).await
    }

    pub async fn seed_product_full(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        is_active: bool,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let row = product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            slug: Set(format!("{}-{}", name.to_lowercase().replace(' ', "-"), id)),
            sku: Set(Some(format!("SKU-{}", &id.to_string()[..8]))),
            description: Set(None),
            price: Set(price),
            stock_quantity: Set(stock),
            low_stock_threshold: Set(2),
            image_url: Set(None),
            is_active: Set(is_active),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        row.insert(&*self.db).await.expect("seed product");
        id
    }

    /// Reads a product's current stock.
    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        use sea_orm::EntityTrait;
        storefront_api::entities::Product::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("query product")
            .expect("product exists")
            .stock_quantity
    }

    /// Sets a product's stock directly (admin-style external change).
    pub async fn set_stock(&self, product_id: Uuid, stock: i32) {
        use sea_orm::EntityTrait;
        let current = storefront_api::entities::Product::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("query product")
            .expect("product exists");
        let mut active: product::ActiveModel = current.into();
        active.stock_quantity = Set(stock);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await.expect("set stock");
    }

    pub async fn add_to_cart(&self, owner: &CartOwner, product_id: Uuid, quantity: i32) {
        self.cart
            .add_item(
                owner,
                AddItemInput {
                    product_id,
                    quantity,
                },
            )
            .await
            .expect("add to cart");
    }

    /// Runs a guest checkout with a valid address and customer info.
    pub async fn checkout_guest(
        &self,
        owner: &CartOwner,
    ) -> Result<storefront_api::entities::OrderModel, storefront_api::errors::ServiceError> {
        self.checkout
            .create_order(owner, default_order_input())
            .await
    }

    /// Inserts a pending payment row, as `create_remote_payment` would.
    pub async fn insert_payment(&self, order_id: Uuid, intent_id: &str, amount: Decimal) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = payment::ActiveModel {
            id: Set(id),
            order_id: Set(order_id),
            gateway: Set(GatewayKind::Razorpay),
            gateway_intent_id: Set(intent_id.to_string()),
            gateway_charge_id: Set(None),
            amount: Set(amount),
            currency: Set("USD".to_string()),
            status: Set(PaymentStatus::Pending),
            payment_method: Set(None),
            card_brand: Set(None),
            card_last4: Set(None),
            error_message: Set(None),
            metadata: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            succeeded_at: Set(None),
            failed_at: Set(None),
        };
        row.insert(&*self.db).await.expect("insert payment");
        id
    }

    /// Signs a webhook body the way the regional processor does.
    pub fn sign_webhook(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Signs a synchronous callback proof (`order_id|payment_id`).
    pub fn sign_callback(&self, external_order_id: &str, external_payment_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(KEY_SECRET.as_bytes()).unwrap();
        mac.update(external_order_id.as_bytes());
        mac.update(b"|");
        mac.update(external_payment_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Webhook body for a captured payment.
pub fn captured_payload(intent_id: &str, payment_id: &str) -> Vec<u8> {
    serde_json::json!({
        "event": "payment.captured",
        "payload": {"payment": {"entity": {
            "id": payment_id,
            "order_id": intent_id,
            "method": "card",
            "card": {"network": "Visa", "last4": "4242"},
        }}}
    })
    .to_string()
    .into_bytes()
}

/// Webhook body for a failed payment.
pub fn failed_payload(intent_id: &str) -> Vec<u8> {
    serde_json::json!({
        "event": "payment.failed",
        "payload": {"payment": {"entity": {
            "id": "pay_failed",
            "order_id": intent_id,
            "error_description": "card declined",
        }}}
    })
    .to_string()
    .into_bytes()
}

/// Webhook body for a created refund.
pub fn refund_payload(payment_id: &str) -> Vec<u8> {
    serde_json::json!({
        "event": "refund.created",
        "payload": {"refund": {"entity": {
            "id": "rfnd_1",
            "payment_id": payment_id,
        }}}
    })
    .to_string()
    .into_bytes()
}

/// A complete, valid checkout input for a guest.
pub fn default_order_input() -> CreateOrderInput {
    CreateOrderInput {
        shipping_address: storefront_api::services::Address {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            address_line_1: "12 Analytical Way".to_string(),
            address_line_2: None,
            city: "London".to_string(),
            province: None,
            postal_code: "EC1A 1AA".to_string(),
            country_code: "GB".to_string(),
            phone: None,
        },
        billing_address: None,
        customer_info: Some(CustomerInfo {
            email: "ada@example.com".to_string(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            phone: None,
        }),
        customer_notes: None,
    }
}
