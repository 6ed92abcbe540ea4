pub mod carts;
pub mod checkout;
pub mod orders;
pub mod payments;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    gateway,
    services::{CartOwner, CartService, CheckoutService, OrderService, PaymentService},
};
use axum::{http::HeaderMap, Router};
use std::sync::Arc;
use uuid::Uuid;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub order: Arc<OrderService>,
    pub payment: Arc<PaymentService>,
}

impl AppServices {
    /// Wires the service graph from shared infrastructure.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        let gateway = gateway::from_config(&config.payment);

        let cart = Arc::new(CartService::new(db_pool.clone(), event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            config,
        ));
        let order = Arc::new(OrderService::new(db_pool.clone(), event_sender.clone()));
        let payment = Arc::new(PaymentService::new(db_pool, event_sender, gateway));

        Self {
            cart,
            checkout,
            order,
            payment,
        }
    }
}

/// Assembles the versioned API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1/cart", carts::routes())
        .nest("/api/v1/checkout", checkout::routes())
        .nest("/api/v1/orders", orders::routes())
        .nest("/api/v1/payments", payments::routes())
}

/// Resolves the caller's cart identity from the headers the upstream
/// session layer injects: `X-User-Id` for authenticated requests,
/// `X-Session-Id` for guests.
pub fn cart_owner_from_headers(headers: &HeaderMap) -> Result<CartOwner, ServiceError> {
    if let Some(user_id) = headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        let user_id = Uuid::parse_str(user_id)
            .map_err(|_| ServiceError::ValidationError("Invalid X-User-Id header".to_string()))?;
        return Ok(CartOwner::User(user_id));
    }

    if let Some(session_id) = headers.get("x-session-id").and_then(|v| v.to_str().ok()) {
        if !session_id.is_empty() {
            return Ok(CartOwner::Guest(session_id.to_string()));
        }
    }

    Err(ServiceError::ValidationError(
        "Either X-User-Id or X-Session-Id is required".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn owner_prefers_user_over_session() {
        let user_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-user-id",
            HeaderValue::from_str(&user_id.to_string()).unwrap(),
        );
        headers.insert("x-session-id", HeaderValue::from_static("sess_1"));

        assert_eq!(
            cart_owner_from_headers(&headers).unwrap(),
            CartOwner::User(user_id)
        );
    }

    #[test]
    fn owner_falls_back_to_session() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", HeaderValue::from_static("sess_1"));

        assert_eq!(
            cart_owner_from_headers(&headers).unwrap(),
            CartOwner::Guest("sess_1".to_string())
        );
    }

    #[test]
    fn owner_requires_an_identity() {
        let headers = HeaderMap::new();
        assert!(matches!(
            cart_owner_from_headers(&headers),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn owner_rejects_malformed_user_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(
            cart_owner_from_headers(&headers),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
