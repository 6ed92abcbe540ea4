use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard error payload returned by every handler.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    pub error: String,
    /// Machine-readable error kind (e.g., "insufficient_stock")
    pub kind: String,
    /// Human-readable error description
    pub message: String,
    /// Additional structured details, when the error carries them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Closed error taxonomy for the checkout/payment core.
///
/// Every public service operation returns one of these variants; callers can
/// match exhaustively instead of parsing strings. Internal failures
/// (database, serialization) are mapped to generic client messages by
/// [`ServiceError::response_message`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Customer email is required for guest checkout")]
    MissingCustomerInfo,

    #[error("Product {name} is not available")]
    ProductUnavailable { product_id: Uuid, name: String },

    #[error("Insufficient stock for {name}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: Uuid,
        name: String,
        available: i32,
        requested: i32,
    },

    #[error("Invalid transition from '{from}' on '{event}'")]
    InvalidTransition { from: String, event: String },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Gateway error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),

    #[error("Concurrent stock update lost for product {product_id}")]
    ConcurrencyConflict { product_id: Uuid },

    #[error("Payment {payment_id} is {status} and cannot be refunded")]
    NotRefundable { payment_id: Uuid, status: String },

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    pub fn insufficient_stock(
        product_id: Uuid,
        name: impl Into<String>,
        available: i32,
        requested: i32,
    ) -> Self {
        ServiceError::InsufficientStock {
            product_id,
            name: name.into(),
            available,
            requested,
        }
    }

    /// Machine-readable kind attached to the HTTP payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::EmptyCart => "empty_cart",
            Self::MissingCustomerInfo => "missing_customer_info",
            Self::ProductUnavailable { .. } => "product_unavailable",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidSignature => "invalid_signature",
            Self::Gateway(_) => "gateway_error",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::NotRefundable { .. } => "not_refundable",
            Self::InternalError(_) => "internal_error",
            Self::SerializationError(_) => "serialization_error",
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::SerializationError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::EmptyCart
            | Self::MissingCustomerInfo
            | Self::ProductUnavailable { .. } => StatusCode::BAD_REQUEST,
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidTransition { .. }
            | Self::ConcurrencyConflict { .. }
            | Self::NotRefundable { .. } => StatusCode::CONFLICT,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::SerializationError(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Structured fields for errors that carry them, surfaced under
    /// `details` so clients do not have to parse the message.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientStock {
                product_id,
                name,
                available,
                requested,
            } => Some(serde_json::json!({
                "product_id": product_id,
                "name": name,
                "available": available,
                "requested": requested,
            })),
            Self::InvalidTransition { from, event } => Some(serde_json::json!({
                "from": from,
                "event": event,
            })),
            Self::ConcurrencyConflict { product_id } => Some(serde_json::json!({
                "product_id": product_id,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            kind: self.kind().to_string(),
            message: self.response_message(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// Convenience alias used at the binary edge.
pub type AppError = ServiceError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::EmptyCart.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::InvalidSignature.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::insufficient_stock(Uuid::new_v4(), "Sourdough Loaf", 1, 2).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InvalidTransition {
                from: "delivered".into(),
                event: "cancel".into()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::ConcurrencyConflict {
                product_id: Uuid::new_v4()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("secret connection string".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::DatabaseError(sea_orm::DbErr::Custom("pg dsn".into()))
                .response_message(),
            "Database error"
        );

        // User-facing errors keep the actual message.
        assert_eq!(
            ServiceError::NotFound("Order not found".into()).response_message(),
            "Not found: Order not found"
        );
    }

    #[test]
    fn insufficient_stock_carries_structured_fields() {
        let product_id = Uuid::new_v4();
        let err = ServiceError::insufficient_stock(product_id, "Rye Loaf", 1, 3);
        let details = err.details().expect("details");
        assert_eq!(details["available"], 1);
        assert_eq!(details["requested"], 3);
        assert_eq!(details["product_id"], serde_json::json!(product_id));
        assert_eq!(err.kind(), "insufficient_stock");
    }
}
