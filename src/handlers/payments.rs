use crate::{
    errors::ServiceError,
    handlers::AppState,
    services::{ConfirmPaymentInput, CreatePaymentInput},
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_payment))
        .route("/confirm", post(confirm_payment))
        .route("/webhook", post(payment_webhook))
        .route("/:id", get(get_payment))
        .route("/:id/refund", post(create_refund))
        .route("/order/:order_id", get(list_for_order))
}

/// Create the processor-side payment object for an order
async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let created = state.services.payment.create_remote_payment(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Verify a client callback proof and settle the payment synchronously
async fn confirm_payment(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmPaymentInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let confirmed = state.services.payment.confirm_payment(payload).await?;
    Ok(Json(confirmed))
}

/// Inbound processor webhook; the body must stay raw for signature
/// verification.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get("stripe-signature")
        .or_else(|| headers.get("x-razorpay-signature"))
        .and_then(|v| v.to_str().ok())
        .ok_or(ServiceError::InvalidSignature)?;

    let outcome = state
        .services
        .payment
        .handle_webhook(&body, signature)
        .await?;
    Ok(Json(outcome))
}

/// Get a payment by id
async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let payment = state.services.payment.get_payment(payment_id).await?;
    Ok(Json(payment))
}

#[derive(Debug, Deserialize)]
struct RefundRequest {
    amount: Option<Decimal>,
}

/// Refund a succeeded payment (full refund when no amount given)
async fn create_refund(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<RefundRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let payment = state
        .services
        .payment
        .create_refund(payment_id, payload.amount)
        .await?;
    Ok(Json(payment))
}

/// List an order's payment attempts
async fn list_for_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let payments = state.services.payment.list_for_order(order_id).await?;
    Ok(Json(payments))
}
