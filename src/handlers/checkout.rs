use crate::{
    errors::ServiceError,
    handlers::{cart_owner_from_headers, AppState},
    services::CreateOrderInput,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(create_order))
}

/// Convert the caller's cart into an order
async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateOrderInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let owner = cart_owner_from_headers(&headers)?;
    let order = state.services.checkout.create_order(&owner, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "status": order.status,
            "payment_status": order.payment_status,
            "subtotal": order.subtotal,
            "tax_amount": order.tax_amount,
            "shipping_amount": order.shipping_amount,
            "total_amount": order.total_amount,
            "currency": order.currency,
        })),
    ))
}
