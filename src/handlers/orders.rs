use crate::{
    entities::OrderStatus,
    errors::ServiceError,
    handlers::AppState,
    services::{OrderFilter, TrackingInput},
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/by-number/:order_number", get(get_order_by_number))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/tracking", post(add_tracking))
        .route("/:id/delivered", post(mark_delivered))
}

/// Optional authenticated caller; admin listings pass no identity.
fn user_id_from_headers(headers: &HeaderMap) -> Result<Option<Uuid>, ServiceError> {
    match headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        Some(raw) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|_| ServiceError::ValidationError("Invalid X-User-Id header".to_string())),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_page")]
    page: u64,
    #[serde(default = "default_per_page")]
    per_page: u64,
    status: Option<OrderStatus>,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

/// List orders: the caller's own when authenticated, all otherwise
async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = match user_id_from_headers(&headers)? {
        Some(user_id) => {
            state
                .services
                .order
                .list_for_user(user_id, query.page, query.per_page, query.status)
                .await?
        }
        None => {
            state
                .services
                .order
                .list_all(
                    query.page,
                    query.per_page,
                    OrderFilter {
                        status: query.status,
                        payment_status: None,
                    },
                )
                .await?
        }
    };
    Ok(Json(page))
}

/// Get an order by id
async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let user_id = user_id_from_headers(&headers)?;
    let order = state.services.order.get_order(order_id, user_id).await?;
    Ok(Json(order))
}

/// Get an order by its human-readable number
async fn get_order_by_number(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_number): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let user_id = user_id_from_headers(&headers)?;
    let order = state
        .services
        .order
        .get_order_by_number(&order_number, user_id)
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    reason: Option<String>,
}

/// Cancel a pending or processing order; stock is restored
async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.order.cancel(order_id, payload.reason).await?;
    Ok(Json(order))
}

/// Attach tracking details; advances processing orders to shipped
async fn add_tracking(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<TrackingInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.order.add_tracking(order_id, payload).await?;
    Ok(Json(order))
}

/// Confirm delivery of a shipped order
async fn mark_delivered(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.order.mark_delivered(order_id).await?;
    Ok(Json(order))
}
