use crate::{
    errors::ServiceError,
    handlers::{cart_owner_from_headers, AppState},
    services::AddItemInput,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_item))
        .route("/items/:item_id", put(update_item))
        .route("/items/:item_id", delete(remove_item))
        .route("/clear", post(clear_cart))
        .route("/validate", post(validate_cart))
        .route("/merge", post(merge_carts))
}

/// Get the caller's cart with items
async fn get_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServiceError> {
    let owner = cart_owner_from_headers(&headers)?;
    let cart = state.services.cart.get_or_create(&owner).await?;
    let cart = state
        .services
        .cart
        .get(&owner)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart.id)))?;
    Ok(Json(cart))
}

/// Add an item to the caller's cart
async fn add_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AddItemInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let owner = cart_owner_from_headers(&headers)?;
    let cart = state.services.cart.add_item(&owner, payload).await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

#[derive(Debug, Deserialize)]
struct UpdateQuantityRequest {
    quantity: i32,
}

/// Update a cart item's quantity
async fn update_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .cart
        .update_item(item_id, payload.quantity)
        .await?;
    Ok(Json(cart))
}

/// Remove an item from its cart
async fn remove_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.cart.remove_item(item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Clear the caller's cart
async fn clear_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServiceError> {
    let owner = cart_owner_from_headers(&headers)?;
    if let Some(cart) = state.services.cart.get(&owner).await? {
        state.services.cart.clear(cart.cart.id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Re-validate the caller's cart against current stock
async fn validate_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServiceError> {
    let owner = cart_owner_from_headers(&headers)?;
    let cart = state
        .services
        .cart
        .get(&owner)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

    let issues = state.services.cart.validate(cart.cart.id).await?;
    Ok(Json(serde_json::json!({
        "valid": issues.is_empty(),
        "issues": issues,
    })))
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    session_id: String,
}

/// Fold a guest cart into the authenticated caller's cart (login)
async fn merge_carts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<MergeRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let owner = cart_owner_from_headers(&headers)?;
    let user_id = match owner {
        crate::services::CartOwner::User(user_id) => user_id,
        crate::services::CartOwner::Guest(_) => {
            return Err(ServiceError::ValidationError(
                "Merging requires an authenticated identity".to_string(),
            ))
        }
    };

    let cart = state
        .services
        .cart
        .merge(user_id, &payload.session_id)
        .await?;
    Ok(Json(cart))
}
