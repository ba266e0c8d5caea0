//! Cart and cart line endpoints. Every response carries the ledger total.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{CartId, CartItemId, Money, ProductId, UserId};
use serde::{Deserialize, Serialize};
use store::{CartDetail, CartLine, Store};

use crate::AppState;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::routes::catalog::ProductResponse;
use crate::routes::parse_id;

// -- Request types --

#[derive(Deserialize, Default)]
pub struct CreateCartRequest {
    /// Owner of the new cart; defaults to the caller. Staff only for others.
    #[serde(default)]
    pub user: Option<UserId>,
}

#[derive(Deserialize)]
pub struct UpdateCartRequest {
    pub is_ordered: bool,
}

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartItemResponse {
    pub id: CartItemId,
    pub product: ProductResponse,
    pub quantity: u32,
}

impl From<CartLine> for CartItemResponse {
    fn from(line: CartLine) -> Self {
        Self {
            id: line.item.id,
            product: line.product.into(),
            quantity: line.item.quantity,
        }
    }
}

#[derive(Serialize)]
pub struct CartResponse {
    pub id: CartId,
    pub user: UserId,
    pub items: Vec<CartItemResponse>,
    pub total_price: Money,
    pub is_ordered: bool,
    pub product_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CartDetail> for CartResponse {
    fn from(detail: CartDetail) -> Self {
        let product_count = detail.product_count();
        let cart = detail.cart;
        Self {
            id: cart.id,
            user: cart.user_id,
            items: detail.lines.into_iter().map(CartItemResponse::from).collect(),
            total_price: cart.total_price,
            is_ordered: cart.is_ordered,
            product_count,
            created_at: cart.created_at,
            updated_at: cart.updated_at,
        }
    }
}

// -- Handlers --

/// GET /carts/ — every cart for staff, otherwise the caller's.
#[tracing::instrument(skip_all)]
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
) -> Result<Json<Vec<CartResponse>>, ApiError> {
    let carts = state.carts.list(&actor).await?;
    Ok(Json(carts.into_iter().map(CartResponse::from).collect()))
}

/// POST /carts/ — create a cart. A second cart for the same user is a 400.
#[tracing::instrument(skip_all)]
pub async fn create<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Json(req): Json<CreateCartRequest>,
) -> Result<(StatusCode, Json<CartResponse>), ApiError> {
    let cart = state.carts.create(&actor, req.user).await?;
    Ok((StatusCode::CREATED, Json(cart.into())))
}

/// GET /carts/mine/ — the caller's cart, created on first use.
#[tracing::instrument(skip_all)]
pub async fn mine<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.carts.get_or_create_mine(&actor).await?;
    Ok(Json(cart.into()))
}

/// GET /carts/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.carts.get(&actor, parse_id(&id)?).await?;
    Ok(Json(cart.into()))
}

/// PATCH /carts/{id}/ — toggle `is_ordered`.
#[tracing::instrument(skip_all, fields(%id))]
pub async fn update<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<UpdateCartRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state
        .carts
        .set_ordered(&actor, parse_id(&id)?, req.is_ordered)
        .await?;
    Ok(Json(cart.into()))
}

/// DELETE /carts/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn delete<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.carts.delete(&actor, parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /carts/{id}/items/ — add a line and return the re-priced cart.
#[tracing::instrument(skip_all, fields(%id, product_id = %req.product_id))]
pub async fn add_item<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<CartResponse>), ApiError> {
    let cart = state
        .carts
        .add_item(&actor, parse_id(&id)?, req.product_id, req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(cart.into())))
}

/// PATCH /carts/{id}/items/{item_id}/ — change a line's quantity.
#[tracing::instrument(skip_all, fields(%id, %item_id))]
pub async fn update_item<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path((id, item_id)): Path<(String, String)>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state
        .carts
        .update_item(&actor, parse_id(&id)?, parse_id(&item_id)?, req.quantity)
        .await?;
    Ok(Json(cart.into()))
}

/// DELETE /carts/{id}/items/{item_id}/ — remove a line and return the cart.
#[tracing::instrument(skip_all, fields(%id, %item_id))]
pub async fn remove_item<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path((id, item_id)): Path<(String, String)>,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state
        .carts
        .remove_item(&actor, parse_id(&id)?, parse_id(&item_id)?)
        .await?;
    Ok(Json(cart.into()))
}
