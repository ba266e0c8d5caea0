//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use common::{Money, OrderId, OrderItemId, OrderStatus, ProductId, UserId};
use serde::{Deserialize, Serialize};
use store::{NewOrderLine, OrderDetail, OrderLine, OrderQuery, Store};

use crate::AppState;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::pagination::{PageParams, Paginated};
use crate::routes::parse_id;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub order_items: Vec<OrderItemRequest>,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product: ProductId,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct UpdateOrderRequest {
    pub status: String,
}

/// `?status=&created_at_after=&created_at_before=` plus paging.
///
/// Dates are `YYYY-MM-DD` and both bounds include the whole day.
#[derive(Deserialize, Default)]
pub struct OrderFilter {
    pub status: Option<String>,
    pub created_at_after: Option<String>,
    pub created_at_before: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl OrderFilter {
    fn to_query(&self) -> Result<OrderQuery, ApiError> {
        let mut query = OrderQuery::new();
        if let Some(ref raw) = self.status {
            query = query.status(parse_status(raw)?);
        }
        if let Some(ref raw) = self.created_at_after {
            query = query.created_from(start_of_day("created_at_after", raw, 0)?);
        }
        if let Some(ref raw) = self.created_at_before {
            query = query.created_before(start_of_day("created_at_before", raw, 1)?);
        }
        Ok(query)
    }
}

fn parse_status(raw: &str) -> Result<OrderStatus, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_field(
            "status",
            format!("Select a valid choice. {raw} is not one of the available choices."),
        )
    })
}

/// Midnight UTC of the given date plus `days_after` days.
fn start_of_day(
    field: &'static str,
    raw: &str,
    days_after: u64,
) -> Result<DateTime<Utc>, ApiError> {
    let invalid = || ApiError::bad_field(field, "Enter a valid date.");
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|date| date.checked_add_days(chrono::Days::new(days_after)))
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(invalid)
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub id: OrderItemId,
    pub product: ProductId,
    pub product_name: String,
    pub quantity: u32,
    /// Current product price.
    pub product_price: Money,
    /// Product price when the order was placed.
    pub unit_price: Money,
    pub total_price: Money,
}

impl From<OrderLine> for OrderItemResponse {
    fn from(line: OrderLine) -> Self {
        Self {
            id: line.item.id,
            product: line.product.id,
            total_price: Money::new(line.product.price.multiply(line.item.quantity)),
            product_name: line.product.name,
            quantity: line.item.quantity,
            product_price: line.product.price,
            unit_price: line.item.unit_price,
        }
    }
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub user: UserId,
    pub user_email: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItemResponse>,
    pub total_amount: Money,
    pub total_at_order_time: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderDetail> for OrderResponse {
    fn from(detail: OrderDetail) -> Self {
        let total_amount = detail.total_amount();
        let total_at_order_time = detail.total_at_order_time();
        Self {
            id: detail.order.id,
            user: detail.order.user_id,
            user_email: detail.user_email,
            status: detail.order.status,
            items: detail
                .lines
                .into_iter()
                .map(OrderItemResponse::from)
                .collect(),
            total_amount,
            total_at_order_time,
            created_at: detail.order.created_at,
            updated_at: detail.order.updated_at,
        }
    }
}

// -- Handlers --

/// POST /orders/ — place an order; all lines are written or none are.
#[tracing::instrument(skip_all, fields(lines = req.order_items.len()))]
pub async fn create<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let lines = req
        .order_items
        .into_iter()
        .map(|item| NewOrderLine {
            product_id: item.product,
            quantity: item.quantity,
        })
        .collect();
    let order = state.orders.create(&actor, lines).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders/ — filtered, paginated orders visible to the caller.
#[tracing::instrument(skip_all)]
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<Paginated<OrderResponse>>, ApiError> {
    let window = PageParams {
        page: filter.page,
        page_size: filter.page_size,
    }
    .resolve()?;
    let query = filter
        .to_query()?
        .limit(window.limit())
        .offset(window.offset());

    let page = state.orders.list(&actor, query).await?;
    Ok(Json(window.wrap(page, OrderResponse::from)))
}

/// GET /orders/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.orders.get(&actor, parse_id(&id)?).await?;
    Ok(Json(order.into()))
}

/// PATCH /orders/{id}/ — move the order to a new status.
#[tracing::instrument(skip_all, fields(%id, status = %req.status))]
pub async fn update_status<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<UpdateOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id(&id)?;
    let status = parse_status(&req.status)?;
    let order = state.orders.set_status(&actor, order_id, status).await?;
    Ok(Json(order.into()))
}

/// DELETE /orders/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn delete<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orders.delete(&actor, parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
