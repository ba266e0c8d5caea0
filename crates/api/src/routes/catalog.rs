//! Product, category and product-category endpoints.
//!
//! Reads need an authenticated caller, writes need an admin.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{CategoryId, Decimal, Money, ProductCategoryId, ProductId};
use domain::{ProductDraft, ProductUpdate};
use serde::{Deserialize, Serialize};
use store::{Category, Product, ProductCategory, ProductQuery, Store};

use crate::AppState;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::pagination::{PageParams, Paginated};
use crate::routes::{parse_id, required};

// -- Request types --

#[derive(Deserialize)]
pub struct ProductRequest {
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub category_ids: Vec<CategoryId>,
}

#[derive(Deserialize, Default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub description: Option<String>,
    pub count: Option<u32>,
    pub category_ids: Option<Vec<CategoryId>>,
}

/// Product listing filters, named as clients send them.
#[derive(Deserialize, Default)]
pub struct ProductFilter {
    pub price: Option<String>,
    #[serde(rename = "price__gt")]
    pub price_gt: Option<String>,
    #[serde(rename = "price__lt")]
    pub price_lt: Option<String>,
    pub name: Option<String>,
    pub category_name: Option<String>,
    pub category: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl ProductFilter {
    fn to_query(&self) -> Result<ProductQuery, ApiError> {
        let mut query = ProductQuery::new();
        if let Some(ref raw) = self.price {
            query = query.price(parse_amount("price", raw)?);
        }
        if let Some(ref raw) = self.price_gt {
            query = query.price_gt(parse_amount("price__gt", raw)?);
        }
        if let Some(ref raw) = self.price_lt {
            query = query.price_lt(parse_amount("price__lt", raw)?);
        }
        if let Some(ref name) = self.name {
            query = query.name_contains(name);
        }
        if let Some(ref name) = self.category_name {
            query = query.category_name_contains(name);
        }
        if let Some(ref raw) = self.category {
            let category_id = raw
                .parse()
                .map_err(|_| ApiError::bad_field("category", "Enter a valid category id."))?;
            query = query.category(category_id);
        }
        Ok(query)
    }
}

/// Parses a price filter. Amounts finer than a cent are rejected, not rounded.
fn parse_amount(field: &'static str, raw: &str) -> Result<Money, ApiError> {
    let amount = raw
        .trim()
        .parse::<Decimal>()
        .map_err(|_| ApiError::bad_field(field, "Enter a number."))?;
    if amount.normalize().scale() > Money::SCALE {
        return Err(ApiError::bad_field(
            field,
            "Ensure that there are no more than 2 decimal places.",
        ));
    }
    Ok(Money::new(amount))
}

#[derive(Deserialize)]
pub struct CategoryRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct LinkRequest {
    pub product: ProductId,
    pub category: CategoryId,
}

// -- Response types --

#[derive(Serialize)]
pub struct CategoryResponse {
    pub id: CategoryId,
    pub name: String,
}

impl From<Category> for CategoryResponse {
    fn from(category: Category) -> Self {
        Self {
            id: category.id,
            name: category.name,
        }
    }
}

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub description: String,
    pub count: u32,
    pub category_names: Vec<CategoryResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            name: product.name,
            price: product.price,
            description: product.description,
            count: product.count,
            category_names: product
                .categories
                .into_iter()
                .map(CategoryResponse::from)
                .collect(),
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct LinkResponse {
    pub id: ProductCategoryId,
    pub product: ProductId,
    pub category: CategoryResponse,
}

impl From<ProductCategory> for LinkResponse {
    fn from(link: ProductCategory) -> Self {
        Self {
            id: link.id,
            product: link.product_id,
            category: link.category.into(),
        }
    }
}

// -- Product handlers --

/// GET /products/ — filtered, paginated catalog.
#[tracing::instrument(skip_all)]
pub async fn list_products<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Query(filter): Query<ProductFilter>,
) -> Result<Json<Paginated<ProductResponse>>, ApiError> {
    let window = PageParams {
        page: filter.page,
        page_size: filter.page_size,
    }
    .resolve()?;
    let query = filter
        .to_query()?
        .limit(window.limit())
        .offset(window.offset());

    let page = state.catalog.list_products(&actor, &query).await?;
    Ok(Json(window.wrap(page, ProductResponse::from)))
}

/// POST /products/
#[tracing::instrument(skip_all, fields(name = %req.name))]
pub async fn create_product<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Json(req): Json<ProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    let product = state
        .catalog
        .create_product(
            &actor,
            ProductDraft {
                name: req.name,
                price: req.price,
                description: req.description,
                count: req.count,
                category_ids: req.category_ids,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(product.into())))
}

/// GET /products/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn get_product<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product = state.catalog.get_product(&actor, parse_id(&id)?).await?;
    Ok(Json(product.into()))
}

/// PUT /products/{id}/ — name, price and description are required.
#[tracing::instrument(skip_all, fields(%id))]
pub async fn replace_product<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(patch): Json<ProductPatch>,
) -> Result<Json<ProductResponse>, ApiError> {
    let update = ProductUpdate {
        name: Some(required("name", patch.name)?),
        price: Some(required("price", patch.price)?),
        description: Some(required("description", patch.description)?),
        count: patch.count,
        category_ids: patch.category_ids,
    };
    let product = state
        .catalog
        .update_product(&actor, parse_id(&id)?, update)
        .await?;
    Ok(Json(product.into()))
}

/// PATCH /products/{id}/ — a price change re-prices carts holding the product.
#[tracing::instrument(skip_all, fields(%id))]
pub async fn patch_product<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(patch): Json<ProductPatch>,
) -> Result<Json<ProductResponse>, ApiError> {
    let update = ProductUpdate {
        name: patch.name,
        price: patch.price,
        description: patch.description,
        count: patch.count,
        category_ids: patch.category_ids,
    };
    let product = state
        .catalog
        .update_product(&actor, parse_id(&id)?, update)
        .await?;
    Ok(Json(product.into()))
}

/// DELETE /products/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn delete_product<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.catalog.delete_product(&actor, parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Category handlers --

/// GET /category/
#[tracing::instrument(skip_all)]
pub async fn list_categories<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<CategoryResponse>>, ApiError> {
    let window = params.resolve()?;
    let categories = state.catalog.list_categories(&actor).await?;
    Ok(Json(window.slice(categories, CategoryResponse::from)))
}

/// POST /category/
#[tracing::instrument(skip_all, fields(name = %req.name))]
pub async fn create_category<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Json(req): Json<CategoryRequest>,
) -> Result<(StatusCode, Json<CategoryResponse>), ApiError> {
    let category = state.catalog.create_category(&actor, &req.name).await?;
    Ok((StatusCode::CREATED, Json(category.into())))
}

/// GET /category/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn get_category<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<CategoryResponse>, ApiError> {
    let category = state.catalog.get_category(&actor, parse_id(&id)?).await?;
    Ok(Json(category.into()))
}

/// PUT or PATCH /category/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn rename_category<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    Json(req): Json<CategoryRequest>,
) -> Result<Json<CategoryResponse>, ApiError> {
    let category = state
        .catalog
        .rename_category(&actor, parse_id(&id)?, &req.name)
        .await?;
    Ok(Json(category.into()))
}

/// DELETE /category/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn delete_category<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.catalog.delete_category(&actor, parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Product-category handlers --

/// GET /product-categories/
#[tracing::instrument(skip_all)]
pub async fn list_links<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<LinkResponse>>, ApiError> {
    let window = params.resolve()?;
    let links = state.catalog.list_links(&actor).await?;
    Ok(Json(window.slice(links, LinkResponse::from)))
}

/// POST /product-categories/
#[tracing::instrument(skip_all)]
pub async fn create_link<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Json(req): Json<LinkRequest>,
) -> Result<(StatusCode, Json<LinkResponse>), ApiError> {
    let link = state
        .catalog
        .link(&actor, req.product, req.category)
        .await?;
    Ok((StatusCode::CREATED, Json(link.into())))
}

/// GET /product-categories/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn get_link<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<Json<LinkResponse>, ApiError> {
    let link = state.catalog.get_link(&actor, parse_id(&id)?).await?;
    Ok(Json(link.into()))
}

/// DELETE /product-categories/{id}/
#[tracing::instrument(skip_all, fields(%id))]
pub async fn delete_link<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.catalog.unlink(&actor, parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_filters_keep_exact_cents() {
        assert_eq!(parse_amount("price", " 10.5 ").unwrap().to_string(), "10.50");
        assert_eq!(parse_amount("price", "10.000").unwrap().to_string(), "10.00");
    }

    #[test]
    fn sub_cent_price_filters_are_rejected() {
        for (field, raw) in [("price", "10.005"), ("price__gt", "9.995")] {
            assert!(matches!(
                parse_amount(field, raw),
                Err(ApiError::BadRequest { field: Some(f), .. }) if f == field
            ));
        }
    }

    #[test]
    fn filter_builds_a_query_from_every_field() {
        let filter = ProductFilter {
            price_gt: Some("9.99".to_string()),
            price_lt: Some("100".to_string()),
            name: Some("lamp".to_string()),
            ..Default::default()
        };
        let query = filter.to_query().unwrap();
        assert_eq!(query.price_gt.map(|m| m.to_string()), Some("9.99".to_string()));
        assert_eq!(query.price_lt.map(|m| m.to_string()), Some("100.00".to_string()));
        assert_eq!(query.name_contains.as_deref(), Some("lamp"));
    }
}
