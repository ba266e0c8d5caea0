//! HTTP API server with observability for the shop backend.
//!
//! Provides REST endpoints for accounts, tokens, password reset, the
//! catalog, carts and orders, with structured logging (tracing) and
//! Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod pagination;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{
    AccountService, CartService, CatalogService, Clock, MailQueue, OrderService, PasswordHasher,
    ResetCodeAuthority, TokenIssuer,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub accounts: AccountService<S>,
    pub catalog: CatalogService<S>,
    pub carts: CartService<S>,
    pub orders: OrderService<S>,
    pub reset: Arc<ResetCodeAuthority<S>>,
    pub tokens: TokenIssuer,
}

/// Wires every service over one store.
pub fn create_state<S: Store>(
    store: S,
    tokens: TokenIssuer,
    hasher: PasswordHasher,
    mail: MailQueue,
    clock: Arc<dyn Clock>,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        accounts: AccountService::new(store.clone(), hasher.clone(), mail.clone()),
        catalog: CatalogService::new(store.clone()),
        carts: CartService::new(store.clone()),
        orders: OrderService::new(store.clone()),
        reset: Arc::new(ResetCodeAuthority::new(store, clock, hasher, mail)),
        tokens,
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    use routes::{accounts, carts, catalog, orders, reset, tokens};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/accounts/", get(accounts::list::<S>).post(accounts::create::<S>))
        .route(
            "/accounts/{id}/",
            get(accounts::get::<S>)
                .put(accounts::replace::<S>)
                .patch(accounts::patch::<S>)
                .delete(accounts::delete::<S>),
        )
        .route("/api/token/", post(tokens::obtain::<S>))
        .route("/api/token/refresh/", post(tokens::refresh::<S>))
        .route("/send-reset-code/", post(reset::send_code::<S>))
        .route("/reset-password/", post(reset::reset_password::<S>))
        .route(
            "/products/",
            get(catalog::list_products::<S>).post(catalog::create_product::<S>),
        )
        .route(
            "/products/{id}/",
            get(catalog::get_product::<S>)
                .put(catalog::replace_product::<S>)
                .patch(catalog::patch_product::<S>)
                .delete(catalog::delete_product::<S>),
        )
        .route(
            "/category/",
            get(catalog::list_categories::<S>).post(catalog::create_category::<S>),
        )
        .route(
            "/category/{id}/",
            get(catalog::get_category::<S>)
                .put(catalog::rename_category::<S>)
                .patch(catalog::rename_category::<S>)
                .delete(catalog::delete_category::<S>),
        )
        .route(
            "/product-categories/",
            get(catalog::list_links::<S>).post(catalog::create_link::<S>),
        )
        .route(
            "/product-categories/{id}/",
            get(catalog::get_link::<S>).delete(catalog::delete_link::<S>),
        )
        .route("/carts/", get(carts::list::<S>).post(carts::create::<S>))
        .route("/carts/mine/", get(carts::mine::<S>))
        .route(
            "/carts/{id}/",
            get(carts::get::<S>)
                .patch(carts::update::<S>)
                .delete(carts::delete::<S>),
        )
        .route("/carts/{id}/items/", post(carts::add_item::<S>))
        .route(
            "/carts/{id}/items/{item_id}/",
            axum::routing::patch(carts::update_item::<S>).delete(carts::remove_item::<S>),
        )
        .route("/orders/", get(orders::list::<S>).post(orders::create::<S>))
        .route(
            "/orders/{id}/",
            get(orders::get::<S>)
                .patch(orders::update_status::<S>)
                .delete(orders::delete::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
