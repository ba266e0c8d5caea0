//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration as StdDuration;

use api::AppState;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Duration;
use domain::{
    Clock, MailQueue, PasswordHasher, RecordingEmailSender, RetryPolicy, SystemClock, TokenIssuer,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: Router,
    state: Arc<AppState<InMemoryStore>>,
    mail: RecordingEmailSender,
}

fn setup() -> TestApp {
    let mail = RecordingEmailSender::new();
    let (queue, _worker) = MailQueue::start_with_policy(
        Arc::new(mail.clone()),
        RetryPolicy {
            max_attempts: 3,
            base_delay: StdDuration::from_millis(1),
        },
    );
    let state = api::create_state(
        InMemoryStore::new(),
        TokenIssuer::new(b"test-secret", Duration::minutes(5), Duration::days(1)),
        PasswordHasher::with_cost(256, 1),
        queue,
        Arc::new(SystemClock) as Arc<dyn Clock>,
    );
    let app = api::create_app(state.clone(), get_metrics_handle());
    TestApp { app, state, mail }
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn register(app: &Router, email: &str) -> Value {
    let (status, body) = call(
        app,
        "POST",
        "/accounts/",
        None,
        Some(json!({
            "email": email,
            "password": "abcdefg1!",
            "first_name": "Test",
            "last_name": "User",
            "phone_number": "555-0100"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"].clone()
}

async fn login(app: &Router, email: &str, password: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/api/token/",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["access"].as_str().unwrap().to_string()
}

async fn user_token(t: &TestApp, email: &str) -> String {
    register(&t.app, email).await;
    login(&t.app, email, "abcdefg1!").await
}

async fn admin_token(t: &TestApp) -> String {
    t.state
        .accounts
        .ensure_superuser("admin@example.com", "admin-pass1!")
        .await
        .unwrap();
    login(&t.app, "admin@example.com", "admin-pass1!").await
}

async fn create_product(app: &Router, admin: &str, name: &str, price: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/products/",
        Some(admin),
        Some(json!({
            "name": name,
            "price": price,
            "description": format!("{name} description"),
            "count": 10
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

async fn place_order(app: &Router, token: &str, product: &str, quantity: u32) -> Value {
    let (status, body) = call(
        app,
        "POST",
        "/orders/",
        Some(token),
        Some(json!({ "order_items": [{ "product": product, "quantity": quantity }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

#[tokio::test]
async fn test_health_check() {
    let t = setup();

    let (status, body) = call(&t.app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_register_login_and_refresh() {
    let t = setup();

    let account = register(&t.app, "alice@example.com").await;
    assert_eq!(account["email"], "alice@example.com");
    assert!(account.get("password").is_none());
    assert!(account.get("password_hash").is_none());

    let (status, pair) = call(
        &t.app,
        "POST",
        "/api/token/",
        None,
        Some(json!({ "email": "alice@example.com", "password": "abcdefg1!" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access = pair["access"].as_str().unwrap();
    let refresh = pair["refresh"].as_str().unwrap();

    let (status, accounts) = call(&t.app, "GET", "/accounts/", Some(access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accounts.as_array().unwrap().len(), 1);

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/token/refresh/",
        None,
        Some(json!({ "refresh": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let renewed = body["access"].as_str().unwrap();
    let (status, _) = call(&t.app, "GET", "/accounts/", Some(renewed), None).await;
    assert_eq!(status, StatusCode::OK);

    // An access token is not a refresh token.
    let (status, _) = call(
        &t.app,
        "POST",
        "/api/token/refresh/",
        None,
        Some(json!({ "refresh": access })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let sent = t.mail.wait_for(1, StdDuration::from_secs(2)).await;
    assert_eq!(sent[0].subject, "Welcome to Online shop");
}

#[tokio::test]
async fn test_registration_validation() {
    let t = setup();
    register(&t.app, "alice@example.com").await;

    let (status, body) = call(
        &t.app,
        "POST",
        "/accounts/",
        None,
        Some(json!({
            "email": "bob@example.com",
            "password": "abcdefg1",
            "first_name": "Bob",
            "last_name": "Builder",
            "phone_number": "555-0101"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "password");

    let (status, body) = call(
        &t.app,
        "POST",
        "/accounts/",
        None,
        Some(json!({
            "email": "alice@example.com",
            "password": "abcdefg1!",
            "first_name": "Alice",
            "last_name": "Again",
            "phone_number": "555-0102"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "email");
}

#[tokio::test]
async fn test_authentication_failures() {
    let t = setup();
    register(&t.app, "alice@example.com").await;

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/token/",
        None,
        Some(json!({ "email": "alice@example.com", "password": "wrong-pass1!" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "No active account found with the given credentials");

    let (status, _) = call(&t.app, "GET", "/carts/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&t.app, "GET", "/carts/", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_account_detail_is_owner_only() {
    let t = setup();
    let alice = register(&t.app, "alice@example.com").await;
    let alice_token = login(&t.app, "alice@example.com", "abcdefg1!").await;
    let bob_token = user_token(&t, "bob@example.com").await;
    let alice_uri = format!("/accounts/{}/", alice["id"].as_str().unwrap());

    let (status, _) = call(&t.app, "GET", &alice_uri, Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &t.app,
        "PATCH",
        &alice_uri,
        Some(&alice_token),
        Some(json!({ "first_name": "Alicia" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["first_name"], "Alicia");

    let (status, body) = call(
        &t.app,
        "PUT",
        &alice_uri,
        Some(&alice_token),
        Some(json!({ "first_name": "Alicia" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "email");

    let (status, _) = call(&t.app, "DELETE", &alice_uri, Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_cart_total_follows_every_change() {
    let t = setup();
    let admin = admin_token(&t).await;
    let user = user_token(&t, "alice@example.com").await;
    let lamp = create_product(&t.app, &admin, "Lamp", "19.99").await;

    let (status, cart) = call(&t.app, "GET", "/carts/mine/", Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["total_price"], "0.00");
    let cart_id = cart["id"].as_str().unwrap().to_string();

    let (status, cart) = call(
        &t.app,
        "POST",
        &format!("/carts/{cart_id}/items/"),
        Some(&user),
        Some(json!({ "product_id": lamp, "quantity": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(cart["total_price"], "59.97");
    assert_eq!(cart["product_count"], 1);
    let item_id = cart["items"][0]["id"].as_str().unwrap().to_string();
    let item_uri = format!("/carts/{cart_id}/items/{item_id}/");

    let (status, cart) = call(
        &t.app,
        "PATCH",
        &item_uri,
        Some(&user),
        Some(json!({ "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["total_price"], "19.99");

    let (status, _) = call(
        &t.app,
        "PATCH",
        &item_uri,
        Some(&user),
        Some(json!({ "quantity": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, cart) = call(&t.app, "DELETE", &item_uri, Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["total_price"], "0.00");
    assert_eq!(cart["product_count"], 0);
}

#[tokio::test]
async fn test_price_change_reprices_cart() {
    let t = setup();
    let admin = admin_token(&t).await;
    let user = user_token(&t, "alice@example.com").await;
    let lamp = create_product(&t.app, &admin, "Lamp", "10.00").await;

    let (_, cart) = call(&t.app, "GET", "/carts/mine/", Some(&user), None).await;
    let cart_uri = format!("/carts/{}/", cart["id"].as_str().unwrap());
    call(
        &t.app,
        "POST",
        &format!("{cart_uri}items/"),
        Some(&user),
        Some(json!({ "product_id": lamp, "quantity": 2 })),
    )
    .await;

    let (status, _) = call(
        &t.app,
        "PATCH",
        &format!("/products/{lamp}/"),
        Some(&admin),
        Some(json!({ "price": "12.50" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, cart) = call(&t.app, "GET", &cart_uri, Some(&user), None).await;
    assert_eq!(cart["total_price"], "25.00");
}

#[tokio::test]
async fn test_second_cart_is_rejected() {
    let t = setup();
    let user = user_token(&t, "alice@example.com").await;

    let (status, _) = call(&t.app, "POST", "/carts/", Some(&user), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(&t.app, "POST", "/carts/", Some(&user), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "user");
}

#[tokio::test]
async fn test_product_price_round_trips() {
    let t = setup();
    let admin = admin_token(&t).await;
    let user = user_token(&t, "alice@example.com").await;
    let id = create_product(&t.app, &admin, "Kettle", "99.99").await;

    let (status, product) = call(&t.app, "GET", &format!("/products/{id}/"), Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(product["price"], "99.99");

    let (status, body) = call(
        &t.app,
        "POST",
        "/products/",
        Some(&admin),
        Some(json!({ "name": "Cup", "price": "1.999", "description": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "price");
}

#[tokio::test]
async fn test_catalog_writes_need_admin() {
    let t = setup();
    let user = user_token(&t, "alice@example.com").await;

    let (status, _) = call(
        &t.app,
        "POST",
        "/products/",
        Some(&user),
        Some(json!({ "name": "Lamp", "price": "1.00", "description": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &t.app,
        "POST",
        "/category/",
        Some(&user),
        Some(json!({ "name": "Lighting" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&t.app, "GET", "/products/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_product_filters_and_pagination() {
    let t = setup();
    let admin = admin_token(&t).await;
    let user = user_token(&t, "alice@example.com").await;
    let lamp = create_product(&t.app, &admin, "Desk Lamp", "25.00").await;
    create_product(&t.app, &admin, "Chair", "80.00").await;
    create_product(&t.app, &admin, "Floor Lamp", "120.00").await;

    let (status, body) = call(&t.app, "POST", "/category/", Some(&admin), Some(json!({ "name": "Lighting" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let category = body["id"].as_str().unwrap().to_string();
    let (status, _) = call(
        &t.app,
        "POST",
        "/product-categories/",
        Some(&admin),
        Some(json!({ "product": lamp, "category": category })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, page) = call(&t.app, "GET", "/products/?name=lamp", Some(&user), None).await;
    assert_eq!(page["count"], 2);

    let (_, page) = call(&t.app, "GET", "/products/?price__gt=30&price__lt=100", Some(&user), None).await;
    assert_eq!(page["count"], 1);
    assert_eq!(page["results"][0]["name"], "Chair");

    let (_, page) = call(&t.app, "GET", "/products/?category_name=light", Some(&user), None).await;
    assert_eq!(page["count"], 1);
    assert_eq!(page["results"][0]["category_names"][0]["name"], "Lighting");

    let (_, page) = call(&t.app, "GET", "/products/?page=2&page_size=2", Some(&user), None).await;
    assert_eq!(page["count"], 3);
    assert_eq!(page["page"], 2);
    assert_eq!(page["results"].as_array().unwrap().len(), 1);

    let (status, _) = call(&t.app, "GET", "/products/?price__gt=cheap", Some(&user), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_pages_are_rejected_not_overflowed() {
    let t = setup();
    let admin = admin_token(&t).await;
    let user = user_token(&t, "alice@example.com").await;
    create_product(&t.app, &admin, "Lamp", "10.00").await;

    for path in ["/orders/", "/products/", "/category/", "/product-categories/"] {
        let uri = format!("{path}?page=18446744073709551615");
        let (status, body) = call(&t.app, "GET", &uri, Some(&user), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
        assert_eq!(body["field"], "page", "{path}");

        let uri = format!("{path}?page=500");
        let (status, body) = call(&t.app, "GET", &uri, Some(&user), None).await;
        assert_eq!(status, StatusCode::OK, "{path}");
        assert_eq!(body["results"].as_array().unwrap().len(), 0, "{path}");
    }
}

#[tokio::test]
async fn test_sub_cent_price_filters_are_rejected() {
    let t = setup();
    let admin = admin_token(&t).await;
    let user = user_token(&t, "alice@example.com").await;
    create_product(&t.app, &admin, "Lamp", "10.00").await;

    let (status, body) = call(&t.app, "GET", "/products/?price=10.005", Some(&user), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "price");

    let (_, page) = call(&t.app, "GET", "/products/?price=10.00", Some(&user), None).await;
    assert_eq!(page["count"], 1);
}

#[tokio::test]
async fn test_orders_are_private_to_their_owner() {
    let t = setup();
    let admin = admin_token(&t).await;
    let alice = user_token(&t, "alice@example.com").await;
    let bob = user_token(&t, "bob@example.com").await;
    let lamp = create_product(&t.app, &admin, "Lamp", "10.00").await;

    let order = place_order(&t.app, &alice, &lamp, 2).await;
    assert_eq!(order["status"], "pending");
    assert_eq!(order["total_amount"], "20.00");
    assert_eq!(order["user_email"], "alice@example.com");
    let order_uri = format!("/orders/{}/", order["id"].as_str().unwrap());

    let (status, _) = call(&t.app, "GET", &order_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, page) = call(&t.app, "GET", "/orders/", Some(&bob), None).await;
    assert_eq!(page["count"], 0);

    let (status, _) = call(&t.app, "GET", &order_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, page) = call(&t.app, "GET", "/orders/", Some(&admin), None).await;
    assert_eq!(page["count"], 1);
}

#[tokio::test]
async fn test_order_with_missing_product_writes_nothing() {
    let t = setup();
    let admin = admin_token(&t).await;
    let user = user_token(&t, "alice@example.com").await;
    let lamp = create_product(&t.app, &admin, "Lamp", "10.00").await;

    let (status, _) = call(
        &t.app,
        "POST",
        "/orders/",
        Some(&user),
        Some(json!({ "order_items": [
            { "product": lamp, "quantity": 1 },
            { "product": uuid::Uuid::new_v4(), "quantity": 1 }
        ] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &t.app,
        "POST",
        "/orders/",
        Some(&user),
        Some(json!({ "order_items": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "order_items");

    let (_, page) = call(&t.app, "GET", "/orders/", Some(&user), None).await;
    assert_eq!(page["count"], 0);
}

#[tokio::test]
async fn test_order_status_filter_and_transitions() {
    let t = setup();
    let admin = admin_token(&t).await;
    let user = user_token(&t, "alice@example.com").await;
    let lamp = create_product(&t.app, &admin, "Lamp", "10.00").await;

    let first = place_order(&t.app, &user, &lamp, 1).await;
    place_order(&t.app, &user, &lamp, 2).await;
    let first_uri = format!("/orders/{}/", first["id"].as_str().unwrap());

    let (status, order) = call(
        &t.app,
        "PATCH",
        &first_uri,
        Some(&user),
        Some(json!({ "status": "Processing" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "processing");

    let (status, body) = call(
        &t.app,
        "PATCH",
        &first_uri,
        Some(&user),
        Some(json!({ "status": "pending" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "status");

    let (_, page) = call(&t.app, "GET", "/orders/?status=PROCESSING", Some(&user), None).await;
    assert_eq!(page["count"], 1);

    let (_, page) = call(&t.app, "GET", "/orders/?created_at_after=2000-01-01&page_size=1", Some(&user), None).await;
    assert_eq!(page["count"], 2);
    assert_eq!(page["results"].as_array().unwrap().len(), 1);

    let (_, page) = call(&t.app, "GET", "/orders/?created_at_before=2000-01-01", Some(&user), None).await;
    assert_eq!(page["count"], 0);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let t = setup();
    register(&t.app, "alice@example.com").await;

    let (status, body) = call(
        &t.app,
        "POST",
        "/send-reset-code/",
        None,
        Some(json!({ "email": "nobody@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "There is no active user with this email");

    let (status, body) = call(
        &t.app,
        "POST",
        "/send-reset-code/",
        None,
        Some(json!({ "email": "alice@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Code has been sent to your email");

    let sent = t.mail.wait_for(2, StdDuration::from_secs(2)).await;
    let code = sent
        .iter()
        .find_map(|email| email.message.strip_prefix("Your new code is: "))
        .unwrap()
        .to_string();

    let reset = json!({
        "email": "alice@example.com",
        "code": code,
        "new_password": "n3w-pass!"
    });
    let (status, _) = call(&t.app, "POST", "/reset-password/", None, Some(reset.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&t.app, "POST", "/reset-password/", None, Some(reset)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "code");
    assert_eq!(body["error"], "Invalid code");

    login(&t.app, "alice@example.com", "n3w-pass!").await;
}
