use std::sync::Arc;

use chrono::{Duration, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    Actor, CartService, Clock, LogEmailSender, MailQueue, ManualClock, OrderService,
    PasswordHasher, ResetCodeAuthority, TokenIssuer,
};
use store::{AccountStore, CatalogStore, InMemoryStore, NewOrderLine, NewProduct, NewUser, User};

async fn seed_user(store: &InMemoryStore, email: &str) -> User {
    store
        .create_user(NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: "Bench".to_string(),
            last_name: "User".to_string(),
            phone_number: "555-0100".to_string(),
            is_staff: false,
            is_superuser: false,
        })
        .await
        .unwrap()
}

async fn seed_products(store: &InMemoryStore, count: usize) -> Vec<NewOrderLine> {
    let mut lines = Vec::with_capacity(count);
    for i in 0..count {
        let product = store
            .create_product(NewProduct {
                name: format!("Widget {i}"),
                price: common::Money::from_cents(250 + i as i64),
                description: "bench".to_string(),
                count: 100,
                category_ids: vec![],
            })
            .await
            .unwrap();
        lines.push(NewOrderLine {
            product_id: product.id,
            quantity: (i % 3 + 1) as u32,
        });
    }
    lines
}

fn bench_create_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let (actor, lines) = rt.block_on(async {
        let user = seed_user(&store, "bench@example.com").await;
        (Actor::User(user), seed_products(&store, 10).await)
    });
    let service = OrderService::new(store);

    c.bench_function("orders/create_ten_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                service.create(&actor, lines.clone()).await.unwrap();
            });
        });
    });
}

fn bench_cart_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("cart/add_update_remove", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let actor = Actor::User(seed_user(&store, "bench@example.com").await);
                let lines = seed_products(&store, 3).await;
                let service = CartService::new(store);

                let cart = service.get_or_create_mine(&actor).await.unwrap();
                let cart_id = cart.cart.id;
                for line in &lines {
                    service
                        .add_item(&actor, cart_id, line.product_id, line.quantity)
                        .await
                        .unwrap();
                }
                let cart = service.get(&actor, cart_id).await.unwrap();
                let first = cart.lines[0].item.id;
                service.update_item(&actor, cart_id, first, 5).await.unwrap();
                service.remove_item(&actor, cart_id, first).await.unwrap();
            });
        });
    });
}

fn bench_reset_code_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    rt.block_on(seed_user(&store, "bench@example.com"));
    let (mail, _worker) = rt.block_on(async { MailQueue::start(Arc::new(LogEmailSender)) });
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let authority = ResetCodeAuthority::new(
        store,
        clock.clone() as Arc<dyn Clock>,
        PasswordHasher::with_cost(256, 1),
        mail,
    );

    c.bench_function("reset/issue_and_consume", |b| {
        b.iter(|| {
            rt.block_on(async {
                let record = authority.issue("bench@example.com").await.unwrap();
                authority
                    .consume("bench@example.com", &record.code, "abcdefg1!")
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_tokens(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let user = rt.block_on(seed_user(&store, "bench@example.com"));
    let issuer = TokenIssuer::new(b"bench-secret", Duration::minutes(5), Duration::days(1));

    c.bench_function("tokens/issue_and_verify", |b| {
        b.iter(|| {
            let pair = issuer.issue_pair(&user).unwrap();
            issuer.verify_access(&pair.access).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_create_order,
    bench_cart_cycle,
    bench_reset_code_cycle,
    bench_tokens
);
criterion_main!(benches);
