use common::{Money, PricedLine, PricingLedger};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use store::{
    AccountStore, CartMutation, CartStore, CatalogStore, InMemoryStore, NewProduct, NewUser,
};

fn new_user(email: &str) -> NewUser {
    NewUser {
        email: email.to_string(),
        password_hash: "hash".to_string(),
        first_name: "Bench".to_string(),
        last_name: "User".to_string(),
        phone_number: String::new(),
        is_staff: false,
        is_superuser: false,
    }
}

fn new_product(name: &str, cents: i64) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        price: Money::from_cents(cents),
        description: "bench".to_string(),
        count: 100,
        category_ids: vec![],
    }
}

fn bench_ledger_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("pricing/recompute");

    for size in [10, 100, 1000] {
        let lines: Vec<PricedLine> = (0..size)
            .map(|i| PricedLine::new(Money::from_cents(99 + i as i64), (i % 5 + 1) as u32))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &lines, |b, lines| {
            b.iter(|| PricingLedger::recompute(lines.iter().copied()));
        });
    }

    group.finish();
}

fn bench_cart_add_item(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("cart/add_item_to_populated_cart", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let user = store.create_user(new_user("bench@example.com")).await.unwrap();
                let cart = store.create_cart(user.id).await.unwrap();
                let product = store.create_product(new_product("Widget", 1999)).await.unwrap();

                for _ in 0..20 {
                    store
                        .mutate_cart(
                            cart.cart.id,
                            CartMutation::AddItem {
                                product_id: product.id,
                                quantity: 2,
                            },
                        )
                        .await
                        .unwrap();
                }
            });
        });
    });
}

fn bench_price_change_reprices_carts(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("cart/price_change_across_50_carts", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let product = store.create_product(new_product("Widget", 500)).await.unwrap();

                for i in 0..50 {
                    let user = store
                        .create_user(new_user(&format!("user{i}@example.com")))
                        .await
                        .unwrap();
                    let cart = store.create_cart(user.id).await.unwrap();
                    store
                        .mutate_cart(
                            cart.cart.id,
                            CartMutation::AddItem {
                                product_id: product.id,
                                quantity: 1,
                            },
                        )
                        .await
                        .unwrap();
                }

                store
                    .update_product(
                        product.id,
                        store::ProductChanges {
                            price: Some(Money::from_cents(650)),
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_ledger_recompute,
    bench_cart_add_item,
    bench_price_change_reprices_carts
);
criterion_main!(benches);
