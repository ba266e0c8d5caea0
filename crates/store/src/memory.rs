use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    CartId, CartItemId, CategoryId, Money, OrderId, OrderItemId, OrderStatus, PricedLine,
    PricingLedger, ProductCategoryId, ProductId, ResetCodeId, UserId,
};
use tokio::sync::RwLock;

use crate::store::check_price_fits;
use crate::{
    AccountStore, Cart, CartDetail, CartItem, CartLine, CartMutation, CartStore, CatalogStore,
    Category, NewOrderLine, NewProduct, NewUser, Order, OrderDetail, OrderItem, OrderLine,
    OrderQuery, OrderStore, Page, PasswordResetCode, Product, ProductCategory, ProductChanges,
    ProductQuery, ResetCodeStore, Result, StoreError, User, UserChanges,
};

#[derive(Debug, Clone)]
struct ProductRow {
    id: ProductId,
    name: String,
    price: Money,
    description: String,
    count: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ProductCategoryRow {
    id: ProductCategoryId,
    product_id: ProductId,
    category_id: CategoryId,
}

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    products: Vec<ProductRow>,
    categories: Vec<Category>,
    product_categories: Vec<ProductCategoryRow>,
    carts: Vec<Cart>,
    cart_items: Vec<CartItem>,
    orders: Vec<Order>,
    order_items: Vec<OrderItem>,
    reset_codes: Vec<PasswordResetCode>,
}

impl Tables {
    fn product(&self, product_id: ProductId) -> Option<Product> {
        let row = self.products.iter().find(|p| p.id == product_id)?;
        let categories = self
            .product_categories
            .iter()
            .filter(|link| link.product_id == product_id)
            .filter_map(|link| self.categories.iter().find(|c| c.id == link.category_id))
            .cloned()
            .collect();

        Some(Product {
            id: row.id,
            name: row.name.clone(),
            price: row.price,
            description: row.description.clone(),
            count: row.count,
            categories,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn product_category(&self, link: &ProductCategoryRow) -> Option<ProductCategory> {
        let category = self.categories.iter().find(|c| c.id == link.category_id)?;
        Some(ProductCategory {
            id: link.id,
            product_id: link.product_id,
            category: category.clone(),
        })
    }

    fn cart_detail(&self, cart_id: CartId) -> Option<CartDetail> {
        let cart = self.carts.iter().find(|c| c.id == cart_id)?.clone();
        let lines = self
            .cart_items
            .iter()
            .filter(|item| item.cart_id == cart_id)
            .filter_map(|item| {
                self.product(item.product_id).map(|product| CartLine {
                    item: item.clone(),
                    product,
                })
            })
            .collect();
        Some(CartDetail { cart, lines })
    }

    /// Recomputes and stores a cart's total from its current lines.
    fn recompute_cart(&mut self, cart_id: CartId) -> Money {
        let total = PricingLedger::recompute(
            self.cart_items
                .iter()
                .filter(|item| item.cart_id == cart_id)
                .filter_map(|item| {
                    self.products
                        .iter()
                        .find(|p| p.id == item.product_id)
                        .map(|p| PricedLine::new(p.price, item.quantity))
                }),
        );

        if let Some(cart) = self.carts.iter_mut().find(|c| c.id == cart_id) {
            cart.total_price = total;
            cart.updated_at = Utc::now();
        }
        total
    }

    fn carts_holding(&self, product_id: ProductId) -> Vec<CartId> {
        let mut cart_ids: Vec<CartId> = self
            .cart_items
            .iter()
            .filter(|item| item.product_id == product_id)
            .map(|item| item.cart_id)
            .collect();
        cart_ids.sort();
        cart_ids.dedup();
        cart_ids
    }

    fn order_detail(&self, order_id: OrderId) -> Option<OrderDetail> {
        let order = self.orders.iter().find(|o| o.id == order_id)?.clone();
        let user_email = self
            .users
            .iter()
            .find(|u| u.id == order.user_id)
            .map(|u| u.email.clone())
            .unwrap_or_default();
        let lines = self
            .order_items
            .iter()
            .filter(|item| item.order_id == order_id)
            .filter_map(|item| {
                self.product(item.product_id).map(|product| OrderLine {
                    item: item.clone(),
                    product,
                })
            })
            .collect();
        Some(OrderDetail {
            order,
            user_email,
            lines,
        })
    }

    fn remove_cart(&mut self, cart_id: CartId) -> bool {
        let before = self.carts.len();
        self.carts.retain(|c| c.id != cart_id);
        self.cart_items.retain(|item| item.cart_id != cart_id);
        self.carts.len() != before
    }

    fn remove_order(&mut self, order_id: OrderId) -> bool {
        let before = self.orders.len();
        self.orders.retain(|o| o.id != order_id);
        self.order_items.retain(|item| item.order_id != order_id);
        self.orders.len() != before
    }

    fn set_product_categories(&mut self, product_id: ProductId, category_ids: &[CategoryId]) {
        self.product_categories
            .retain(|link| link.product_id != product_id);
        for category_id in category_ids {
            self.product_categories.push(ProductCategoryRow {
                id: ProductCategoryId::new(),
                product_id,
                category_id: *category_id,
            });
        }
    }

    fn check_categories_exist(&self, category_ids: &[CategoryId]) -> Result<()> {
        for category_id in category_ids {
            if !self.categories.iter().any(|c| c.id == *category_id) {
                return Err(StoreError::not_found("category", category_id));
            }
        }
        Ok(())
    }
}

/// In-memory store implementation for testing and local runs.
///
/// All tables live behind a single lock, so every write operation is
/// atomic and writes are serialized.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored password reset codes.
    pub async fn reset_code_count(&self) -> usize {
        self.tables.read().await.reset_codes.len()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Returns the number of stored order lines.
    pub async fn order_item_count(&self) -> usize {
        self.tables.read().await.order_items.len()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        *self.tables.write().await = Tables::default();
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation {
                entity: "user",
                field: "email",
            });
        }

        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            phone_number: user.phone_number,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            created_at: now,
            updated_at: now,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.tables.read().await.users.clone())
    }

    async fn update_user(&self, user_id: UserId, changes: UserChanges) -> Result<User> {
        let mut tables = self.tables.write().await;
        if let Some(ref email) = changes.email
            && tables
                .users
                .iter()
                .any(|u| u.id != user_id && &u.email == email)
        {
            return Err(StoreError::UniqueViolation {
                entity: "user",
                field: "email",
            });
        }

        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| StoreError::not_found("user", user_id))?;

        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(password_hash) = changes.password_hash {
            user.password_hash = password_hash;
        }
        if let Some(first_name) = changes.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            user.last_name = last_name;
        }
        if let Some(phone_number) = changes.phone_number {
            user.phone_number = phone_number;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn delete_user(&self, user_id: UserId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.users.len();
        tables.users.retain(|u| u.id != user_id);
        if tables.users.len() == before {
            return Ok(false);
        }

        let cart_ids: Vec<CartId> = tables
            .carts
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.id)
            .collect();
        for cart_id in cart_ids {
            tables.remove_cart(cart_id);
        }

        let order_ids: Vec<OrderId> = tables
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .map(|o| o.id)
            .collect();
        for order_id in order_ids {
            tables.remove_order(order_id);
        }
        Ok(true)
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        check_price_fits(product.price)?;
        let mut tables = self.tables.write().await;
        if tables.products.iter().any(|p| p.name == product.name) {
            return Err(StoreError::UniqueViolation {
                entity: "product",
                field: "name",
            });
        }
        tables.check_categories_exist(&product.category_ids)?;

        let now = Utc::now();
        let id = ProductId::new();
        tables.products.push(ProductRow {
            id,
            name: product.name,
            price: product.price,
            description: product.description,
            count: product.count,
            created_at: now,
            updated_at: now,
        });
        tables.set_product_categories(id, &product.category_ids);

        tables
            .product(id)
            .ok_or_else(|| StoreError::not_found("product", id))
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.tables.read().await.product(product_id))
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        let tables = self.tables.read().await;
        let matching: Vec<Product> = tables
            .products
            .iter()
            .filter_map(|row| tables.product(row.id))
            .filter(|product| query.matches(product))
            .collect();

        let total = matching.len() as u64;
        let offset = query.offset.unwrap_or(0);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(Page { items, total })
    }

    async fn update_product(
        &self,
        product_id: ProductId,
        changes: ProductChanges,
    ) -> Result<Product> {
        if let Some(price) = changes.price {
            check_price_fits(price)?;
        }
        let mut tables = self.tables.write().await;
        if let Some(ref name) = changes.name
            && tables
                .products
                .iter()
                .any(|p| p.id != product_id && &p.name == name)
        {
            return Err(StoreError::UniqueViolation {
                entity: "product",
                field: "name",
            });
        }
        if let Some(ref category_ids) = changes.category_ids {
            tables.check_categories_exist(category_ids)?;
        }

        let row = tables
            .products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or_else(|| StoreError::not_found("product", product_id))?;

        let price_changed = changes.price.is_some_and(|price| price != row.price);
        if let Some(name) = changes.name {
            row.name = name;
        }
        if let Some(price) = changes.price {
            row.price = price;
        }
        if let Some(description) = changes.description {
            row.description = description;
        }
        if let Some(count) = changes.count {
            row.count = count;
        }
        row.updated_at = Utc::now();

        if let Some(category_ids) = changes.category_ids {
            tables.set_product_categories(product_id, &category_ids);
        }
        if price_changed {
            for cart_id in tables.carts_holding(product_id) {
                tables.recompute_cart(cart_id);
            }
        }

        tables
            .product(product_id)
            .ok_or_else(|| StoreError::not_found("product", product_id))
    }

    async fn delete_product(&self, product_id: ProductId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.products.len();
        tables.products.retain(|p| p.id != product_id);
        if tables.products.len() == before {
            return Ok(false);
        }

        let affected_carts = tables.carts_holding(product_id);
        tables
            .cart_items
            .retain(|item| item.product_id != product_id);
        tables
            .order_items
            .retain(|item| item.product_id != product_id);
        tables
            .product_categories
            .retain(|link| link.product_id != product_id);

        for cart_id in affected_carts {
            tables.recompute_cart(cart_id);
        }
        Ok(true)
    }

    async fn create_category(&self, name: &str) -> Result<Category> {
        let category = Category {
            id: CategoryId::new(),
            name: name.to_string(),
        };
        self.tables.write().await.categories.push(category.clone());
        Ok(category)
    }

    async fn get_category(&self, category_id: CategoryId) -> Result<Option<Category>> {
        let tables = self.tables.read().await;
        Ok(tables
            .categories
            .iter()
            .find(|c| c.id == category_id)
            .cloned())
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        Ok(self.tables.read().await.categories.clone())
    }

    async fn update_category(&self, category_id: CategoryId, name: &str) -> Result<Category> {
        let mut tables = self.tables.write().await;
        let category = tables
            .categories
            .iter_mut()
            .find(|c| c.id == category_id)
            .ok_or_else(|| StoreError::not_found("category", category_id))?;
        category.name = name.to_string();
        Ok(category.clone())
    }

    async fn delete_category(&self, category_id: CategoryId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.categories.len();
        tables.categories.retain(|c| c.id != category_id);
        tables
            .product_categories
            .retain(|link| link.category_id != category_id);
        Ok(tables.categories.len() != before)
    }

    async fn link_product_category(
        &self,
        product_id: ProductId,
        category_id: CategoryId,
    ) -> Result<ProductCategory> {
        let mut tables = self.tables.write().await;
        if !tables.products.iter().any(|p| p.id == product_id) {
            return Err(StoreError::not_found("product", product_id));
        }
        tables.check_categories_exist(&[category_id])?;

        let link = ProductCategoryRow {
            id: ProductCategoryId::new(),
            product_id,
            category_id,
        };
        tables.product_categories.push(link.clone());
        tables
            .product_category(&link)
            .ok_or_else(|| StoreError::not_found("category", category_id))
    }

    async fn get_product_category(
        &self,
        id: ProductCategoryId,
    ) -> Result<Option<ProductCategory>> {
        let tables = self.tables.read().await;
        Ok(tables
            .product_categories
            .iter()
            .find(|link| link.id == id)
            .and_then(|link| tables.product_category(link)))
    }

    async fn list_product_categories(&self) -> Result<Vec<ProductCategory>> {
        let tables = self.tables.read().await;
        Ok(tables
            .product_categories
            .iter()
            .filter_map(|link| tables.product_category(link))
            .collect())
    }

    async fn delete_product_category(&self, id: ProductCategoryId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.product_categories.len();
        tables.product_categories.retain(|link| link.id != id);
        Ok(tables.product_categories.len() != before)
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn create_cart(&self, user_id: UserId) -> Result<CartDetail> {
        let mut tables = self.tables.write().await;
        if !tables.users.iter().any(|u| u.id == user_id) {
            return Err(StoreError::not_found("user", user_id));
        }
        if tables.carts.iter().any(|c| c.user_id == user_id) {
            return Err(StoreError::UniqueViolation {
                entity: "cart",
                field: "user",
            });
        }

        let now = Utc::now();
        let cart = Cart {
            id: CartId::new(),
            user_id,
            is_ordered: false,
            total_price: Money::zero(),
            created_at: now,
            updated_at: now,
        };
        tables.carts.push(cart.clone());
        Ok(CartDetail {
            cart,
            lines: Vec::new(),
        })
    }

    async fn get_cart(&self, cart_id: CartId) -> Result<Option<CartDetail>> {
        Ok(self.tables.read().await.cart_detail(cart_id))
    }

    async fn get_cart_for_user(&self, user_id: UserId) -> Result<Option<CartDetail>> {
        let tables = self.tables.read().await;
        Ok(tables
            .carts
            .iter()
            .find(|c| c.user_id == user_id)
            .and_then(|c| tables.cart_detail(c.id)))
    }

    async fn list_carts(&self, owner: Option<UserId>) -> Result<Vec<CartDetail>> {
        let tables = self.tables.read().await;
        let mut carts: Vec<CartDetail> = tables
            .carts
            .iter()
            .filter(|c| owner.is_none_or(|user_id| c.user_id == user_id))
            .filter_map(|c| tables.cart_detail(c.id))
            .collect();
        carts.sort_by(|a, b| b.cart.created_at.cmp(&a.cart.created_at));
        Ok(carts)
    }

    async fn set_cart_ordered(&self, cart_id: CartId, is_ordered: bool) -> Result<CartDetail> {
        let mut tables = self.tables.write().await;
        let cart = tables
            .carts
            .iter_mut()
            .find(|c| c.id == cart_id)
            .ok_or_else(|| StoreError::not_found("cart", cart_id))?;
        cart.is_ordered = is_ordered;
        cart.updated_at = Utc::now();

        tables
            .cart_detail(cart_id)
            .ok_or_else(|| StoreError::not_found("cart", cart_id))
    }

    async fn mutate_cart(&self, cart_id: CartId, mutation: CartMutation) -> Result<CartDetail> {
        let mut tables = self.tables.write().await;
        if !tables.carts.iter().any(|c| c.id == cart_id) {
            return Err(StoreError::not_found("cart", cart_id));
        }

        match mutation {
            CartMutation::AddItem {
                product_id,
                quantity,
            } => {
                if !tables.products.iter().any(|p| p.id == product_id) {
                    return Err(StoreError::not_found("product", product_id));
                }
                tables.cart_items.push(CartItem {
                    id: CartItemId::new(),
                    cart_id,
                    product_id,
                    quantity,
                    created_at: Utc::now(),
                });
            }
            CartMutation::UpdateItem { item_id, quantity } => {
                let item = tables
                    .cart_items
                    .iter_mut()
                    .find(|item| item.id == item_id && item.cart_id == cart_id)
                    .ok_or_else(|| StoreError::not_found("cart item", item_id))?;
                item.quantity = quantity;
            }
            CartMutation::RemoveItem { item_id } => {
                let before = tables.cart_items.len();
                tables
                    .cart_items
                    .retain(|item| !(item.id == item_id && item.cart_id == cart_id));
                if tables.cart_items.len() == before {
                    return Err(StoreError::not_found("cart item", item_id));
                }
            }
        }

        tables.recompute_cart(cart_id);
        tables
            .cart_detail(cart_id)
            .ok_or_else(|| StoreError::not_found("cart", cart_id))
    }

    async fn delete_cart(&self, cart_id: CartId) -> Result<bool> {
        Ok(self.tables.write().await.remove_cart(cart_id))
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_order(
        &self,
        user_id: UserId,
        lines: Vec<NewOrderLine>,
    ) -> Result<OrderDetail> {
        let mut tables = self.tables.write().await;
        if !tables.users.iter().any(|u| u.id == user_id) {
            return Err(StoreError::not_found("user", user_id));
        }

        // Resolve every line before writing anything.
        let now = Utc::now();
        let order_id = OrderId::new();
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = tables
                .products
                .iter()
                .find(|p| p.id == line.product_id)
                .ok_or_else(|| StoreError::not_found("product", line.product_id))?;
            items.push(OrderItem {
                id: OrderItemId::new(),
                order_id,
                product_id: product.id,
                quantity: line.quantity,
                unit_price: product.price,
                created_at: now,
            });
        }

        tables.orders.push(Order {
            id: order_id,
            user_id,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        });
        tables.order_items.extend(items);

        tables
            .order_detail(order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderDetail>> {
        Ok(self.tables.read().await.order_detail(order_id))
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<OrderDetail>> {
        let tables = self.tables.read().await;
        let mut matching: Vec<&Order> = tables
            .orders
            .iter()
            .filter(|order| query.matches(order))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .filter_map(|order| tables.order_detail(order.id))
            .collect();
        Ok(Page { items, total })
    }

    async fn set_order_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<OrderDetail> {
        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        if order.status != from {
            return Err(StoreError::Conflict {
                entity: "order",
                id: order_id.to_string(),
            });
        }
        order.status = to;
        order.updated_at = Utc::now();

        tables
            .order_detail(order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<bool> {
        Ok(self.tables.write().await.remove_order(order_id))
    }
}

#[async_trait]
impl ResetCodeStore for InMemoryStore {
    async fn insert_reset_code(
        &self,
        email: &str,
        code: &str,
        created_at: DateTime<Utc>,
    ) -> Result<PasswordResetCode> {
        let record = PasswordResetCode {
            id: ResetCodeId::new(),
            email: email.to_string(),
            code: code.to_string(),
            created_at,
        };
        self.tables.write().await.reset_codes.push(record.clone());
        Ok(record)
    }

    async fn latest_reset_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<Option<PasswordResetCode>> {
        let tables = self.tables.read().await;
        // max_by_key keeps the last of equal keys, so ties go to the newest insert
        Ok(tables
            .reset_codes
            .iter()
            .filter(|r| r.email == email && r.code == code)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn consume_reset_code(
        &self,
        code_id: ResetCodeId,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.reset_codes.iter().any(|r| r.id == code_id) {
            return Err(StoreError::not_found("reset code", code_id));
        }
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| StoreError::not_found("user", user_id))?;

        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        tables.reset_codes.retain(|r| r.id != code_id);
        Ok(())
    }

    async fn purge_reset_codes_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.reset_codes.len();
        tables.reset_codes.retain(|r| r.created_at >= cutoff);
        Ok((before - tables.reset_codes.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CartStoreExt;

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    async fn create_user(store: &InMemoryStore, email: &str) -> User {
        store
            .create_user(NewUser {
                email: email.to_string(),
                password_hash: "hash".to_string(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                phone_number: String::new(),
                is_staff: false,
                is_superuser: false,
            })
            .await
            .unwrap()
    }

    async fn create_product(store: &InMemoryStore, name: &str, price: &str) -> Product {
        store
            .create_product(NewProduct {
                name: name.to_string(),
                price: money(price),
                description: "A product".to_string(),
                count: 10,
                category_ids: vec![],
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryStore::new();
        create_user(&store, "a@example.com").await;

        let result = store
            .create_user(NewUser {
                email: "a@example.com".to_string(),
                password_hash: "x".to_string(),
                first_name: String::new(),
                last_name: String::new(),
                phone_number: String::new(),
                is_staff: false,
                is_superuser: false,
            })
            .await;
        assert!(matches!(
            result,
            Err(StoreError::UniqueViolation { field: "email", .. })
        ));
    }

    #[tokio::test]
    async fn second_cart_for_same_user_is_a_constraint_violation() {
        let store = InMemoryStore::new();
        let user = create_user(&store, "a@example.com").await;

        store.create_cart(user.id).await.unwrap();
        let result = store.create_cart(user.id).await;
        assert!(matches!(result, Err(StoreError::UniqueViolation { .. })));

        let cart = store.get_or_create_cart(user.id).await.unwrap();
        assert_eq!(cart.cart.user_id, user.id);
    }

    #[tokio::test]
    async fn cart_total_tracks_every_mutation() {
        let store = InMemoryStore::new();
        let user = create_user(&store, "a@example.com").await;
        let widget = create_product(&store, "Widget", "10.00").await;
        let gadget = create_product(&store, "Gadget", "0.99").await;
        let cart = store.create_cart(user.id).await.unwrap().cart;

        let detail = store
            .mutate_cart(
                cart.id,
                CartMutation::AddItem {
                    product_id: widget.id,
                    quantity: 3,
                },
            )
            .await
            .unwrap();
        assert_eq!(detail.cart.total_price, money("30.00"));

        let detail = store
            .mutate_cart(
                cart.id,
                CartMutation::AddItem {
                    product_id: gadget.id,
                    quantity: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(detail.cart.total_price, money("31.98"));
        let gadget_line = detail.lines[1].item.id;

        let detail = store
            .mutate_cart(
                cart.id,
                CartMutation::UpdateItem {
                    item_id: gadget_line,
                    quantity: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(detail.cart.total_price, money("30.99"));

        let detail = store
            .mutate_cart(
                cart.id,
                CartMutation::RemoveItem {
                    item_id: gadget_line,
                },
            )
            .await
            .unwrap();
        assert_eq!(detail.cart.total_price, money("30.00"));
        assert_eq!(detail.cart.total_price, detail.live_total());
    }

    #[tokio::test]
    async fn same_product_added_twice_creates_two_lines() {
        let store = InMemoryStore::new();
        let user = create_user(&store, "a@example.com").await;
        let widget = create_product(&store, "Widget", "2.50").await;
        let cart = store.create_cart(user.id).await.unwrap().cart;

        for _ in 0..2 {
            store
                .mutate_cart(
                    cart.id,
                    CartMutation::AddItem {
                        product_id: widget.id,
                        quantity: 1,
                    },
                )
                .await
                .unwrap();
        }

        let detail = store.get_cart(cart.id).await.unwrap().unwrap();
        assert_eq!(detail.product_count(), 2);
        assert_eq!(detail.cart.total_price, money("5.00"));
    }

    #[tokio::test]
    async fn item_from_another_cart_is_not_found() {
        let store = InMemoryStore::new();
        let alice = create_user(&store, "alice@example.com").await;
        let bob = create_user(&store, "bob@example.com").await;
        let widget = create_product(&store, "Widget", "1.00").await;
        let alice_cart = store.create_cart(alice.id).await.unwrap().cart;
        let bob_cart = store.create_cart(bob.id).await.unwrap().cart;

        let detail = store
            .mutate_cart(
                alice_cart.id,
                CartMutation::AddItem {
                    product_id: widget.id,
                    quantity: 1,
                },
            )
            .await
            .unwrap();
        let item_id = detail.lines[0].item.id;

        let result = store
            .mutate_cart(bob_cart.id, CartMutation::RemoveItem { item_id })
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn price_change_recomputes_live_carts() {
        let store = InMemoryStore::new();
        let user = create_user(&store, "a@example.com").await;
        let widget = create_product(&store, "Widget", "10.00").await;
        let cart = store.create_cart(user.id).await.unwrap().cart;
        store
            .mutate_cart(
                cart.id,
                CartMutation::AddItem {
                    product_id: widget.id,
                    quantity: 2,
                },
            )
            .await
            .unwrap();

        store
            .update_product(
                widget.id,
                ProductChanges {
                    price: Some(money("12.50")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let detail = store.get_cart(cart.id).await.unwrap().unwrap();
        assert_eq!(detail.cart.total_price, money("25.00"));
    }

    #[tokio::test]
    async fn product_delete_cascades_and_recomputes() {
        let store = InMemoryStore::new();
        let user = create_user(&store, "a@example.com").await;
        let widget = create_product(&store, "Widget", "10.00").await;
        let gadget = create_product(&store, "Gadget", "4.00").await;
        let cart = store.create_cart(user.id).await.unwrap().cart;
        for product_id in [widget.id, gadget.id] {
            store
                .mutate_cart(
                    cart.id,
                    CartMutation::AddItem {
                        product_id,
                        quantity: 1,
                    },
                )
                .await
                .unwrap();
        }
        store
            .create_order(
                user.id,
                vec![NewOrderLine {
                    product_id: widget.id,
                    quantity: 1,
                }],
            )
            .await
            .unwrap();

        assert!(store.delete_product(widget.id).await.unwrap());

        let detail = store.get_cart(cart.id).await.unwrap().unwrap();
        assert_eq!(detail.product_count(), 1);
        assert_eq!(detail.cart.total_price, money("4.00"));
        assert_eq!(store.order_item_count().await, 0);
    }

    #[tokio::test]
    async fn order_with_missing_product_writes_nothing() {
        let store = InMemoryStore::new();
        let user = create_user(&store, "a@example.com").await;
        let widget = create_product(&store, "Widget", "10.00").await;

        let result = store
            .create_order(
                user.id,
                vec![
                    NewOrderLine {
                        product_id: widget.id,
                        quantity: 3,
                    },
                    NewOrderLine {
                        product_id: ProductId::new(),
                        quantity: 1,
                    },
                ],
            )
            .await;

        assert!(matches!(
            result,
            Err(StoreError::NotFound {
                entity: "product",
                ..
            })
        ));
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.order_item_count().await, 0);
    }

    #[tokio::test]
    async fn order_records_price_at_creation() {
        let store = InMemoryStore::new();
        let user = create_user(&store, "a@example.com").await;
        let widget = create_product(&store, "Widget", "10.00").await;

        let order = store
            .create_order(
                user.id,
                vec![NewOrderLine {
                    product_id: widget.id,
                    quantity: 2,
                }],
            )
            .await
            .unwrap();
        assert_eq!(order.user_email, "a@example.com");
        assert_eq!(order.order.status, OrderStatus::Pending);

        store
            .update_product(
                widget.id,
                ProductChanges {
                    price: Some(money("15.00")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let order = store.get_order(order.order.id).await.unwrap().unwrap();
        assert_eq!(order.total_amount(), money("30.00"));
        assert_eq!(order.total_at_order_time(), money("20.00"));
    }

    #[tokio::test]
    async fn status_write_requires_the_expected_current_status() {
        let store = InMemoryStore::new();
        let user = create_user(&store, "a@example.com").await;
        let widget = create_product(&store, "Widget", "1.00").await;
        let order_id = store
            .create_order(
                user.id,
                vec![NewOrderLine {
                    product_id: widget.id,
                    quantity: 1,
                }],
            )
            .await
            .unwrap()
            .order
            .id;

        let moved = store
            .set_order_status(order_id, OrderStatus::Pending, OrderStatus::Processing)
            .await
            .unwrap();
        assert_eq!(moved.order.status, OrderStatus::Processing);

        let stale = store
            .set_order_status(order_id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await;
        assert!(matches!(stale, Err(StoreError::Conflict { entity: "order", .. })));

        let missing = store
            .set_order_status(OrderId::new(), OrderStatus::Pending, OrderStatus::Processing)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));

        let order = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.order.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn delete_user_cascades_to_cart_and_orders() {
        let store = InMemoryStore::new();
        let user = create_user(&store, "a@example.com").await;
        let widget = create_product(&store, "Widget", "1.00").await;
        store.create_cart(user.id).await.unwrap();
        store
            .create_order(
                user.id,
                vec![NewOrderLine {
                    product_id: widget.id,
                    quantity: 1,
                }],
            )
            .await
            .unwrap();

        assert!(store.delete_user(user.id).await.unwrap());
        assert!(store.get_cart_for_user(user.id).await.unwrap().is_none());
        assert_eq!(store.order_count().await, 0);
        assert!(!store.delete_user(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn latest_reset_code_wins_and_consume_is_single_use() {
        let store = InMemoryStore::new();
        let user = create_user(&store, "a@example.com").await;
        let t0 = Utc::now();

        store
            .insert_reset_code("a@example.com", "1234", t0)
            .await
            .unwrap();
        let newer = store
            .insert_reset_code("a@example.com", "1234", t0 + chrono::Duration::seconds(5))
            .await
            .unwrap();

        let latest = store
            .latest_reset_code("a@example.com", "1234")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, newer.id);

        store
            .consume_reset_code(latest.id, user.id, "new-hash")
            .await
            .unwrap();
        let again = store.consume_reset_code(latest.id, user.id, "other").await;
        assert!(matches!(again, Err(StoreError::NotFound { .. })));

        let user = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(user.password_hash, "new-hash");
    }

    #[tokio::test]
    async fn consume_for_missing_user_keeps_the_code() {
        let store = InMemoryStore::new();
        let record = store
            .insert_reset_code("ghost@example.com", "4321", Utc::now())
            .await
            .unwrap();

        let result = store
            .consume_reset_code(record.id, UserId::new(), "hash")
            .await;
        assert!(result.is_err());
        assert_eq!(store.reset_code_count().await, 1);
    }

    #[tokio::test]
    async fn purge_removes_only_old_codes() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .insert_reset_code("a@example.com", "1111", now - chrono::Duration::seconds(500))
            .await
            .unwrap();
        store
            .insert_reset_code("a@example.com", "2222", now)
            .await
            .unwrap();

        let purged = store
            .purge_reset_codes_before(now - chrono::Duration::seconds(400))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.reset_code_count().await, 1);
    }

    #[tokio::test]
    async fn product_query_filters_and_pages() {
        let store = InMemoryStore::new();
        let shoes = store.create_category("Shoes").await.unwrap();
        for (name, price) in [("Red Sneaker", "50.00"), ("Blue Boot", "80.00"), ("Hat", "15.00")] {
            let product = create_product(&store, name, price).await;
            if name != "Hat" {
                store
                    .link_product_category(product.id, shoes.id)
                    .await
                    .unwrap();
            }
        }

        let page = store
            .list_products(&ProductQuery::new().price_gt(money("20.00")))
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let page = store
            .list_products(&ProductQuery::new().name_contains("sneaker"))
            .await
            .unwrap();
        assert_eq!(page.items[0].name, "Red Sneaker");

        let page = store
            .list_products(&ProductQuery::new().category_name_contains("sho").limit(1))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);

        let page = store
            .list_products(&ProductQuery::new().category(shoes.id).price_lt(money("60.00")))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }
}
