use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    CartId, CategoryId, Money, OrderId, OrderStatus, ProductCategoryId, ProductId, ResetCodeId,
    UserId,
};

use crate::{
    CartDetail, CartMutation, Category, NewOrderLine, NewProduct, NewUser, OrderDetail,
    OrderQuery, Page, PasswordResetCode, Product, ProductCategory, ProductChanges, ProductQuery,
    Result, User, UserChanges,
};

/// Storage for user accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Inserts a user. Fails with `UniqueViolation` if the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<User>;

    /// Gets a user by ID.
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>>;

    /// Gets a user by exact email address.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Lists every user, oldest first.
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Applies a partial update. Fails with `NotFound` or `UniqueViolation`.
    async fn update_user(&self, user_id: UserId, changes: UserChanges) -> Result<User>;

    /// Deletes a user together with their cart and orders.
    ///
    /// Returns false if the user did not exist.
    async fn delete_user(&self, user_id: UserId) -> Result<bool>;
}

/// Storage for products, categories and their links.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts a product and links it to the given categories.
    ///
    /// Fails with `UniqueViolation` on a taken name and `NotFound` on an
    /// unknown category.
    async fn create_product(&self, product: NewProduct) -> Result<Product>;

    /// Gets a product by ID.
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Lists products matching a query, ordered by creation time.
    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>>;

    /// Applies a partial update.
    ///
    /// When the price changes, every cart holding the product is recomputed
    /// in the same transaction.
    async fn update_product(&self, product_id: ProductId, changes: ProductChanges)
    -> Result<Product>;

    /// Deletes a product, cascading to cart lines, order lines and category
    /// links, and recomputes every affected cart in the same transaction.
    async fn delete_product(&self, product_id: ProductId) -> Result<bool>;

    async fn create_category(&self, name: &str) -> Result<Category>;

    async fn get_category(&self, category_id: CategoryId) -> Result<Option<Category>>;

    async fn list_categories(&self) -> Result<Vec<Category>>;

    async fn update_category(&self, category_id: CategoryId, name: &str) -> Result<Category>;

    /// Deletes a category and its product links.
    async fn delete_category(&self, category_id: CategoryId) -> Result<bool>;

    /// Links a product to a category. Both must exist.
    async fn link_product_category(
        &self,
        product_id: ProductId,
        category_id: CategoryId,
    ) -> Result<ProductCategory>;

    async fn get_product_category(&self, id: ProductCategoryId)
    -> Result<Option<ProductCategory>>;

    async fn list_product_categories(&self) -> Result<Vec<ProductCategory>>;

    async fn delete_product_category(&self, id: ProductCategoryId) -> Result<bool>;
}

/// Storage for carts and their lines.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Creates the user's cart. Fails with `UniqueViolation` if one exists.
    async fn create_cart(&self, user_id: UserId) -> Result<CartDetail>;

    async fn get_cart(&self, cart_id: CartId) -> Result<Option<CartDetail>>;

    async fn get_cart_for_user(&self, user_id: UserId) -> Result<Option<CartDetail>>;

    /// Lists carts, newest first, optionally restricted to one owner.
    async fn list_carts(&self, owner: Option<UserId>) -> Result<Vec<CartDetail>>;

    async fn set_cart_ordered(&self, cart_id: CartId, is_ordered: bool) -> Result<CartDetail>;

    /// Applies a line mutation and persists the recomputed total atomically.
    ///
    /// Concurrent mutations of the same cart are serialized.
    async fn mutate_cart(&self, cart_id: CartId, mutation: CartMutation) -> Result<CartDetail>;

    /// Deletes a cart and its lines.
    async fn delete_cart(&self, cart_id: CartId) -> Result<bool>;
}

/// Storage for orders and their lines.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Creates a pending order with one line per entry, all or nothing.
    ///
    /// Each line records the product's current price. Fails with `NotFound`
    /// if any product is missing, in which case nothing is written.
    async fn create_order(&self, user_id: UserId, lines: Vec<NewOrderLine>)
    -> Result<OrderDetail>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderDetail>>;

    /// Lists orders matching a query, newest first.
    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<OrderDetail>>;

    /// Moves an order from `from` to `to`.
    ///
    /// Fails with `Conflict` if the order's status is no longer `from`.
    async fn set_order_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<OrderDetail>;

    /// Deletes an order and its lines.
    async fn delete_order(&self, order_id: OrderId) -> Result<bool>;
}

/// Storage for password reset codes.
#[async_trait]
pub trait ResetCodeStore: Send + Sync {
    async fn insert_reset_code(
        &self,
        email: &str,
        code: &str,
        created_at: DateTime<Utc>,
    ) -> Result<PasswordResetCode>;

    /// Returns the most recently created record matching both email and code.
    async fn latest_reset_code(&self, email: &str, code: &str)
    -> Result<Option<PasswordResetCode>>;

    /// Deletes the code and sets the user's password hash atomically.
    ///
    /// Fails with `NotFound` if either the code or the user is gone, in
    /// which case neither change is applied.
    async fn consume_reset_code(
        &self,
        code_id: ResetCodeId,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<()>;

    /// Deletes every code created before `cutoff`, returning how many were removed.
    async fn purge_reset_codes_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// The full persistence surface.
pub trait Store:
    AccountStore + CatalogStore + CartStore + OrderStore + ResetCodeStore + Clone + 'static
{
}

impl<T> Store for T where
    T: AccountStore + CatalogStore + CartStore + OrderStore + ResetCodeStore + Clone + 'static
{
}

/// Extension trait providing convenience methods for stores.
#[async_trait]
pub trait CartStoreExt: CartStore {
    /// Returns the user's cart, creating it if absent.
    async fn get_or_create_cart(&self, user_id: UserId) -> Result<CartDetail> {
        if let Some(cart) = self.get_cart_for_user(user_id).await? {
            return Ok(cart);
        }
        match self.create_cart(user_id).await {
            Err(crate::StoreError::UniqueViolation { .. }) => self
                .get_cart_for_user(user_id)
                .await?
                .ok_or_else(|| crate::StoreError::not_found("cart", user_id)),
            other => other,
        }
    }
}

// Blanket implementation for all CartStore implementations
impl<T: CartStore + ?Sized> CartStoreExt for T {}

/// Rejects prices that cannot be stored in a `NUMERIC(10, 2)` column.
pub(crate) fn check_price_fits(price: Money) -> Result<()> {
    let limit = common::Decimal::new(100_000_000, 0);
    if price.amount() >= limit {
        return Err(crate::StoreError::InvalidData(format!(
            "price {price} exceeds the storable range"
        )));
    }
    Ok(())
}
