//! Rows and aggregates returned by the store.

use chrono::{DateTime, Utc};
use common::{
    CartId, CartItemId, CategoryId, Money, OrderId, OrderItemId, OrderStatus, PricedLine,
    PricingLedger, ProductCategoryId, ProductId, ResetCodeId, UserId,
};

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

/// Partial update of a user; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

/// A catalog category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

/// A catalog product together with the categories it is linked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub description: String,
    pub count: u32,
    pub categories: Vec<Category>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub price: Money,
    pub description: String,
    pub count: u32,
    pub category_ids: Vec<CategoryId>,
}

/// Partial update of a product.
///
/// `category_ids: Some(..)` replaces the product's category links.
#[derive(Debug, Clone, Default)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub price: Option<Money>,
    pub description: Option<String>,
    pub count: Option<u32>,
    pub category_ids: Option<Vec<CategoryId>>,
}

/// A link between a product and a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductCategory {
    pub id: ProductCategoryId,
    pub product_id: ProductId,
    pub category: Category,
}

/// A shopping cart row. `total_price` is the cached ledger total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    pub is_ordered: bool,
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart line row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItem {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

/// A cart line with its live product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub item: CartItem,
    pub product: Product,
}

/// A cart with all of its lines loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartDetail {
    pub cart: Cart,
    pub lines: Vec<CartLine>,
}

impl CartDetail {
    /// Number of lines in the cart.
    pub fn product_count(&self) -> usize {
        self.lines.len()
    }

    /// Total derived from the loaded lines at current product prices.
    pub fn live_total(&self) -> Money {
        PricingLedger::recompute(
            self.lines
                .iter()
                .map(|line| PricedLine::new(line.product.price, line.item.quantity)),
        )
    }

    /// Returns the line with the given id, if it belongs to this cart.
    pub fn line(&self, item_id: CartItemId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.item.id == item_id)
    }
}

/// A change to a cart's lines. Every mutation is followed by a ledger
/// recompute in the same atomic unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartMutation {
    AddItem {
        product_id: ProductId,
        quantity: u32,
    },
    UpdateItem {
        item_id: CartItemId,
        quantity: u32,
    },
    RemoveItem {
        item_id: CartItemId,
    },
}

/// An order row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An order line row. `unit_price` is the product price when the order was placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub created_at: DateTime<Utc>,
}

/// An order line with its live product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub item: OrderItem,
    pub product: Product,
}

/// An order with its owner's email and all of its lines loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetail {
    pub order: Order,
    pub user_email: String,
    pub lines: Vec<OrderLine>,
}

impl OrderDetail {
    /// Order total at current product prices.
    pub fn total_amount(&self) -> Money {
        PricingLedger::recompute(
            self.lines
                .iter()
                .map(|line| PricedLine::new(line.product.price, line.item.quantity)),
        )
    }

    /// Order total at the prices recorded when the order was placed.
    pub fn total_at_order_time(&self) -> Money {
        PricingLedger::recompute(
            self.lines
                .iter()
                .map(|line| PricedLine::new(line.item.unit_price, line.item.quantity)),
        )
    }
}

/// One requested line of a new order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A password reset code record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetCode {
    pub id: ResetCodeId,
    pub email: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

/// One page of a filtered listing, with the total number of matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
        }
    }
}
