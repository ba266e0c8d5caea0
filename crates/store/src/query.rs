use chrono::{DateTime, Utc};
use common::{CategoryId, Money, OrderStatus, UserId};

/// Builder for filtering and paging the product catalog.
#[derive(Debug, Clone, Default)]
pub struct ProductQuery {
    /// Exact price match.
    pub price: Option<Money>,

    /// Price strictly greater than this amount.
    pub price_gt: Option<Money>,

    /// Price strictly less than this amount.
    pub price_lt: Option<Money>,

    /// Case-insensitive substring of the product name.
    pub name_contains: Option<String>,

    /// Case-insensitive substring of any linked category's name.
    pub category_name_contains: Option<String>,

    /// Linked to this category.
    pub category_id: Option<CategoryId>,

    /// Maximum number of products to return.
    pub limit: Option<usize>,

    /// Number of products to skip.
    pub offset: Option<usize>,
}

impl ProductQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn price(mut self, price: Money) -> Self {
        self.price = Some(price);
        self
    }

    pub fn price_gt(mut self, price: Money) -> Self {
        self.price_gt = Some(price);
        self
    }

    pub fn price_lt(mut self, price: Money) -> Self {
        self.price_lt = Some(price);
        self
    }

    pub fn name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    pub fn category_name_contains(mut self, needle: impl Into<String>) -> Self {
        self.category_name_contains = Some(needle.into());
        self
    }

    pub fn category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips a number of results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if a product with these attributes passes the filters.
    ///
    /// Paging is not considered here.
    pub fn matches(&self, product: &crate::Product) -> bool {
        if let Some(price) = self.price
            && product.price != price
        {
            return false;
        }
        if let Some(gt) = self.price_gt
            && product.price <= gt
        {
            return false;
        }
        if let Some(lt) = self.price_lt
            && product.price >= lt
        {
            return false;
        }
        if let Some(ref needle) = self.name_contains
            && !contains_ignore_case(&product.name, needle)
        {
            return false;
        }
        if let Some(ref needle) = self.category_name_contains
            && !product
                .categories
                .iter()
                .any(|c| contains_ignore_case(&c.name, needle))
        {
            return false;
        }
        if let Some(category_id) = self.category_id
            && !product.categories.iter().any(|c| c.id == category_id)
        {
            return false;
        }
        true
    }
}

/// Builder for filtering and paging orders.
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    /// Only orders owned by this user.
    pub user_id: Option<UserId>,

    /// Only orders in this status.
    pub status: Option<OrderStatus>,

    /// Created at or after this instant (inclusive).
    pub created_from: Option<DateTime<Utc>>,

    /// Created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,

    /// Maximum number of orders to return.
    pub limit: Option<usize>,

    /// Number of orders to skip.
    pub offset: Option<usize>,
}

impl OrderQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one user's orders.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn created_from(mut self, from: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self
    }

    pub fn created_before(mut self, before: DateTime<Utc>) -> Self {
        self.created_before = Some(before);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips a number of results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the order passes the filters. Paging is not considered.
    pub fn matches(&self, order: &crate::Order) -> bool {
        if let Some(user_id) = self.user_id
            && order.user_id != user_id
        {
            return false;
        }
        if let Some(status) = self.status
            && order.status != status
        {
            return false;
        }
        if let Some(from) = self.created_from
            && order.created_at < from
        {
            return false;
        }
        if let Some(before) = self.created_before
            && order.created_at >= before
        {
            return false;
        }
        true
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Escapes `%`, `_` and `\` so a user string can be embedded in a LIKE pattern.
pub(crate) fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}
