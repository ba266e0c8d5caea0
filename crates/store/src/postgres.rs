use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    CartId, CartItemId, CategoryId, Decimal, Money, OrderId, OrderItemId, OrderStatus, PricedLine,
    PricingLedger, ProductCategoryId, ProductId, ResetCodeId, UserId,
};
use sqlx::{
    PgConnection, PgPool, Postgres, Row,
    postgres::{PgArguments, PgRow},
    query::Query,
};
use uuid::Uuid;

use crate::query::like_pattern;
use crate::store::check_price_fits;
use crate::{
    AccountStore, Cart, CartDetail, CartItem, CartLine, CartMutation, CartStore, CatalogStore,
    Category, NewOrderLine, NewProduct, NewUser, Order, OrderDetail, OrderItem, OrderLine,
    OrderQuery, OrderStore, Page, PasswordResetCode, Product, ProductCategory, ProductChanges,
    ProductQuery, ResetCodeStore, Result, StoreError, User, UserChanges,
};

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, phone_number, \
     is_staff, is_superuser, created_at, updated_at";

const PRODUCT_COLUMNS: &str =
    "p.id, p.name, p.price, p.description, p.count, p.created_at, p.updated_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::debug!("migrations applied");
        Ok(())
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{column} out of range: {value}")))
}

/// Maps known constraint violations to `UniqueViolation`.
fn map_db_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        let violation = match db_err.constraint() {
            Some("users_email_key") => Some(("user", "email")),
            Some("products_name_key") => Some(("product", "name")),
            Some("carts_user_id_key") => Some(("cart", "user")),
            _ => None,
        };
        if let Some((entity, field)) = violation {
            return StoreError::UniqueViolation { entity, field };
        }
    }
    StoreError::Database(e)
}

fn row_to_user(row: &PgRow) -> Result<User> {
    Ok(User {
        id: UserId::from_uuid(row.try_get::<Uuid, _>("id")?),
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone_number: row.try_get("phone_number")?,
        is_staff: row.try_get("is_staff")?,
        is_superuser: row.try_get("is_superuser")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Maps product columns; categories are attached separately.
fn row_to_product(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        price: Money::new(row.try_get::<Decimal, _>("price")?),
        description: row.try_get("description")?,
        count: to_u32(row.try_get("count")?, "count")?,
        categories: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_cart(row: &PgRow) -> Result<Cart> {
    Ok(Cart {
        id: CartId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        is_ordered: row.try_get("is_ordered")?,
        total_price: Money::new(row.try_get::<Decimal, _>("total_price")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        status: status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::InvalidData(e.to_string()))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_reset_code(row: &PgRow) -> Result<PasswordResetCode> {
    Ok(PasswordResetCode {
        id: ResetCodeId::from_uuid(row.try_get::<Uuid, _>("id")?),
        email: row.try_get("email")?,
        code: row.try_get("code")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Fills in the categories of each product with one query.
async fn attach_categories(conn: &mut PgConnection, products: &mut [Product]) -> Result<()> {
    if products.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = products.iter().map(|p| p.id.as_uuid()).collect();
    let rows = sqlx::query(
        r#"
        SELECT pc.product_id, c.id, c.name
        FROM product_categories pc
        JOIN categories c ON c.id = pc.category_id
        WHERE pc.product_id = ANY($1)
        ORDER BY pc.created_at ASC, pc.id ASC
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_product: HashMap<Uuid, Vec<Category>> = HashMap::new();
    for row in &rows {
        let product_id: Uuid = row.try_get("product_id")?;
        by_product.entry(product_id).or_default().push(Category {
            id: CategoryId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
        });
    }
    for product in products.iter_mut() {
        product.categories = by_product.remove(&product.id.as_uuid()).unwrap_or_default();
    }
    Ok(())
}

async fn load_product(conn: &mut PgConnection, product_id: ProductId) -> Result<Option<Product>> {
    let row = sqlx::query(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = $1"
    ))
    .bind(product_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut products = [row_to_product(&row)?];
    attach_categories(conn, &mut products).await?;
    let [product] = products;
    Ok(Some(product))
}

async fn ensure_categories_exist(conn: &mut PgConnection, category_ids: &[CategoryId]) -> Result<()> {
    for category_id in category_ids {
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM categories WHERE id = $1")
            .bind(category_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            return Err(StoreError::not_found("category", category_id));
        }
    }
    Ok(())
}

async fn insert_category_links(
    conn: &mut PgConnection,
    product_id: ProductId,
    category_ids: &[CategoryId],
) -> Result<()> {
    for category_id in category_ids {
        sqlx::query(
            "INSERT INTO product_categories (id, product_id, category_id) VALUES ($1, $2, $3)",
        )
        .bind(ProductCategoryId::new().as_uuid())
        .bind(product_id.as_uuid())
        .bind(category_id.as_uuid())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Locks every cart holding a product, in id order.
///
/// The product row is locked first so a concurrent add of the same product
/// either commits before the carts are collected or prices against the
/// new row.
async fn lock_carts_holding(conn: &mut PgConnection, product_id: ProductId) -> Result<Vec<Uuid>> {
    sqlx::query("SELECT id FROM products WHERE id = $1 FOR UPDATE")
        .bind(product_id.as_uuid())
        .execute(&mut *conn)
        .await?;
    let cart_ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM carts
        WHERE id IN (SELECT cart_id FROM cart_items WHERE product_id = $1)
        ORDER BY id
        FOR UPDATE
        "#,
    )
    .bind(product_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;
    Ok(cart_ids)
}

/// Recomputes a cart's total from its lines and stores it.
async fn recompute_cart(conn: &mut PgConnection, cart_id: Uuid) -> Result<Money> {
    let rows = sqlx::query(
        r#"
        SELECT p.price, ci.quantity
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.cart_id = $1
        "#,
    )
    .bind(cart_id)
    .fetch_all(&mut *conn)
    .await?;

    let lines = rows
        .iter()
        .map(|row| {
            Ok(PricedLine::new(
                Money::new(row.try_get::<Decimal, _>("price")?),
                to_u32(row.try_get("quantity")?, "quantity")?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    let total = PricingLedger::recompute(lines);

    sqlx::query("UPDATE carts SET total_price = $2, updated_at = NOW() WHERE id = $1")
        .bind(cart_id)
        .bind(total.amount())
        .execute(&mut *conn)
        .await?;
    Ok(total)
}

async fn load_cart(conn: &mut PgConnection, cart_id: CartId) -> Result<Option<CartDetail>> {
    let row = sqlx::query(
        "SELECT id, user_id, is_ordered, total_price, created_at, updated_at FROM carts WHERE id = $1",
    )
    .bind(cart_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let cart = row_to_cart(&row)?;

    let rows = sqlx::query(&format!(
        r#"
        SELECT ci.id AS item_id, ci.quantity AS item_quantity, ci.created_at AS item_created_at,
               {PRODUCT_COLUMNS}
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.cart_id = $1
        ORDER BY ci.seq ASC
        "#
    ))
    .bind(cart_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    let mut products = Vec::with_capacity(rows.len());
    for row in &rows {
        let product = row_to_product(row)?;
        items.push(CartItem {
            id: CartItemId::from_uuid(row.try_get::<Uuid, _>("item_id")?),
            cart_id,
            product_id: product.id,
            quantity: to_u32(row.try_get("item_quantity")?, "quantity")?,
            created_at: row.try_get("item_created_at")?,
        });
        products.push(product);
    }
    attach_categories(conn, &mut products).await?;

    let lines = items
        .into_iter()
        .zip(products)
        .map(|(item, product)| CartLine { item, product })
        .collect();
    Ok(Some(CartDetail { cart, lines }))
}

async fn load_order(conn: &mut PgConnection, order_id: OrderId) -> Result<Option<OrderDetail>> {
    let row = sqlx::query(
        r#"
        SELECT o.id, o.user_id, o.status, o.created_at, o.updated_at, u.email
        FROM orders o
        JOIN users u ON u.id = o.user_id
        WHERE o.id = $1
        "#,
    )
    .bind(order_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let order = row_to_order(&row)?;
    let user_email: String = row.try_get("email")?;

    let rows = sqlx::query(&format!(
        r#"
        SELECT oi.id AS item_id, oi.quantity AS item_quantity, oi.unit_price AS item_unit_price,
               oi.created_at AS item_created_at, {PRODUCT_COLUMNS}
        FROM order_items oi
        JOIN products p ON p.id = oi.product_id
        WHERE oi.order_id = $1
        ORDER BY oi.seq ASC
        "#
    ))
    .bind(order_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    let mut products = Vec::with_capacity(rows.len());
    for row in &rows {
        let product = row_to_product(row)?;
        items.push(OrderItem {
            id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("item_id")?),
            order_id,
            product_id: product.id,
            quantity: to_u32(row.try_get("item_quantity")?, "quantity")?,
            unit_price: Money::new(row.try_get::<Decimal, _>("item_unit_price")?),
            created_at: row.try_get("item_created_at")?,
        });
        products.push(product);
    }
    attach_categories(conn, &mut products).await?;

    let lines = items
        .into_iter()
        .zip(products)
        .map(|(item, product)| OrderLine { item, product })
        .collect();
    Ok(Some(OrderDetail {
        order,
        user_email,
        lines,
    }))
}

/// Builds the WHERE clause for a product query; binds must follow the same order.
fn product_filter_sql(query: &ProductQuery) -> (String, usize) {
    let mut sql = String::from(" WHERE 1=1");
    let mut param_count = 0;

    if query.price.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND p.price = ${param_count}"));
    }
    if query.price_gt.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND p.price > ${param_count}"));
    }
    if query.price_lt.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND p.price < ${param_count}"));
    }
    if query.name_contains.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND p.name ILIKE ${param_count}"));
    }
    if query.category_name_contains.is_some() {
        param_count += 1;
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM product_categories pc \
             JOIN categories c ON c.id = pc.category_id \
             WHERE pc.product_id = p.id AND c.name ILIKE ${param_count})"
        ));
    }
    if query.category_id.is_some() {
        param_count += 1;
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM product_categories pc \
             WHERE pc.product_id = p.id AND pc.category_id = ${param_count})"
        ));
    }
    (sql, param_count)
}

fn bind_product_filters<'q>(
    mut q: Query<'q, Postgres, PgArguments>,
    query: &ProductQuery,
) -> Query<'q, Postgres, PgArguments> {
    if let Some(price) = query.price {
        q = q.bind(price.amount());
    }
    if let Some(price) = query.price_gt {
        q = q.bind(price.amount());
    }
    if let Some(price) = query.price_lt {
        q = q.bind(price.amount());
    }
    if let Some(ref needle) = query.name_contains {
        q = q.bind(like_pattern(needle));
    }
    if let Some(ref needle) = query.category_name_contains {
        q = q.bind(like_pattern(needle));
    }
    if let Some(category_id) = query.category_id {
        q = q.bind(category_id.as_uuid());
    }
    q
}

fn order_filter_sql(query: &OrderQuery) -> (String, usize) {
    let mut sql = String::from(" WHERE 1=1");
    let mut param_count = 0;

    if query.user_id.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND user_id = ${param_count}"));
    }
    if query.status.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND status = ${param_count}"));
    }
    if query.created_from.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND created_at >= ${param_count}"));
    }
    if query.created_before.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND created_at < ${param_count}"));
    }
    (sql, param_count)
}

fn bind_order_filters<'q>(
    mut q: Query<'q, Postgres, PgArguments>,
    query: &OrderQuery,
) -> Query<'q, Postgres, PgArguments> {
    if let Some(user_id) = query.user_id {
        q = q.bind(user_id.as_uuid());
    }
    if let Some(status) = query.status {
        q = q.bind(status.as_str());
    }
    if let Some(from) = query.created_from {
        q = q.bind(from);
    }
    if let Some(before) = query.created_before {
        q = q.bind(before);
    }
    q
}

fn push_paging(sql: &mut String, mut param_count: usize, limit: Option<usize>, offset: Option<usize>) {
    if limit.is_some() {
        param_count += 1;
        sql.push_str(&format!(" LIMIT ${param_count}"));
    }
    if offset.is_some() {
        param_count += 1;
        sql.push_str(&format!(" OFFSET ${param_count}"));
    }
}

fn bind_paging(
    mut q: Query<'_, Postgres, PgArguments>,
    limit: Option<usize>,
    offset: Option<usize>,
) -> Query<'_, Postgres, PgArguments> {
    if let Some(limit) = limit {
        q = q.bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if let Some(offset) = offset {
        q = q.bind(i64::try_from(offset).unwrap_or(i64::MAX));
    }
    q
}

#[async_trait]
impl AccountStore for PostgresStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, phone_number,
                               is_staff, is_superuser)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(UserId::new().as_uuid())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(user.is_staff)
        .bind(user.is_superuser)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        row_to_user(&row)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_user).collect()
    }

    async fn update_user(&self, user_id: UserId, changes: UserChanges) -> Result<User> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                password_hash = COALESCE($3, password_hash),
                first_name = COALESCE($4, first_name),
                last_name = COALESCE($5, last_name),
                phone_number = COALESCE($6, phone_number),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id.as_uuid())
        .bind(changes.email)
        .bind(changes.password_hash)
        .bind(changes.first_name)
        .bind(changes.last_name)
        .bind(changes.phone_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        match row {
            Some(row) => row_to_user(&row),
            None => Err(StoreError::not_found("user", user_id)),
        }
    }

    async fn delete_user(&self, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        check_price_fits(product.price)?;
        let mut tx = self.pool.begin().await?;
        ensure_categories_exist(&mut tx, &product.category_ids).await?;

        let product_id = ProductId::new();
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price, description, count)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(&product.name)
        .bind(product.price.amount())
        .bind(&product.description)
        .bind(i64::from(product.count))
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        insert_category_links(&mut tx, product_id, &product.category_ids).await?;
        let created = load_product(&mut tx, product_id)
            .await?
            .ok_or_else(|| StoreError::not_found("product", product_id))?;

        tx.commit().await?;
        Ok(created)
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        load_product(&mut conn, product_id).await
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        let (filter, param_count) = product_filter_sql(query);
        let mut conn = self.pool.acquire().await?;

        let count_sql = format!("SELECT COUNT(*) AS total FROM products p{filter}");
        let total: i64 = bind_product_filters(sqlx::query(&count_sql), query)
            .fetch_one(&mut *conn)
            .await?
            .try_get("total")?;

        let mut sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p{filter} ORDER BY p.created_at ASC, p.id ASC"
        );
        push_paging(&mut sql, param_count, query.limit, query.offset);
        let rows = bind_paging(
            bind_product_filters(sqlx::query(&sql), query),
            query.limit,
            query.offset,
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut products = rows.iter().map(row_to_product).collect::<Result<Vec<_>>>()?;
        attach_categories(&mut conn, &mut products).await?;
        Ok(Page {
            items: products,
            total: total.max(0) as u64,
        })
    }

    async fn update_product(
        &self,
        product_id: ProductId,
        changes: ProductChanges,
    ) -> Result<Product> {
        if let Some(price) = changes.price {
            check_price_fits(price)?;
        }
        let mut tx = self.pool.begin().await?;
        if let Some(ref category_ids) = changes.category_ids {
            ensure_categories_exist(&mut tx, category_ids).await?;
        }
        let cart_ids = if changes.price.is_some() {
            lock_carts_holding(&mut tx, product_id).await?
        } else {
            Vec::new()
        };

        let result = sqlx::query(
            r#"
            UPDATE products SET
                name = COALESCE($2, name),
                price = COALESCE($3, price),
                description = COALESCE($4, description),
                count = COALESCE($5, count),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(changes.name)
        .bind(changes.price.map(|price| price.amount()))
        .bind(changes.description)
        .bind(changes.count.map(i64::from))
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("product", product_id));
        }

        if let Some(category_ids) = changes.category_ids {
            sqlx::query("DELETE FROM product_categories WHERE product_id = $1")
                .bind(product_id.as_uuid())
                .execute(&mut *tx)
                .await?;
            insert_category_links(&mut tx, product_id, &category_ids).await?;
        }
        if !cart_ids.is_empty() {
            tracing::debug!(%product_id, carts = cart_ids.len(), "repricing carts after price change");
        }
        for cart_id in cart_ids {
            recompute_cart(&mut tx, cart_id).await?;
        }

        let updated = load_product(&mut tx, product_id)
            .await?
            .ok_or_else(|| StoreError::not_found("product", product_id))?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_product(&self, product_id: ProductId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let cart_ids = lock_carts_holding(&mut tx, product_id).await?;

        // Cart lines, order lines and category links go with the product.
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        tracing::debug!(%product_id, carts = cart_ids.len(), "product deleted, recomputing carts");
        for cart_id in cart_ids {
            recompute_cart(&mut tx, cart_id).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn create_category(&self, name: &str) -> Result<Category> {
        let category = Category {
            id: CategoryId::new(),
            name: name.to_string(),
        };
        sqlx::query("INSERT INTO categories (id, name) VALUES ($1, $2)")
            .bind(category.id.as_uuid())
            .bind(&category.name)
            .execute(&self.pool)
            .await?;
        Ok(category)
    }

    async fn get_category(&self, category_id: CategoryId) -> Result<Option<Category>> {
        let row = sqlx::query("SELECT id, name FROM categories WHERE id = $1")
            .bind(category_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Category {
                id: CategoryId::from_uuid(row.try_get::<Uuid, _>("id")?),
                name: row.try_get("name")?,
            })),
            None => Ok(None),
        }
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let rows = sqlx::query("SELECT id, name FROM categories ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Category {
                    id: CategoryId::from_uuid(row.try_get::<Uuid, _>("id")?),
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn update_category(&self, category_id: CategoryId, name: &str) -> Result<Category> {
        let result = sqlx::query("UPDATE categories SET name = $2 WHERE id = $1")
            .bind(category_id.as_uuid())
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("category", category_id));
        }
        Ok(Category {
            id: category_id,
            name: name.to_string(),
        })
    }

    async fn delete_category(&self, category_id: CategoryId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(category_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn link_product_category(
        &self,
        product_id: ProductId,
        category_id: CategoryId,
    ) -> Result<ProductCategory> {
        let mut tx = self.pool.begin().await?;
        let product: Option<Uuid> = sqlx::query_scalar("SELECT id FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if product.is_none() {
            return Err(StoreError::not_found("product", product_id));
        }

        let category_name: Option<String> =
            sqlx::query_scalar("SELECT name FROM categories WHERE id = $1")
                .bind(category_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let Some(name) = category_name else {
            return Err(StoreError::not_found("category", category_id));
        };

        let id = ProductCategoryId::new();
        sqlx::query(
            "INSERT INTO product_categories (id, product_id, category_id) VALUES ($1, $2, $3)",
        )
        .bind(id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(category_id.as_uuid())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(ProductCategory {
            id,
            product_id,
            category: Category {
                id: category_id,
                name,
            },
        })
    }

    async fn get_product_category(
        &self,
        id: ProductCategoryId,
    ) -> Result<Option<ProductCategory>> {
        let row = sqlx::query(
            r#"
            SELECT pc.id, pc.product_id, c.id AS category_id, c.name AS category_name
            FROM product_categories pc
            JOIN categories c ON c.id = pc.category_id
            WHERE pc.id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_product_category).transpose()
    }

    async fn list_product_categories(&self) -> Result<Vec<ProductCategory>> {
        let rows = sqlx::query(
            r#"
            SELECT pc.id, pc.product_id, c.id AS category_id, c.name AS category_name
            FROM product_categories pc
            JOIN categories c ON c.id = pc.category_id
            ORDER BY pc.created_at ASC, pc.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_product_category).collect()
    }

    async fn delete_product_category(&self, id: ProductCategoryId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM product_categories WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_product_category(row: &PgRow) -> Result<ProductCategory> {
    Ok(ProductCategory {
        id: ProductCategoryId::from_uuid(row.try_get::<Uuid, _>("id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        category: Category {
            id: CategoryId::from_uuid(row.try_get::<Uuid, _>("category_id")?),
            name: row.try_get("category_name")?,
        },
    })
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn create_cart(&self, user_id: UserId) -> Result<CartDetail> {
        let mut tx = self.pool.begin().await?;
        let user: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if user.is_none() {
            return Err(StoreError::not_found("user", user_id));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO carts (id, user_id)
            VALUES ($1, $2)
            RETURNING id, user_id, is_ordered, total_price, created_at, updated_at
            "#,
        )
        .bind(CartId::new().as_uuid())
        .bind(user_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_error)?;
        let cart = row_to_cart(&row)?;

        tx.commit().await?;
        Ok(CartDetail {
            cart,
            lines: Vec::new(),
        })
    }

    async fn get_cart(&self, cart_id: CartId) -> Result<Option<CartDetail>> {
        let mut conn = self.pool.acquire().await?;
        load_cart(&mut conn, cart_id).await
    }

    async fn get_cart_for_user(&self, user_id: UserId) -> Result<Option<CartDetail>> {
        let mut conn = self.pool.acquire().await?;
        let cart_id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;
        match cart_id {
            Some(cart_id) => load_cart(&mut conn, CartId::from_uuid(cart_id)).await,
            None => Ok(None),
        }
    }

    async fn list_carts(&self, owner: Option<UserId>) -> Result<Vec<CartDetail>> {
        let mut conn = self.pool.acquire().await?;
        let cart_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM carts
            WHERE $1::uuid IS NULL OR user_id = $1
            ORDER BY created_at DESC, id ASC
            "#,
        )
        .bind(owner.map(|user_id| user_id.as_uuid()))
        .fetch_all(&mut *conn)
        .await?;

        let mut carts = Vec::with_capacity(cart_ids.len());
        for cart_id in cart_ids {
            if let Some(cart) = load_cart(&mut conn, CartId::from_uuid(cart_id)).await? {
                carts.push(cart);
            }
        }
        Ok(carts)
    }

    async fn set_cart_ordered(&self, cart_id: CartId, is_ordered: bool) -> Result<CartDetail> {
        let mut conn = self.pool.acquire().await?;
        let result =
            sqlx::query("UPDATE carts SET is_ordered = $2, updated_at = NOW() WHERE id = $1")
                .bind(cart_id.as_uuid())
                .bind(is_ordered)
                .execute(&mut *conn)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("cart", cart_id));
        }
        load_cart(&mut conn, cart_id)
            .await?
            .ok_or_else(|| StoreError::not_found("cart", cart_id))
    }

    async fn mutate_cart(&self, cart_id: CartId, mutation: CartMutation) -> Result<CartDetail> {
        let mut tx = self.pool.begin().await?;

        // Product before cart, the same order `update_product` and
        // `delete_product` lock in. The share lock keeps the price fixed
        // until the new line is priced and committed.
        let added_product = match &mutation {
            CartMutation::AddItem { product_id, .. } => Some(
                sqlx::query_scalar::<_, Uuid>(
                    "SELECT id FROM products WHERE id = $1 FOR SHARE",
                )
                .bind(product_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?,
            ),
            _ => None,
        };

        // Serializes concurrent mutations of this cart.
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM carts WHERE id = $1 FOR UPDATE")
                .bind(cart_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::not_found("cart", cart_id));
        }

        match mutation {
            CartMutation::AddItem {
                product_id,
                quantity,
            } => {
                if !matches!(added_product, Some(Some(_))) {
                    return Err(StoreError::not_found("product", product_id));
                }
                sqlx::query(
                    "INSERT INTO cart_items (id, cart_id, product_id, quantity) VALUES ($1, $2, $3, $4)",
                )
                .bind(CartItemId::new().as_uuid())
                .bind(cart_id.as_uuid())
                .bind(product_id.as_uuid())
                .bind(i64::from(quantity))
                .execute(&mut *tx)
                .await?;
            }
            CartMutation::UpdateItem { item_id, quantity } => {
                let result = sqlx::query(
                    "UPDATE cart_items SET quantity = $3 WHERE id = $1 AND cart_id = $2",
                )
                .bind(item_id.as_uuid())
                .bind(cart_id.as_uuid())
                .bind(i64::from(quantity))
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::not_found("cart item", item_id));
                }
            }
            CartMutation::RemoveItem { item_id } => {
                let result = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND cart_id = $2")
                    .bind(item_id.as_uuid())
                    .bind(cart_id.as_uuid())
                    .execute(&mut *tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::not_found("cart item", item_id));
                }
            }
        }

        recompute_cart(&mut tx, cart_id.as_uuid()).await?;
        let detail = load_cart(&mut tx, cart_id)
            .await?
            .ok_or_else(|| StoreError::not_found("cart", cart_id))?;
        tx.commit().await?;
        Ok(detail)
    }

    async fn delete_cart(&self, cart_id: CartId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM carts WHERE id = $1")
            .bind(cart_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn create_order(
        &self,
        user_id: UserId,
        lines: Vec<NewOrderLine>,
    ) -> Result<OrderDetail> {
        let mut tx = self.pool.begin().await?;
        let user: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if user.is_none() {
            return Err(StoreError::not_found("user", user_id));
        }

        let order_id = OrderId::new();
        sqlx::query("INSERT INTO orders (id, user_id, status) VALUES ($1, $2, $3)")
            .bind(order_id.as_uuid())
            .bind(user_id.as_uuid())
            .bind(OrderStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;

        // An early return drops the transaction, rolling back the order row.
        for line in &lines {
            let price: Option<Decimal> =
                sqlx::query_scalar("SELECT price FROM products WHERE id = $1")
                    .bind(line.product_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some(price) = price else {
                return Err(StoreError::not_found("product", line.product_id));
            };

            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(OrderItemId::new().as_uuid())
            .bind(order_id.as_uuid())
            .bind(line.product_id.as_uuid())
            .bind(i64::from(line.quantity))
            .bind(price)
            .execute(&mut *tx)
            .await?;
        }

        let detail = load_order(&mut tx, order_id)
            .await?
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        tx.commit().await?;
        Ok(detail)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderDetail>> {
        let mut conn = self.pool.acquire().await?;
        load_order(&mut conn, order_id).await
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<OrderDetail>> {
        let (filter, param_count) = order_filter_sql(query);
        let mut conn = self.pool.acquire().await?;

        let count_sql = format!("SELECT COUNT(*) AS total FROM orders{filter}");
        let total: i64 = bind_order_filters(sqlx::query(&count_sql), query)
            .fetch_one(&mut *conn)
            .await?
            .try_get("total")?;

        let mut sql = format!("SELECT id FROM orders{filter} ORDER BY created_at DESC, id ASC");
        push_paging(&mut sql, param_count, query.limit, query.offset);
        let rows = bind_paging(
            bind_order_filters(sqlx::query(&sql), query),
            query.limit,
            query.offset,
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let order_id = OrderId::from_uuid(row.try_get::<Uuid, _>("id")?);
            if let Some(detail) = load_order(&mut conn, order_id).await? {
                items.push(detail);
            }
        }
        Ok(Page {
            items,
            total: total.max(0) as u64,
        })
    }

    async fn set_order_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<OrderDetail> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 AND status = $3",
        )
        .bind(order_id.as_uuid())
        .bind(to.as_str())
        .bind(from.as_str())
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM orders WHERE id = $1")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?;
            return Err(match exists {
                Some(_) => StoreError::Conflict {
                    entity: "order",
                    id: order_id.to_string(),
                },
                None => StoreError::not_found("order", order_id),
            });
        }
        load_order(&mut conn, order_id)
            .await?
            .ok_or_else(|| StoreError::not_found("order", order_id))
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ResetCodeStore for PostgresStore {
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
        sqlx::query(
            "INSERT INTO password_reset_codes (id, email, code, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(record.id.as_uuid())
        .bind(&record.email)
        .bind(&record.code)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn latest_reset_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<Option<PasswordResetCode>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, code, created_at
            FROM password_reset_codes
            WHERE email = $1 AND code = $2
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_reset_code).transpose()
    }

    async fn consume_reset_code(
        &self,
        code_id: ResetCodeId,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM password_reset_codes WHERE id = $1")
            .bind(code_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::not_found("reset code", code_id));
        }

        let updated =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
                .bind(user_id.as_uuid())
                .bind(password_hash)
                .execute(&mut *tx)
                .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("user", user_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn purge_reset_codes_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM password_reset_codes WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
