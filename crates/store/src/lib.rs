//! Persistence layer for the shop backend.
//!
//! The [`Store`] trait family describes every read and every atomic write
//! the domain needs. Two implementations are provided: [`InMemoryStore`]
//! for tests and local runs, and [`PostgresStore`] for production.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use models::{
    Cart, CartDetail, CartItem, CartLine, CartMutation, Category, NewOrderLine, NewProduct,
    NewUser, Order, OrderDetail, OrderItem, OrderLine, Page, PasswordResetCode, Product,
    ProductCategory, ProductChanges, User, UserChanges,
};
pub use postgres::PostgresStore;
pub use query::{OrderQuery, ProductQuery};
pub use store::{
    AccountStore, CartStore, CartStoreExt, CatalogStore, OrderStore, ResetCodeStore, Store,
};
