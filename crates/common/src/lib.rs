//! Shared types for the shop backend.
//!
//! Identifiers, the fixed-point [`Money`] type with the [`PricingLedger`]
//! that derives cart and order totals, and the [`OrderStatus`] lifecycle.

mod money;
mod pricing;
mod status;
mod types;

pub use money::Money;
pub use pricing::{PricedLine, PricingLedger};
pub use status::{OrderStatus, ParseStatusError};
pub use types::{
    CartId, CartItemId, CategoryId, OrderId, OrderItemId, ProductCategoryId, ProductId,
    ResetCodeId, UserId,
};

pub use rust_decimal::Decimal;
