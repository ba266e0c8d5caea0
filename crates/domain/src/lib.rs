//! Domain layer for the shop backend.
//!
//! This crate provides the rules on top of the store:
//! - Cart and order services whose totals come from the pricing ledger
//! - The password reset code authority
//! - Access control predicates shared by every service
//! - Accounts, catalog, token issuance and the outgoing mail queue

pub mod access;
pub mod accounts;
pub mod cart;
pub mod catalog;
pub mod clock;
pub mod credentials;
pub mod error;
pub mod mail;
pub mod orders;
pub mod reset;
pub mod tokens;
pub mod validation;

pub use access::{Actor, Owned, is_admin, is_authenticated, is_owner_or_admin};
pub use accounts::{AccountService, AccountUpdate, Registration};
pub use cart::CartService;
pub use catalog::{CatalogService, ProductDraft, ProductUpdate};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::PasswordHasher;
pub use error::DomainError;
pub use mail::{
    EmailMessage, EmailSender, LogEmailSender, MailError, MailQueue, RecordingEmailSender,
    RetryPolicy,
};
pub use orders::OrderService;
pub use reset::{RESET_CODE_VALIDITY_SECS, ResetCodeAuthority, spawn_reset_code_sweeper};
pub use tokens::{Claims, TokenIssuer, TokenPair, TokenType};
