//! Who may see and change what.
//!
//! Every service goes through these predicates. Owner-scoped resources
//! (accounts, carts, orders) answer a non-owner with `NotFound` so their
//! existence is not revealed; catalog writes answer a non-admin with
//! `Forbidden`.

use common::UserId;
use store::{Cart, CartDetail, Order, OrderDetail, User};

use crate::DomainError;

/// The caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Actor {
    /// No credentials were presented.
    #[default]
    Anonymous,

    /// An authenticated user.
    User(User),
}

impl Actor {
    pub fn user(&self) -> Option<&User> {
        match self {
            Actor::Anonymous => None,
            Actor::User(user) => Some(user),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user().map(|user| user.id)
    }
}

impl From<User> for Actor {
    fn from(user: User) -> Self {
        Actor::User(user)
    }
}

/// A resource with a single owning user.
pub trait Owned {
    fn owner_id(&self) -> UserId;
}

impl Owned for User {
    fn owner_id(&self) -> UserId {
        self.id
    }
}

impl Owned for Cart {
    fn owner_id(&self) -> UserId {
        self.user_id
    }
}

impl Owned for CartDetail {
    fn owner_id(&self) -> UserId {
        self.cart.user_id
    }
}

impl Owned for Order {
    fn owner_id(&self) -> UserId {
        self.user_id
    }
}

impl Owned for OrderDetail {
    fn owner_id(&self) -> UserId {
        self.order.user_id
    }
}

pub fn is_authenticated(actor: &Actor) -> bool {
    matches!(actor, Actor::User(_))
}

pub fn is_admin(user: &User) -> bool {
    user.is_staff || user.is_superuser
}

pub fn is_owner_or_admin<R: Owned + ?Sized>(user: &User, resource: &R) -> bool {
    user.is_staff || resource.owner_id() == user.id
}

/// Returns the authenticated user or an authentication error.
pub fn require_authenticated(actor: &Actor) -> Result<&User, DomainError> {
    actor.user().ok_or_else(|| {
        DomainError::Authentication("Authentication credentials were not provided.".to_string())
    })
}

/// Returns the authenticated admin, `Forbidden` for other users.
pub fn require_admin(actor: &Actor) -> Result<&User, DomainError> {
    let user = require_authenticated(actor)?;
    if !is_admin(user) {
        return Err(DomainError::Forbidden);
    }
    Ok(user)
}

/// Passes the resource through if the actor owns it or is staff.
///
/// Anyone else gets `NotFound` for `entity`/`id`.
pub fn require_owner_or_admin<R: Owned>(
    actor: &Actor,
    resource: R,
    entity: &'static str,
    id: impl ToString,
) -> Result<R, DomainError> {
    let user = require_authenticated(actor)?;
    if !is_owner_or_admin(user, &resource) {
        return Err(DomainError::not_found(entity, id));
    }
    Ok(resource)
}

/// The owner filter for a listing: `None` for staff, otherwise the caller.
pub fn listing_scope(user: &User) -> Option<UserId> {
    if user.is_staff { None } else { Some(user.id) }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn user(is_staff: bool, is_superuser: bool) -> User {
        User {
            id: UserId::new(),
            email: "user@example.com".to_string(),
            password_hash: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            phone_number: String::new(),
            is_staff,
            is_superuser,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn owner_and_staff_pass_others_do_not() {
        let owner = user(false, false);
        let stranger = user(false, false);
        let staff = user(true, false);

        assert!(is_owner_or_admin(&owner, &owner));
        assert!(is_owner_or_admin(&staff, &owner));
        assert!(!is_owner_or_admin(&stranger, &owner));
    }

    #[test]
    fn superuser_without_staff_is_admin_but_not_owner_bypass() {
        let superuser = user(false, true);
        let owner = user(false, false);

        assert!(is_admin(&superuser));
        assert!(!is_owner_or_admin(&superuser, &owner));
    }

    #[test]
    fn non_owner_sees_not_found() {
        let owner = user(false, false);
        let stranger = Actor::User(user(false, false));

        let result = require_owner_or_admin(&stranger, owner.clone(), "user", owner.id);
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[test]
    fn anonymous_is_unauthenticated_and_not_admin() {
        assert!(!is_authenticated(&Actor::Anonymous));
        assert!(matches!(
            require_admin(&Actor::Anonymous),
            Err(DomainError::Authentication(_))
        ));
        assert!(matches!(
            require_admin(&Actor::User(user(false, false))),
            Err(DomainError::Forbidden)
        ));
        assert!(require_admin(&Actor::User(user(true, false))).is_ok());
    }

    #[test]
    fn listing_scope_is_unrestricted_for_staff() {
        let staff = user(true, false);
        let regular = user(false, false);
        assert_eq!(listing_scope(&staff), None);
        assert_eq!(listing_scope(&regular), Some(regular.id));
    }
}
