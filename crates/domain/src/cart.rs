//! One cart per user, priced by the ledger on every change.

use common::{CartId, CartItemId, ProductId, UserId};
use store::{CartDetail, CartMutation, CartStoreExt, Store, StoreError};

use crate::access::{self, Actor};
use crate::validation::validate_quantity;
use crate::DomainError;

/// Service for carts and their lines.
///
/// Each line mutation is applied by the store together with the total
/// recompute, so a returned cart always satisfies
/// `total_price == round(Σ price * quantity, 2)`.
pub struct CartService<S: Store> {
    store: S,
}

impl<S: Store> CartService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Loads a cart the actor may see.
    async fn load(&self, actor: &Actor, cart_id: CartId) -> Result<CartDetail, DomainError> {
        access::require_authenticated(actor)?;
        let cart = self
            .store
            .get_cart(cart_id)
            .await?
            .ok_or_else(|| DomainError::not_found("cart", cart_id))?;
        access::require_owner_or_admin(actor, cart, "cart", cart_id)
    }

    /// Creates a cart for `owner`, or for the caller when `owner` is `None`.
    ///
    /// Only staff may create a cart for someone else. A second cart for the
    /// same user is a validation error.
    #[tracing::instrument(skip(self, actor))]
    pub async fn create(
        &self,
        actor: &Actor,
        owner: Option<UserId>,
    ) -> Result<CartDetail, DomainError> {
        let caller = access::require_authenticated(actor)?;
        let owner = owner.unwrap_or(caller.id);
        if owner != caller.id && !caller.is_staff {
            return Err(DomainError::Forbidden);
        }

        match self.store.create_cart(owner).await {
            Ok(cart) => {
                tracing::info!(cart_id = %cart.cart.id, user_id = %owner, "cart created");
                Ok(cart)
            }
            Err(StoreError::UniqueViolation { .. }) => Err(DomainError::validation(
                "user",
                "cart already exists",
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the caller's cart, creating it on first use.
    #[tracing::instrument(skip(self, actor))]
    pub async fn get_or_create_mine(&self, actor: &Actor) -> Result<CartDetail, DomainError> {
        let caller = access::require_authenticated(actor)?;
        Ok(self.store.get_or_create_cart(caller.id).await?)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn get(&self, actor: &Actor, cart_id: CartId) -> Result<CartDetail, DomainError> {
        self.load(actor, cart_id).await
    }

    /// Staff see every cart, other users only their own.
    #[tracing::instrument(skip(self, actor))]
    pub async fn list(&self, actor: &Actor) -> Result<Vec<CartDetail>, DomainError> {
        let caller = access::require_authenticated(actor)?;
        Ok(self.store.list_carts(access::listing_scope(caller)).await?)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn set_ordered(
        &self,
        actor: &Actor,
        cart_id: CartId,
        is_ordered: bool,
    ) -> Result<CartDetail, DomainError> {
        self.load(actor, cart_id).await?;
        Ok(self.store.set_cart_ordered(cart_id, is_ordered).await?)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn delete(&self, actor: &Actor, cart_id: CartId) -> Result<(), DomainError> {
        self.load(actor, cart_id).await?;
        if !self.store.delete_cart(cart_id).await? {
            return Err(DomainError::not_found("cart", cart_id));
        }
        tracing::info!(%cart_id, "cart deleted");
        Ok(())
    }

    /// Adds a new line. Adding a product already in the cart adds another line.
    #[tracing::instrument(skip(self, actor))]
    pub async fn add_item(
        &self,
        actor: &Actor,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartDetail, DomainError> {
        validate_quantity("quantity", quantity)?;
        self.load(actor, cart_id).await?;
        self.mutate(
            cart_id,
            CartMutation::AddItem {
                product_id,
                quantity,
            },
        )
        .await
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn update_item(
        &self,
        actor: &Actor,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<CartDetail, DomainError> {
        validate_quantity("quantity", quantity)?;
        self.load(actor, cart_id).await?;
        self.mutate(cart_id, CartMutation::UpdateItem { item_id, quantity })
            .await
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn remove_item(
        &self,
        actor: &Actor,
        cart_id: CartId,
        item_id: CartItemId,
    ) -> Result<CartDetail, DomainError> {
        self.load(actor, cart_id).await?;
        self.mutate(cart_id, CartMutation::RemoveItem { item_id })
            .await
    }

    async fn mutate(
        &self,
        cart_id: CartId,
        mutation: CartMutation,
    ) -> Result<CartDetail, DomainError> {
        let kind = match mutation {
            CartMutation::AddItem { .. } => "add",
            CartMutation::UpdateItem { .. } => "update",
            CartMutation::RemoveItem { .. } => "remove",
        };
        let cart = self.store.mutate_cart(cart_id, mutation).await?;

        metrics::counter!("cart_mutations_total", "kind" => kind).increment(1);
        tracing::debug!(
            %cart_id,
            kind,
            total_price = %cart.cart.total_price,
            lines = cart.product_count(),
            "cart repriced"
        );
        Ok(cart)
    }
}
