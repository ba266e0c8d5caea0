//! Orders: created atomically from product/quantity pairs, then moved
//! through their lifecycle.

use common::{OrderId, OrderStatus};
use store::{NewOrderLine, OrderDetail, OrderQuery, Page, Store, StoreError};

use crate::access::{self, Actor};
use crate::DomainError;

/// Service for orders.
pub struct OrderService<S: Store> {
    store: S,
}

impl<S: Store> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    async fn load(&self, actor: &Actor, order_id: OrderId) -> Result<OrderDetail, DomainError> {
        access::require_authenticated(actor)?;
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("order", order_id))?;
        access::require_owner_or_admin(actor, order, "order", order_id)
    }

    /// Places a pending order for the caller.
    ///
    /// Every product must exist and every quantity must be at least 1;
    /// otherwise nothing is written.
    #[tracing::instrument(skip(self, actor, lines), fields(lines = lines.len()))]
    pub async fn create(
        &self,
        actor: &Actor,
        lines: Vec<NewOrderLine>,
    ) -> Result<OrderDetail, DomainError> {
        let caller = access::require_authenticated(actor)?;
        if lines.is_empty() {
            return Err(DomainError::validation(
                "order_items",
                "Ensure this field has at least 1 elements.",
            ));
        }
        if lines.iter().any(|line| line.quantity < 1) {
            return Err(DomainError::validation(
                "order_items",
                "Ensure every quantity is greater than or equal to 1.",
            ));
        }

        let order = self.store.create_order(caller.id, lines).await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.order.id,
            user_id = %caller.id,
            total_amount = %order.total_amount(),
            "order created"
        );
        Ok(order)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn get(&self, actor: &Actor, order_id: OrderId) -> Result<OrderDetail, DomainError> {
        self.load(actor, order_id).await
    }

    /// Lists orders. Non-staff callers are restricted to their own orders
    /// regardless of the query's user filter.
    #[tracing::instrument(skip(self, actor))]
    pub async fn list(
        &self,
        actor: &Actor,
        query: OrderQuery,
    ) -> Result<Page<OrderDetail>, DomainError> {
        let caller = access::require_authenticated(actor)?;
        let query = match access::listing_scope(caller) {
            Some(user_id) => query.user(user_id),
            None => query,
        };
        Ok(self.store.list_orders(&query).await?)
    }

    /// Moves an order to `status`.
    ///
    /// Allowed: pending → processing → completed, and pending or processing
    /// → cancelled. Setting the current status again changes nothing.
    #[tracing::instrument(skip(self, actor))]
    pub async fn set_status(
        &self,
        actor: &Actor,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<OrderDetail, DomainError> {
        let order = self.load(actor, order_id).await?;
        let current = order.order.status;
        if current == status {
            return Ok(order);
        }
        if !current.can_transition_to(status) {
            return Err(DomainError::validation(
                "status",
                format!("Cannot change status from {current} to {status}."),
            ));
        }

        let order = match self
            .store
            .set_order_status(order_id, current, status)
            .await
        {
            Ok(order) => order,
            Err(StoreError::Conflict { .. }) => {
                return Err(DomainError::validation(
                    "status",
                    format!("Order status changed from {current} while updating; retry."),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(%order_id, from = %current, to = %status, "order status changed");
        Ok(order)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn delete(&self, actor: &Actor, order_id: OrderId) -> Result<(), DomainError> {
        self.load(actor, order_id).await?;
        if !self.store.delete_order(order_id).await? {
            return Err(DomainError::not_found("order", order_id));
        }
        tracing::info!(%order_id, "order deleted");
        Ok(())
    }
}
