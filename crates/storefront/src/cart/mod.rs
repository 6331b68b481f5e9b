//! Order/cart reconciliation.
//!
//! [`CartStore`] decides which backend order, if any, is the current cart
//! and is the only component allowed to change it. Every mutation is a
//! two-phase command: issue the write, then re-fetch the canonical order.
//! Commands take `&mut self`, so at most one is in flight at a time.
//!
//! ```text
//! Uninitialized --hydrate--> Loaded | Empty (unknown id) | Uninitialized (unreachable)
//! Empty --first mutation--> (current order | create) --> Loaded
//! Loaded --stale (404 / "order not found")--> Empty
//! Loaded --reset (logout, checkout done, replace)--> Empty
//! ```

mod address_sync;


use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use vitrine_core::{
    AddressId, CheckoutReceipt, ConflictRecord, Identity, Order, OrderId, Product, ProductId,
    UserId,
};

use crate::api::Backend;
use crate::error::{Result, StorefrontError};
use crate::storage::{Storage, keys};

/// What the store currently knows about the cart.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OrderState {
    /// Persisted state has not been read yet.
    #[default]
    Uninitialized,
    /// No open order.
    Empty,
    /// Last canonical copy fetched from the backend.
    Loaded(Order),
}

/// Result of binding the anonymous order to a newly signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationOutcome {
    /// The backend now attributes the order to the user.
    Associated,
    /// No identity or no order; nothing was sent.
    NothingToAssociate,
    /// The user already had an open order. The record is kept until
    /// [`CartStore::resolve_conflict`] or [`CartStore::dismiss_conflict`].
    Conflict(ConflictRecord),
    /// The backend call failed; the failure has been logged.
    Failed(String),
}

/// How to settle a cart conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Keep the account's order; discard the anonymous one.
    KeepAccountOrder,
    /// Replace the account's order with the anonymous one.
    UseAnonymousOrder,
}

/// Client-side owner of the current order.
pub struct CartStore {
    backend: Arc<dyn Backend>,
    storage: Arc<dyn Storage>,
    identity: watch::Receiver<Option<Identity>>,
    state: OrderState,
    conflict: Option<ConflictRecord>,
    /// `(user, order)` pairs whose delivery address has been offered to the
    /// address book. In memory only.
    synced_addresses: HashSet<(UserId, OrderId)>,
}

impl std::fmt::Debug for CartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartStore")
            .field("state", &self.state)
            .field("conflict", &self.conflict)
            .finish_non_exhaustive()
    }
}

impl CartStore {
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        storage: Arc<dyn Storage>,
        identity: watch::Receiver<Option<Identity>>,
    ) -> Self {
        Self {
            backend,
            storage,
            identity,
            state: OrderState::Uninitialized,
            conflict: None,
            synced_addresses: HashSet::new(),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    #[must_use]
    pub const fn state(&self) -> &OrderState {
        &self.state
    }

    /// The loaded order, if any.
    #[must_use]
    pub const fn order(&self) -> Option<&Order> {
        match &self.state {
            OrderState::Loaded(order) => Some(order),
            OrderState::Uninitialized | OrderState::Empty => None,
        }
    }

    /// Owned copy of the loaded order.
    #[must_use]
    pub fn snapshot(&self) -> Option<Order> {
        self.order().cloned()
    }

    #[must_use]
    pub fn order_id(&self) -> Option<OrderId> {
        self.order().map(|order| order.id)
    }

    #[must_use]
    pub const fn pending_conflict(&self) -> Option<&ConflictRecord> {
        self.conflict.as_ref()
    }

    /// Identity currently published by the session.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restore the order referenced by persisted state.
    ///
    /// Never fails: an unknown order is forgotten and the cart starts empty.
    /// When the backend cannot be reached the persisted id is kept and the
    /// store stays uninitialized, so a later `hydrate`, `refresh` or
    /// mutation retries. Does nothing once the store has been initialized.
    #[instrument(skip(self))]
    pub async fn hydrate(&mut self) {
        if self.state != OrderState::Uninitialized {
            return;
        }
        if let Err(e) = self.restore().await {
            warn!(error = %e, "Could not load persisted order; keeping it for a retry");
        }
    }

    /// Re-fetch the current order, or retry restoring the persisted one.
    ///
    /// # Errors
    ///
    /// Returns the backend error. A stale order resets the cart first.
    #[instrument(skip(self))]
    pub async fn refresh(&mut self) -> Result<()> {
        if self.state == OrderState::Uninitialized {
            return self.restore().await;
        }
        match self.order_id() {
            Some(id) => self.load_or_reset(id).await,
            None => Ok(()),
        }
    }

    /// Forget the current order locally and in persisted state.
    ///
    /// The pending conflict, if any, is left alone.
    pub fn reset(&mut self) {
        if self.state != OrderState::Empty {
            debug!(order_id = ?self.order_id(), "Cart reset");
        }
        self.state = OrderState::Empty;
        if let Err(e) = self.storage.remove(keys::ORDER_ID) {
            warn!(error = %e, "Could not clear persisted order id");
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Add one unit of `product`, creating the order if needed.
    ///
    /// If the backend no longer recognises the order, the cart is reset and
    /// the add is retried once on a fresh order.
    ///
    /// # Errors
    ///
    /// Returns a validation error for out-of-stock products, or the backend
    /// error from the (retried) write.
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn add_item(&mut self, product: &Product) -> Result<()> {
        if !product.in_stock() {
            return Err(StorefrontError::Validation(format!(
                "{} is out of stock",
                product.name
            )));
        }

        let id = self.resolve_order().await?;
        let write = self.backend.add_item(id, product.id, 1).await;
        match write {
            Err(e) if e.is_stale_order() => {
                warn!(order_id = %id, error = %e, "Order is stale; retrying on a fresh order");
                self.reset();
                let fresh = self.resolve_order().await?;
                let retry = self.backend.add_item(fresh, product.id, 1).await;
                self.commit(fresh, retry).await
            }
            write => self.commit(id, write).await,
        }
    }

    /// Remove a product's line. No-op without an order.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    #[instrument(skip(self))]
    pub async fn remove_item(&mut self, product_id: ProductId) -> Result<()> {
        let Some(id) = self.order_id() else {
            return Ok(());
        };
        let write = self.backend.remove_item(id, product_id).await;
        self.commit(id, write).await
    }

    /// Set a line's quantity; zero removes the line.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError::UnknownLine`] if the product has no line
    /// in the order (nothing is sent), or the backend error.
    #[instrument(skip(self))]
    pub async fn set_quantity(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        let id = match self.order() {
            Some(order) if order.line(product_id).is_some() => order.id,
            _ => return Err(StorefrontError::UnknownLine(product_id)),
        };
        if quantity == 0 {
            return self.remove_item(product_id).await;
        }

        let write = self.backend.set_quantity(id, product_id, quantity).await;
        self.commit(id, write).await
    }

    /// Apply a coupon code, creating the order if needed.
    ///
    /// Callers should not offer coupon entry once
    /// [`Order::has_coupon`] is true; the backend rejects a second coupon.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank code, or the backend's
    /// rejection (message surfaced verbatim).
    #[instrument(skip(self))]
    pub async fn apply_coupon(&mut self, code: &str) -> Result<()> {
        let code = code.trim();
        if code.is_empty() {
            return Err(StorefrontError::Validation("enter a coupon code".to_string()));
        }

        let id = self.resolve_order().await?;
        let write = self.backend.apply_coupon(id, code).await;
        self.commit(id, write).await
    }

    /// Delete every line. The order itself stays open.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    #[instrument(skip(self))]
    pub async fn clear_items(&mut self) -> Result<()> {
        let Some(id) = self.order_id() else {
            return Ok(());
        };
        let write = self.backend.clear_items(id).await;
        self.commit(id, write).await
    }

    /// Compute shipping to a saved address, creating the order if needed.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    #[instrument(skip(self))]
    pub async fn apply_shipping(&mut self, address_id: AddressId) -> Result<()> {
        let id = self.resolve_order().await?;
        let write = self.backend.apply_shipping(id, address_id).await;
        self.commit(id, write).await
    }

    /// Place the order. On success the cart is reset.
    ///
    /// # Errors
    ///
    /// Returns a validation error without an order, or the backend error;
    /// the cart is untouched on failure.
    #[instrument(skip(self))]
    pub async fn finalize(&mut self) -> Result<CheckoutReceipt> {
        let Some(id) = self.order_id() else {
            return Err(StorefrontError::Validation("there is no open order".to_string()));
        };
        let receipt = self.backend.finalize(id).await?;
        info!(order_id = %id, status = ?receipt.status, "Order placed");
        self.reset();
        Ok(receipt)
    }

    // =========================================================================
    // Identity association
    // =========================================================================

    /// Attribute the current order to the signed-in user.
    ///
    /// Call after an identity becomes available. Never fails; a conflict is
    /// recorded and returned, other failures are logged.
    #[instrument(skip(self))]
    pub async fn associate_identity(&mut self) -> AssociationOutcome {
        let Some(identity) = self.identity() else {
            return AssociationOutcome::NothingToAssociate;
        };
        let Some(id) = self.order_id() else {
            return AssociationOutcome::NothingToAssociate;
        };

        match self.backend.associate_cart().await {
            Ok(()) => {
                debug!(order_id = %id, user_id = %identity.user_id, "Order associated");
                self.sync_delivery_address().await;
                AssociationOutcome::Associated
            }
            Err(StorefrontError::Conflict(record)) => {
                info!(
                    user_order_id = %record.user_order_id,
                    anonymous_order_id = %record.anonymous_order_id,
                    "Cart conflict detected"
                );
                self.conflict = Some(record.clone());
                AssociationOutcome::Conflict(record)
            }
            Err(e) => {
                warn!(order_id = %id, error = %e, "Order association failed");
                AssociationOutcome::Failed(e.user_message("Could not link your cart to your account."))
            }
        }
    }

    /// Settle a pending conflict.
    ///
    /// The record is cleared whether or not the backend call succeeds;
    /// failures are logged. Does nothing without a pending conflict.
    #[instrument(skip(self))]
    pub async fn resolve_conflict(&mut self, choice: ConflictChoice) {
        let Some(record) = self.conflict.take() else {
            return;
        };

        match choice {
            ConflictChoice::KeepAccountOrder => {
                if let Err(e) = self.backend.discard_anonymous().await {
                    warn!(anonymous_order_id = %record.anonymous_order_id, error = %e, "Discarding anonymous order failed");
                }
                self.reload_after_discard().await;
            }
            ConflictChoice::UseAnonymousOrder => {
                if let Err(e) = self.backend.replace_with_anonymous().await {
                    warn!(user_order_id = %record.user_order_id, error = %e, "Replacing account order failed");
                }
                self.reset();
            }
        }
    }

    /// Drop a pending conflict without contacting the backend.
    pub fn dismiss_conflict(&mut self) {
        if self.conflict.take().is_some() {
            debug!("Cart conflict dismissed");
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Id of the order mutations should target, creating or adopting one
    /// when the cart is empty.
    async fn resolve_order(&mut self) -> Result<OrderId> {
        if self.state == OrderState::Uninitialized {
            self.restore().await?;
        }
        if let Some(id) = self.order_id() {
            return Ok(id);
        }

        if self.identity().is_some()
            && let Some(order) = self.backend.current_order().await?
        {
            let id = order.id;
            debug!(order_id = %id, "Adopted account order");
            self.adopt(order).await;
            return Ok(id);
        }

        let id = self.backend.create_order().await?;
        debug!(order_id = %id, "Order created");
        self.load(id).await?;
        Ok(id)
    }

    /// Load the order named by persisted state.
    ///
    /// A missing, unreadable or stale id leaves the cart Empty. Any other
    /// failure is returned with the state and the persisted id untouched.
    async fn restore(&mut self) -> Result<()> {
        let persisted = self.storage.get(keys::ORDER_ID);
        let Some(id) = persisted.as_deref().and_then(OrderId::from_persisted) else {
            if persisted.is_some() {
                debug!("Discarding unreadable persisted order id");
            }
            self.reset();
            return Ok(());
        };

        match self.load(id).await {
            Err(e) if e.is_stale_order() => {
                debug!(order_id = %id, error = %e, "Persisted order is gone; starting empty");
                self.reset();
                Ok(())
            }
            other => other,
        }
    }

    /// Fetch `id` and make it the current order.
    async fn load(&mut self, id: OrderId) -> Result<()> {
        let order = self.backend.get_order(id).await?;
        self.adopt(order).await;
        Ok(())
    }

    async fn load_or_reset(&mut self, id: OrderId) -> Result<()> {
        match self.load(id).await {
            Err(e) if e.is_stale_order() => {
                self.reset();
                Err(e)
            }
            other => other,
        }
    }

    /// Second phase of a mutation: re-fetch on success, reset on a stale
    /// order, otherwise leave state untouched.
    async fn commit(&mut self, id: OrderId, write: Result<()>) -> Result<()> {
        if let Err(e) = write {
            if e.is_stale_order() {
                self.reset();
            }
            return Err(e);
        }
        self.load_or_reset(id).await
    }

    async fn adopt(&mut self, order: Order) {
        if let Err(e) = self.storage.set(keys::ORDER_ID, &order.id.to_string()) {
            warn!(order_id = %order.id, error = %e, "Could not persist order id");
        }
        self.state = OrderState::Loaded(order);
        self.sync_delivery_address().await;
    }

    async fn reload_after_discard(&mut self) {
        let known = self.order_id();
        match self.backend.current_order().await {
            Ok(Some(order)) => self.adopt(order).await,
            Ok(None) => self.reset(),
            Err(e) => {
                warn!(error = %e, "Current order lookup failed after discard");
                if let Some(id) = known
                    && let Err(e) = self.load_or_reset(id).await
                {
                    warn!(order_id = %id, error = %e, "Reloading order after discard failed");
                }
            }
        }
    }
}
