//! Checkout flow: Summary → Address → Confirmation.
//!
//! [`CheckoutFlow`] is a linear, resumable step sequence over a
//! [`CartStore`]. Forward moves only happen through each step's own action
//! (its gate); going back to an earlier step is always allowed, and the
//! steps after it must then be passed again. Failures never change the order; they set an
//! inline banner ([`CheckoutFlow::error`]) that the next successful action
//! clears.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};
use vitrine_core::{
    AddressId, CheckoutReceipt, CheckoutStep, DeliveryAddress, LineItem, Money, NewAddress,
    SavedAddress,
};

use crate::api::Backend;
use crate::cart::CartStore;
use crate::error::StorefrontError;

/// Where checkout sends the user back to after login.
pub const CHECKOUT_PATH: &str = "/checkout";

const ADDRESSES_FALLBACK: &str = "Could not load your addresses.";
const REGISTER_FALLBACK: &str = "Could not save the address.";
const SHIPPING_FALLBACK: &str = "Could not calculate shipping.";
const FINALIZE_FALLBACK: &str = "Could not place the order.";
const CLEAR_FALLBACK: &str = "Could not clear the cart.";

/// Navigation requested by the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Back to the product grid.
    Catalog,
    /// Sign in, then come back to `return_to`.
    Login { return_to: String },
}

impl Redirect {
    fn login() -> Self {
        Self::Login {
            return_to: CHECKOUT_PATH.to_string(),
        }
    }
}

/// Outcome of placing the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Order placed; the cart has been reset.
    Completed(CheckoutReceipt),
    /// The backend wants a (fresh) login first.
    LoginRequired { return_to: String },
    /// Rejected; the flow stays on Confirmation with this message.
    Rejected(String),
}

/// Step-gate violations and wrapped backend failures.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("the cart is empty")]
    EmptyCart,
    #[error("select a delivery address first")]
    NoAddressSelected,
    #[error("address {0} is not in your address book")]
    UnknownAddress(AddressId),
    #[error("not available on the {0} step")]
    WrongStep(CheckoutStep),
    #[error(transparent)]
    Storefront(#[from] StorefrontError),
}

/// Read-only projection shown on Summary and Confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSummary {
    pub items: Vec<LineItem>,
    pub discount: Money,
    pub shipping_cost: Money,
    pub promotional_shipping: bool,
    pub coupon_code: Option<String>,
    pub total: Money,
    /// Label of the address the order ships to, once shipping is applied.
    pub delivery_to: Option<String>,
}

/// State of one checkout session.
pub struct CheckoutFlow {
    backend: Arc<dyn Backend>,
    step: CheckoutStep,
    addresses: Vec<SavedAddress>,
    selected: Option<AddressId>,
    error: Option<String>,
}

impl std::fmt::Debug for CheckoutFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutFlow")
            .field("step", &self.step)
            .field("selected", &self.selected)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl CheckoutFlow {
    /// Start checkout for the cart's current order.
    ///
    /// # Errors
    ///
    /// Returns the redirect to follow when there is no order (catalog) or
    /// no signed-in user (login, returning to checkout).
    pub fn enter(cart: &CartStore) -> Result<Self, Redirect> {
        if cart.order().is_none() {
            return Err(Redirect::Catalog);
        }
        if cart.identity().is_none() {
            return Err(Redirect::login());
        }

        Ok(Self {
            backend: Arc::clone(cart.backend()),
            step: CheckoutStep::Summary,
            addresses: Vec::new(),
            selected: None,
            error: None,
        })
    }

    #[must_use]
    pub const fn step(&self) -> CheckoutStep {
        self.step
    }

    /// Inline error banner.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Saved addresses loaded on the Address step.
    #[must_use]
    pub fn addresses(&self) -> &[SavedAddress] {
        &self.addresses
    }

    #[must_use]
    pub const fn selected_address(&self) -> Option<AddressId> {
        self.selected
    }

    /// Display projection of the order, including where it ships to.
    #[must_use]
    pub fn summary(&self, cart: &CartStore) -> Option<CheckoutSummary> {
        let order = cart.order()?;
        let delivery_to = order.delivery_address.as_ref().map(DeliveryAddress::label);

        Some(CheckoutSummary {
            items: order.items.clone(),
            discount: order.discount,
            shipping_cost: order.shipping_cost,
            promotional_shipping: order.promotional_shipping,
            coupon_code: order.coupon_code.clone(),
            total: order.total,
            delivery_to,
        })
    }

    /// Go back to an earlier step (or stay on the current one).
    ///
    /// Never moves forward: leaving Address again requires
    /// [`CheckoutFlow::calculate_shipping`], so the order always ships to the
    /// address shown on Confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::WrongStep`] for a step after the current one.
    pub fn back_to(&mut self, step: CheckoutStep) -> Result<(), CheckoutError> {
        if step > self.step {
            return Err(CheckoutError::WrongStep(step));
        }
        self.step = step;
        self.error = None;
        Ok(())
    }

    // =========================================================================
    // Summary
    // =========================================================================

    /// Leave Summary for Address and load the address book.
    ///
    /// A failed address load does not block the move; it shows a retryable
    /// banner instead (see [`CheckoutFlow::reload_addresses`]).
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::EmptyCart`] when the order has no lines.
    #[instrument(skip(self, cart))]
    pub async fn proceed_to_address(&mut self, cart: &CartStore) -> Result<(), CheckoutError> {
        self.expect_step(CheckoutStep::Summary)?;
        if cart.order().is_none_or(vitrine_core::Order::is_empty) {
            return self.fail(CheckoutError::EmptyCart);
        }

        self.advance(CheckoutStep::Address);
        self.reload_addresses().await;
        Ok(())
    }

    /// Empty the cart and leave checkout.
    ///
    /// # Errors
    ///
    /// Returns the backend failure; the flow stays on Summary.
    #[instrument(skip(self, cart))]
    pub async fn clear_cart(&mut self, cart: &mut CartStore) -> Result<Redirect, CheckoutError> {
        self.expect_step(CheckoutStep::Summary)?;
        if let Err(e) = cart.clear_items().await {
            self.error = Some(e.user_message(CLEAR_FALLBACK));
            return Err(e.into());
        }
        cart.reset();
        self.error = None;
        Ok(Redirect::Catalog)
    }

    // =========================================================================
    // Address
    // =========================================================================

    /// (Re)load saved addresses. Failures set the banner.
    #[instrument(skip(self))]
    pub async fn reload_addresses(&mut self) {
        match self.backend.list_addresses().await {
            Ok(addresses) => {
                if self
                    .selected
                    .is_some_and(|id| !addresses.iter().any(|address| address.id == id))
                {
                    self.selected = None;
                }
                debug!(count = addresses.len(), "Loaded saved addresses");
                self.addresses = addresses;
                self.error = None;
            }
            Err(e) => {
                warn!(error = %e, "Could not load saved addresses");
                self.error = Some(e.user_message(ADDRESSES_FALLBACK));
            }
        }
    }

    /// Choose a saved address.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::UnknownAddress`] for an id not in the list.
    pub fn select_address(&mut self, id: AddressId) -> Result<(), CheckoutError> {
        self.expect_step(CheckoutStep::Address)?;
        if !self.addresses.iter().any(|address| address.id == id) {
            return self.fail(CheckoutError::UnknownAddress(id));
        }
        self.selected = Some(id);
        self.error = None;
        Ok(())
    }

    /// Validate and save a new address; it becomes the selection.
    ///
    /// # Errors
    ///
    /// Returns the local validation error (nothing sent) or the backend
    /// failure.
    #[instrument(skip(self, address))]
    pub async fn register_address(
        &mut self,
        address: NewAddress,
    ) -> Result<SavedAddress, CheckoutError> {
        self.expect_step(CheckoutStep::Address)?;
        if let Err(e) = address.validate() {
            return self.fail(StorefrontError::from(e).into());
        }

        match self.backend.create_address(&address).await {
            Ok(saved) => {
                debug!(address_id = %saved.id, "Address registered");
                self.selected = Some(saved.id);
                self.addresses.push(saved.clone());
                self.error = None;
                Ok(saved)
            }
            Err(e) => {
                self.error = Some(e.user_message(REGISTER_FALLBACK));
                Err(e.into())
            }
        }
    }

    /// Apply shipping to the selected address and move to Confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NoAddressSelected`] or the backend failure;
    /// the flow stays on Address.
    #[instrument(skip(self, cart))]
    pub async fn calculate_shipping(&mut self, cart: &mut CartStore) -> Result<(), CheckoutError> {
        self.expect_step(CheckoutStep::Address)?;
        let Some(address_id) = self.selected else {
            return self.fail(CheckoutError::NoAddressSelected);
        };

        if let Err(e) = cart.apply_shipping(address_id).await {
            self.error = Some(e.user_message(SHIPPING_FALLBACK));
            return Err(e.into());
        }
        self.advance(CheckoutStep::Confirmation);
        Ok(())
    }

    // =========================================================================
    // Confirmation
    // =========================================================================

    /// Place the order.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::WrongStep`] outside Confirmation. Backend
    /// failures are reported through [`FinalizeOutcome`].
    #[instrument(skip(self, cart))]
    pub async fn finalize(&mut self, cart: &mut CartStore) -> Result<FinalizeOutcome, CheckoutError> {
        self.expect_step(CheckoutStep::Confirmation)?;

        match cart.finalize().await {
            Ok(receipt) => {
                self.error = None;
                Ok(FinalizeOutcome::Completed(receipt))
            }
            Err(e) if e.is_auth() => {
                debug!(error = %e, "Finalize needs a fresh login");
                Ok(FinalizeOutcome::LoginRequired {
                    return_to: CHECKOUT_PATH.to_string(),
                })
            }
            Err(e) => {
                let message = e.user_message(FINALIZE_FALLBACK);
                self.error = Some(message.clone());
                Ok(FinalizeOutcome::Rejected(message))
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn expect_step(&self, step: CheckoutStep) -> Result<(), CheckoutError> {
        if self.step == step {
            Ok(())
        } else {
            Err(CheckoutError::WrongStep(self.step))
        }
    }

    fn advance(&mut self, step: CheckoutStep) {
        self.step = step;
        self.error = None;
    }

    fn fail<T>(&mut self, err: CheckoutError) -> Result<T, CheckoutError> {
        self.error = Some(match &err {
            CheckoutError::Storefront(e) => e.user_message(&e.to_string()),
            other => other.to_string(),
        });
        Err(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::watch;
    use vitrine_core::{Identity, Product, ProductId, UserId};

    use super::*;
    use crate::api::fake::FakeBackend;
    use crate::storage::MemoryStorage;

    struct Harness {
        backend: Arc<FakeBackend>,
        identity: watch::Sender<Option<Identity>>,
        cart: CartStore,
    }

    impl Harness {
        fn new() -> Self {
            let backend = Arc::new(FakeBackend::with_catalog());
            let (identity, rx) = watch::channel(None);
            let cart = CartStore::new(backend.clone(), Arc::new(MemoryStorage::new()), rx);
            Self {
                backend,
                identity,
                cart,
            }
        }

        fn sign_in(&self, user_id: i64) {
            self.backend.authenticate_as(Some(user_id));
            self.identity.send_replace(Some(Identity {
                user_id: UserId::new(user_id),
                email: None,
                expires_at: None,
            }));
        }

        /// Signed-in user 7 with one Café (10.00) in the cart.
        async fn ready() -> Self {
            let mut h = Self::new();
            h.sign_in(7);
            h.cart.add_item(&cafe()).await.unwrap();
            h
        }
    }

    fn cafe() -> Product {
        Product {
            id: ProductId::new(1),
            name: "Café".to_string(),
            price: Money::from_cents(1000),
            stock: 50,
            on_sale: false,
            featured: false,
        }
    }

    fn new_address() -> NewAddress {
        NewAddress {
            street: "Rua das Flores".to_string(),
            number: "10".to_string(),
            neighborhood: "Centro".to_string(),
            city: "Recife".to_string(),
            latitude: Some(-8.05),
            longitude: Some(-34.9),
        }
    }

    #[tokio::test]
    async fn test_enter_without_order_redirects_to_catalog() {
        let h = Harness::new();
        h.sign_in(7);
        assert_eq!(CheckoutFlow::enter(&h.cart).unwrap_err(), Redirect::Catalog);
    }

    #[tokio::test]
    async fn test_enter_anonymous_redirects_to_login() {
        let mut h = Harness::new();
        h.cart.add_item(&cafe()).await.unwrap();
        assert_eq!(
            CheckoutFlow::enter(&h.cart).unwrap_err(),
            Redirect::Login {
                return_to: "/checkout".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_summary_gate_requires_items() {
        let mut h = Harness::ready().await;
        h.cart.set_quantity(ProductId::new(1), 0).await.unwrap();
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();

        let err = flow.proceed_to_address(&h.cart).await.unwrap_err();

        assert!(matches!(err, CheckoutError::EmptyCart));
        assert_eq!(flow.step(), CheckoutStep::Summary);
        assert_eq!(flow.error(), Some("the cart is empty"));
    }

    #[tokio::test]
    async fn test_happy_path_to_completion() {
        let mut h = Harness::ready().await;
        let saved = h.backend.seed_address(7, "Rua A", -8.0, -34.9);
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();

        flow.proceed_to_address(&h.cart).await.unwrap();
        assert_eq!(flow.step(), CheckoutStep::Address);
        assert_eq!(flow.addresses().len(), 1);

        flow.select_address(saved).unwrap();
        flow.calculate_shipping(&mut h.cart).await.unwrap();
        assert_eq!(flow.step(), CheckoutStep::Confirmation);

        let summary = flow.summary(&h.cart).unwrap();
        assert_eq!(summary.shipping_cost, Money::from_cents(1500));
        assert_eq!(summary.total, Money::from_cents(2500));
        assert_eq!(summary.delivery_to.as_deref(), Some("Rua A, 10 - Centro, Recife"));

        let outcome = flow.finalize(&mut h.cart).await.unwrap();
        assert!(matches!(outcome, FinalizeOutcome::Completed(_)));
        assert!(h.cart.order().is_none());
    }

    #[tokio::test]
    async fn test_shipping_requires_selection() {
        let mut h = Harness::ready().await;
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();
        flow.proceed_to_address(&h.cart).await.unwrap();

        let err = flow.calculate_shipping(&mut h.cart).await.unwrap_err();

        assert!(matches!(err, CheckoutError::NoAddressSelected));
        assert_eq!(flow.step(), CheckoutStep::Address);
        assert!(flow.error().is_some());
        assert_eq!(h.backend.count("apply_shipping"), 0);
    }

    #[tokio::test]
    async fn test_register_address_validates_locally() {
        let mut h = Harness::ready().await;
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();
        flow.proceed_to_address(&h.cart).await.unwrap();

        let err = flow
            .register_address(NewAddress {
                latitude: None,
                ..new_address()
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CheckoutError::Storefront(StorefrontError::Address(_))
        ));
        assert_eq!(h.backend.count("create_address"), 0);
        assert!(flow.error().is_some());

        let saved = flow.register_address(new_address()).await.unwrap();
        assert_eq!(flow.selected_address(), Some(saved.id));
        assert!(flow.error().is_none());
        flow.calculate_shipping(&mut h.cart).await.unwrap();
        assert_eq!(flow.step(), CheckoutStep::Confirmation);
    }

    #[tokio::test]
    async fn test_address_load_failure_is_retryable() {
        let h = Harness::ready().await;
        h.backend.fail_next(
            "list_addresses",
            StorefrontError::Api {
                status: 503,
                message: None,
            },
        );
        let before = h.cart.snapshot();
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();

        flow.proceed_to_address(&h.cart).await.unwrap();
        assert_eq!(flow.step(), CheckoutStep::Address);
        assert_eq!(flow.error(), Some(ADDRESSES_FALLBACK));
        assert_eq!(h.cart.snapshot(), before);

        h.backend.seed_address(7, "Rua A", -8.0, -34.9);
        flow.reload_addresses().await;
        assert!(flow.error().is_none());
        assert_eq!(flow.addresses().len(), 1);
    }

    #[tokio::test]
    async fn test_select_unknown_address() {
        let h = Harness::ready().await;
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();
        flow.proceed_to_address(&h.cart).await.unwrap();
        assert!(matches!(
            flow.select_address(AddressId::new(404)),
            Err(CheckoutError::UnknownAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_finalize_without_address_stays_on_confirmation() {
        let mut h = Harness::ready().await;
        let saved = h.backend.seed_address(7, "Rua A", -8.0, -34.9);
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();
        flow.proceed_to_address(&h.cart).await.unwrap();
        flow.select_address(saved).unwrap();
        flow.calculate_shipping(&mut h.cart).await.unwrap();
        // The backend loses the address between shipping and finalize.
        h.backend.fail_next(
            "finalize",
            StorefrontError::Api {
                status: 400,
                message: Some("Delivery address required".to_string()),
            },
        );
        let before = h.cart.snapshot();

        let outcome = flow.finalize(&mut h.cart).await.unwrap();

        assert_eq!(
            outcome,
            FinalizeOutcome::Rejected("Delivery address required".to_string())
        );
        assert_eq!(flow.step(), CheckoutStep::Confirmation);
        assert_eq!(flow.error(), Some("Delivery address required"));
        assert_eq!(h.cart.snapshot(), before);
    }

    #[tokio::test]
    async fn test_finalize_auth_failure_requests_login() {
        let mut h = Harness::ready().await;
        let saved = h.backend.seed_address(7, "Rua A", -8.0, -34.9);
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();
        flow.proceed_to_address(&h.cart).await.unwrap();
        flow.select_address(saved).unwrap();
        flow.calculate_shipping(&mut h.cart).await.unwrap();
        h.backend.fail_next("finalize", StorefrontError::Forbidden(None));

        let outcome = flow.finalize(&mut h.cart).await.unwrap();

        assert_eq!(
            outcome,
            FinalizeOutcome::LoginRequired {
                return_to: CHECKOUT_PATH.to_string()
            }
        );
        assert!(h.cart.order().is_some());
    }

    #[tokio::test]
    async fn test_back_navigation_never_moves_forward() {
        let h = Harness::ready().await;
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();
        assert!(matches!(
            flow.back_to(CheckoutStep::Address),
            Err(CheckoutError::WrongStep(CheckoutStep::Address))
        ));

        flow.proceed_to_address(&h.cart).await.unwrap();
        flow.back_to(CheckoutStep::Summary).unwrap();
        assert_eq!(flow.step(), CheckoutStep::Summary);
        assert!(matches!(
            flow.back_to(CheckoutStep::Address),
            Err(CheckoutError::WrongStep(CheckoutStep::Address))
        ));
        assert_eq!(flow.step(), CheckoutStep::Summary);
    }

    #[tokio::test]
    async fn test_changing_address_requires_shipping_again() {
        let mut h = Harness::ready().await;
        let first = h.backend.seed_address(7, "Rua A", -8.0, -34.9);
        let second = h.backend.seed_address(7, "Rua B", -8.1, -34.8);
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();
        flow.proceed_to_address(&h.cart).await.unwrap();
        flow.select_address(first).unwrap();
        flow.calculate_shipping(&mut h.cart).await.unwrap();

        flow.back_to(CheckoutStep::Address).unwrap();
        flow.select_address(second).unwrap();
        assert!(matches!(
            flow.back_to(CheckoutStep::Confirmation),
            Err(CheckoutError::WrongStep(CheckoutStep::Confirmation))
        ));
        assert!(matches!(
            flow.finalize(&mut h.cart).await,
            Err(CheckoutError::WrongStep(CheckoutStep::Address))
        ));
        // Until shipping is recalculated the order still ships to the first address
        let summary = flow.summary(&h.cart).unwrap();
        assert_eq!(summary.delivery_to.as_deref(), Some("Rua A, 10 - Centro, Recife"));
        assert_eq!(h.backend.count("finalize"), 0);

        flow.calculate_shipping(&mut h.cart).await.unwrap();
        assert_eq!(flow.step(), CheckoutStep::Confirmation);
        let summary = flow.summary(&h.cart).unwrap();
        assert_eq!(summary.delivery_to.as_deref(), Some("Rua B, 10 - Centro, Recife"));
        assert_eq!(h.backend.count("apply_shipping"), 2);
    }

    #[tokio::test]
    async fn test_actions_are_step_gated() {
        let mut h = Harness::ready().await;
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();
        assert!(matches!(
            flow.finalize(&mut h.cart).await,
            Err(CheckoutError::WrongStep(CheckoutStep::Summary))
        ));
        assert!(matches!(
            flow.select_address(AddressId::new(1)),
            Err(CheckoutError::WrongStep(_))
        ));
        assert_eq!(h.backend.count("finalize"), 0);
    }

    #[tokio::test]
    async fn test_clear_cart_resets_and_redirects() {
        let mut h = Harness::ready().await;
        let mut flow = CheckoutFlow::enter(&h.cart).unwrap();

        let redirect = flow.clear_cart(&mut h.cart).await.unwrap();

        assert_eq!(redirect, Redirect::Catalog);
        assert!(h.cart.order().is_none());
        assert_eq!(h.backend.count("clear_items"), 1);
    }
}
