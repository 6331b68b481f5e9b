//! Application state: everything a storefront front end talks to.

use std::sync::Arc;

use secrecy::SecretString;
use tracing::{info, instrument, warn};
use vitrine_core::Identity;

use crate::api::{Backend, HttpBackend, Registration};
use crate::cart::{AssociationOutcome, CartStore};
use crate::catalog::Catalog;
use crate::checkout::{CheckoutError, CheckoutFlow, FinalizeOutcome, Redirect};
use crate::config::StorefrontConfig;
use crate::error::Result;
use crate::payment::Payments;
use crate::session::{CredentialState, CredentialStore, SessionProvider};
use crate::storage::{FileStorage, Storage};

/// The storefront client.
///
/// Owns the cart store, so commands that change the order take `&mut self`.
/// Session, catalog and payments are cheap handles and can be cloned out.
pub struct Storefront {
    config: StorefrontConfig,
    session: SessionProvider,
    cart: CartStore,
    catalog: Catalog,
    payments: Payments,
}

impl std::fmt::Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("api_url", &self.config.api_url.as_str())
            .field("cart", &self.cart)
            .finish_non_exhaustive()
    }
}

impl Storefront {
    /// Create a client talking HTTP to `config.api_url`, with state
    /// persisted to `config.state_file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn connect(config: StorefrontConfig) -> Result<Self> {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(&config.state_file));
        let credentials = Arc::new(CredentialStore::new(Arc::clone(&storage)));
        let backend = Arc::new(HttpBackend::new(&config, Arc::clone(&credentials))?);
        Ok(Self::with_backend(config, backend, storage, credentials))
    }

    /// Assemble a client from parts. `credentials` must be the store the
    /// backend reads its bearer token from.
    #[must_use]
    pub fn with_backend(
        config: StorefrontConfig,
        backend: Arc<dyn Backend>,
        storage: Arc<dyn Storage>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        let cart = CartStore::new(Arc::clone(&backend), storage, credentials.subscribe());
        let session = SessionProvider::new(Arc::clone(&backend), credentials);
        let catalog = Catalog::new(Arc::clone(&backend), config.catalog_ttl);
        let payments = Payments::new(backend);

        Self {
            config,
            session,
            cart,
            catalog,
            payments,
        }
    }

    /// Restore persisted state: credentials (renewed if expired), then the
    /// order, then its attribution to the signed-in user.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> AssociationOutcome {
        match self.session.credentials().load() {
            CredentialState::Expired => {
                if let Err(e) = self.session.refresh().await {
                    warn!(error = %e, "Could not renew expired session");
                }
            }
            CredentialState::Authenticated(identity) => {
                info!(user_id = %identity.user_id, "Session restored");
            }
            CredentialState::Anonymous => {}
        }

        self.cart.hydrate().await;
        self.cart.associate_identity().await
    }

    /// Sign in, then attribute the current cart to the account.
    ///
    /// # Errors
    ///
    /// Returns the login failure; association problems are reported in the
    /// outcome instead.
    pub async fn login(
        &mut self,
        email: &str,
        password: SecretString,
    ) -> Result<(Identity, AssociationOutcome)> {
        let identity = self.session.login(email, password).await?;
        let outcome = self.cart.associate_identity().await;
        Ok((identity, outcome))
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// Returns the validation or backend failure.
    pub async fn register(&self, form: Registration) -> Result<()> {
        self.session.register(form).await
    }

    /// Sign out and forget the cart.
    pub fn logout(&mut self) {
        self.session.logout();
        self.cart.dismiss_conflict();
        self.cart.reset();
    }

    /// Enter checkout for the current order.
    ///
    /// # Errors
    ///
    /// Returns the redirect to follow when checkout is not available.
    pub fn checkout(&self) -> std::result::Result<CheckoutFlow, Redirect> {
        CheckoutFlow::enter(&self.cart)
    }

    /// Place the order from a flow on its Confirmation step. A PIX charge
    /// returned with the receipt is kept for [`Payments::pix_for`].
    ///
    /// # Errors
    ///
    /// Returns the flow's step error.
    pub async fn place_order(
        &mut self,
        flow: &mut CheckoutFlow,
    ) -> std::result::Result<FinalizeOutcome, CheckoutError> {
        let outcome = flow.finalize(&mut self.cart).await?;
        if let FinalizeOutcome::Completed(receipt) = &outcome {
            self.payments.seed(receipt).await;
        }
        Ok(outcome)
    }

    #[must_use]
    pub const fn config(&self) -> &StorefrontConfig {
        &self.config
    }

    #[must_use]
    pub const fn session(&self) -> &SessionProvider {
        &self.session
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.session.identity()
    }

    #[must_use]
    pub const fn cart(&self) -> &CartStore {
        &self.cart
    }

    pub const fn cart_mut(&mut self) -> &mut CartStore {
        &mut self.cart
    }

    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub const fn payments(&self) -> &Payments {
        &self.payments
    }
}
