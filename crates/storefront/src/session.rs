//! Session and identity provider.
//!
//! [`CredentialStore`] owns the bearer credential pair and publishes the
//! decoded [`Identity`] through a `watch` channel, so the cart and checkout
//! can react to login and logout. [`SessionProvider`] runs the auth flows
//! against the backend and installs what they return.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use vitrine_core::{Email, Identity, IdentityError, UserId};

use crate::api::{Backend, LoginGrant, Registration};
use crate::error::{Result, StorefrontError};
use crate::storage::{Storage, keys};

/// Outcome of reading persisted credentials at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    /// No credential stored (or it was unreadable and has been discarded).
    Anonymous,
    /// Valid credential; identity published.
    Authenticated(Identity),
    /// The access token has expired. The refresh token is kept so the
    /// session can be renewed.
    Expired,
}

struct TokenPair {
    access: SecretString,
    refresh: Option<SecretString>,
}

/// Holder of the current credential pair and the identity derived from it.
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
    tokens: Mutex<Option<TokenPair>>,
    identity: watch::Sender<Option<Identity>>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("tokens", &"[REDACTED]")
            .field("identity", &*self.identity.borrow())
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Create an empty store. Call [`CredentialStore::load`] to pick up
    /// persisted credentials.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            storage,
            tokens: Mutex::new(None),
            identity,
        }
    }

    /// Read persisted credentials and publish the identity they carry.
    pub fn load(&self) -> CredentialState {
        self.load_at(Utc::now())
    }

    fn load_at(&self, now: DateTime<Utc>) -> CredentialState {
        let Some(access) = self.storage.get(keys::ACCESS_TOKEN) else {
            return CredentialState::Anonymous;
        };
        let refresh = self.storage.get(keys::REFRESH_TOKEN);
        let fallback = self
            .storage
            .get(keys::USER_ID)
            .and_then(|id| id.parse::<UserId>().ok());

        match Identity::from_access_token(&access, fallback, now) {
            Ok(identity) => {
                self.set_tokens(access, refresh);
                self.identity.send_replace(Some(identity.clone()));
                debug!(user_id = %identity.user_id, "Loaded stored credentials");
                CredentialState::Authenticated(identity)
            }
            Err(IdentityError::Expired(at)) => {
                debug!(expired_at = %at, "Stored access token has expired");
                self.set_tokens(access, refresh);
                self.identity.send_replace(None);
                CredentialState::Expired
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable stored credentials");
                self.clear();
                CredentialState::Anonymous
            }
        }
    }

    /// Validate, persist and publish a freshly issued credential pair.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError::Identity`] if the access token cannot be
    /// decoded; nothing is stored in that case.
    pub fn install(&self, grant: LoginGrant) -> Result<Identity> {
        let identity =
            Identity::from_access_token(grant.access_token.expose_secret(), grant.user_id, Utc::now())?;

        let writes = [
            self.storage
                .set(keys::ACCESS_TOKEN, grant.access_token.expose_secret()),
            match &grant.refresh_token {
                Some(refresh) => self.storage.set(keys::REFRESH_TOKEN, refresh.expose_secret()),
                None => self.storage.remove(keys::REFRESH_TOKEN),
            },
            self.storage
                .set(keys::USER_ID, &identity.user_id.to_string()),
        ];
        for result in writes {
            if let Err(e) = result {
                warn!(error = %e, "Could not persist credentials; session will not survive restart");
            }
        }

        if let Ok(mut tokens) = self.tokens.lock() {
            *tokens = Some(TokenPair {
                access: grant.access_token,
                refresh: grant.refresh_token,
            });
        }
        self.identity.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    /// Forget the credential pair and publish "anonymous".
    pub fn clear(&self) {
        if let Ok(mut tokens) = self.tokens.lock() {
            *tokens = None;
        }
        for key in [keys::ACCESS_TOKEN, keys::REFRESH_TOKEN, keys::USER_ID] {
            if let Err(e) = self.storage.remove(key) {
                warn!(key, error = %e, "Could not remove stored credential");
            }
        }
        self.identity.send_replace(None);
    }

    /// Current access token, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<SecretString> {
        let tokens = self.tokens.lock().ok()?;
        tokens
            .as_ref()
            .map(|pair| SecretString::from(pair.access.expose_secret()))
    }

    /// Current refresh token, if any.
    #[must_use]
    pub fn refresh_token(&self) -> Option<SecretString> {
        let tokens = self.tokens.lock().ok()?;
        tokens
            .as_ref()
            .and_then(|pair| pair.refresh.as_ref())
            .map(|refresh| SecretString::from(refresh.expose_secret()))
    }

    /// Identity derived from the current credential.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    /// Receiver notified on every login, refresh and logout.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    fn set_tokens(&self, access: String, refresh: Option<String>) {
        if let Ok(mut tokens) = self.tokens.lock() {
            *tokens = Some(TokenPair {
                access: SecretString::from(access),
                refresh: refresh.map(SecretString::from),
            });
        }
    }
}

/// Login, registration and logout against the backend.
#[derive(Clone)]
pub struct SessionProvider {
    backend: Arc<dyn Backend>,
    credentials: Arc<CredentialStore>,
}

impl SessionProvider {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            backend,
            credentials,
        }
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed email or empty password,
    /// or the backend's rejection.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: SecretString) -> Result<Identity> {
        let email = Email::parse(email)?;
        if password.expose_secret().is_empty() {
            return Err(StorefrontError::Validation("password is required".to_string()));
        }

        let grant = self.backend.login(&email, &password).await?;
        let identity = self.credentials.install(grant)?;
        info!(user_id = %identity.user_id, "Signed in");
        Ok(identity)
    }

    /// Create an account. Does not sign in.
    ///
    /// # Errors
    ///
    /// Returns a validation error for missing fields, or the backend's
    /// rejection (e.g. email already registered).
    #[instrument(skip(self, form), fields(email = %form.email))]
    pub async fn register(&self, form: Registration) -> Result<()> {
        if form.name.trim().is_empty() {
            return Err(StorefrontError::Validation("name is required".to_string()));
        }
        let email = Email::parse(&form.email)?;
        if form.password.expose_secret().is_empty() {
            return Err(StorefrontError::Validation("password is required".to_string()));
        }

        let form = Registration {
            name: form.name.trim().to_string(),
            email: email.into_inner(),
            phone: form.phone.trim().to_string(),
            password: form.password,
        };
        self.backend.register(&form).await?;
        info!("Account registered");
        Ok(())
    }

    /// Renew the access token with the stored refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError::Unauthorized`] when no refresh token is
    /// stored. Credentials are cleared if the backend rejects the refresh.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Identity> {
        let Some(refresh_token) = self.credentials.refresh_token() else {
            return Err(StorefrontError::Unauthorized(None));
        };
        match self.backend.refresh(&refresh_token).await {
            Ok(grant) => self.credentials.install(grant),
            Err(e) => {
                warn!(error = %e, "Session refresh failed; signing out");
                self.credentials.clear();
                Err(e)
            }
        }
    }

    /// Sign out locally.
    pub fn logout(&self) {
        self.credentials.clear();
        info!("Signed out");
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.credentials.identity()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.credentials.subscribe()
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }
}
