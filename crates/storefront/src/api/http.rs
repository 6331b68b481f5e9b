//! `reqwest` implementation of [`Backend`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument, warn};
use url::Url;
use uuid::Uuid;
use vitrine_core::{
    AddressId, CheckoutReceipt, Email, NewAddress, Order, OrderId, PixCharge, Product, ProductId,
    SavedAddress,
};

use super::Backend;
use super::types::{
    AddItemRequest, ConflictPayload, CouponRequest, CreatedOrderResponse, ErrorBody,
    FinalizeResponse, LoginGrant, LoginRequest, OrderDto, PAYMENT_TYPE_PIX, PaymentRequest,
    PixChargeDto, ProductDto, QuantityRequest, RefreshRequest, Registration, TokenResponse,
};
use crate::config::StorefrontConfig;
use crate::error::{Result, StorefrontError};
use crate::session::CredentialStore;

/// Header carrying a per-request correlation id.
const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Longest body excerpt written to logs.
const LOG_BODY_LIMIT: usize = 500;

/// HTTP client for the storefront API.
///
/// Cheap to clone; clones share the connection pool, cookie jar and
/// credentials.
#[derive(Clone)]
pub struct HttpBackend {
    inner: Arc<HttpBackendInner>,
}

struct HttpBackendInner {
    client: reqwest::Client,
    base_url: Url,
    credentials: Arc<CredentialStore>,
}

/// Status and body of a completed request.
#[derive(Debug)]
struct RawResponse {
    status: StatusCode,
    body: String,
}

/// Whether a 401 may trigger a token refresh and a single retry.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Auth {
    Refreshable,
    /// Auth endpoints themselves; never refreshed.
    Bare,
}

impl HttpBackend {
    /// Create a client for `config.api_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &StorefrontConfig, credentials: Arc<CredentialStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.http_timeout)
            .user_agent(concat!("vitrine/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpBackendInner {
                client,
                base_url: config.api_url.clone(),
                credentials,
            }),
        })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.inner
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| StorefrontError::Validation(format!("invalid request path {path}: {e}")))
    }

    /// Send one request and read the whole body.
    async fn dispatch<B: Serialize + Sync>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&B>,
        auth: Auth,
    ) -> Result<RawResponse> {
        let request_id = Uuid::new_v4().to_string();
        let mut request = self
            .inner
            .client
            .request(method.clone(), self.url(path)?)
            .header(REQUEST_ID_HEADER, &request_id);

        if auth == Auth::Refreshable
            && let Some(token) = self.inner.credentials.access_token()
        {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|_| StorefrontError::Validation("access token is not a valid header".to_string()))?;
            value.set_sensitive(true);
            request = request.header(AUTHORIZATION, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(%method, path, %status, request_id, "Storefront API response");

        Ok(RawResponse { status, body })
    }

    /// Send a request, refreshing the access token once on 401.
    async fn execute<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        auth: Auth,
    ) -> Result<RawResponse> {
        let response = self.dispatch(&method, path, body, auth).await?;

        if response.status == StatusCode::UNAUTHORIZED
            && auth == Auth::Refreshable
            && self.refresh_credentials().await
        {
            let retried = self.dispatch(&method, path, body, auth).await?;
            return check(&method, path, retried);
        }

        check(&method, path, response)
    }

    /// Try to renew the access token. Clears credentials on failure.
    async fn refresh_credentials(&self) -> bool {
        let Some(refresh_token) = self.inner.credentials.refresh_token() else {
            return false;
        };
        match self.request_refresh(&refresh_token).await {
            Ok(grant) => match self.inner.credentials.install(grant) {
                Ok(identity) => {
                    debug!(user_id = %identity.user_id, "Access token refreshed");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Refreshed token is unusable; signing out");
                    self.inner.credentials.clear();
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "Token refresh failed; signing out");
                self.inner.credentials.clear();
                false
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &SecretString) -> Result<LoginGrant> {
        let body = RefreshRequest {
            refresh_token: refresh_token.expose_secret(),
        };
        let method = Method::POST;
        let response = self
            .dispatch(&method, "auth/refresh", Some(&body), Auth::Bare)
            .await?;
        let response = check(&method, "auth/refresh", response)?;
        Ok(parse::<TokenResponse>(&response)?.into())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .execute::<()>(Method::GET, path, None, Auth::Refreshable)
            .await?;
        parse(&response)
    }

    async fn send<B: Serialize + Sync>(&self, method: Method, path: &str, body: Option<&B>) -> Result<RawResponse> {
        self.execute(method, path, body, Auth::Refreshable).await
    }

    async fn send_empty(&self, method: Method, path: &str) -> Result<()> {
        self.send::<()>(method, path, None).await?;
        Ok(())
    }
}

/// Map a non-success response onto the error taxonomy.
fn check(method: &Method, path: &str, response: RawResponse) -> Result<RawResponse> {
    let status = response.status;
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::CONFLICT
        && let Ok(payload) = serde_json::from_str::<ConflictPayload>(&response.body)
        && let Some(record) = payload.into_record()
    {
        return Err(StorefrontError::Conflict(record));
    }

    let message = serde_json::from_str::<ErrorBody>(&response.body)
        .ok()
        .and_then(ErrorBody::into_message);

    if status.is_server_error() {
        error!(
            %method,
            path,
            status = %status,
            body = %excerpt(&response.body),
            "Storefront API returned server error"
        );
    } else {
        debug!(%method, path, status = %status, message = ?message, "Storefront API rejected request");
    }

    Err(match status {
        StatusCode::UNAUTHORIZED => StorefrontError::Unauthorized(message),
        StatusCode::FORBIDDEN => StorefrontError::Forbidden(message),
        StatusCode::NOT_FOUND => StorefrontError::NotFound(message),
        _ => StorefrontError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

fn parse<T: DeserializeOwned>(response: &RawResponse) -> Result<T> {
    serde_json::from_str(&response.body).map_err(|e| {
        error!(
            error = %e,
            body = %excerpt(&response.body),
            "Failed to parse storefront API response"
        );
        StorefrontError::Parse(e)
    })
}

fn excerpt(body: &str) -> String {
    body.chars().take(LOG_BODY_LIMIT).collect()
}

#[async_trait]
impl Backend for HttpBackend {
    #[instrument(skip(self), fields(order_id = %id))]
    async fn get_order(&self, id: OrderId) -> Result<Order> {
        let order: OrderDto = self.get_json(&format!("orders/{id}")).await?;
        Ok(order.into())
    }

    #[instrument(skip(self))]
    async fn current_order(&self) -> Result<Option<Order>> {
        let response = self
            .execute::<()>(Method::GET, "orders/current", None, Auth::Refreshable)
            .await?;
        if response.status == StatusCode::NO_CONTENT || response.body.trim().is_empty() {
            return Ok(None);
        }
        let order: OrderDto = parse(&response)?;
        Ok(Some(order.into()))
    }

    #[instrument(skip(self))]
    async fn create_order(&self) -> Result<OrderId> {
        let response = self.send::<()>(Method::POST, "orders", None).await?;
        let created: CreatedOrderResponse = parse(&response)?;
        Ok(created.order_id)
    }

    #[instrument(skip(self), fields(order_id = %id, product_id = %product_id))]
    async fn add_item(&self, id: OrderId, product_id: ProductId, quantity: u32) -> Result<()> {
        let body = AddItemRequest {
            product_id,
            quantity,
        };
        self.send(Method::POST, &format!("orders/{id}/items"), Some(&body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %id, product_id = %product_id))]
    async fn set_quantity(
        &self,
        id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<()> {
        let body = QuantityRequest { quantity };
        self.send(
            Method::PUT,
            &format!("orders/{id}/items/{product_id}"),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %id, product_id = %product_id))]
    async fn remove_item(&self, id: OrderId, product_id: ProductId) -> Result<()> {
        self.send_empty(Method::DELETE, &format!("orders/{id}/products/{product_id}"))
            .await
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn clear_items(&self, id: OrderId) -> Result<()> {
        self.send_empty(Method::DELETE, &format!("orders/{id}/items"))
            .await
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn apply_coupon(&self, id: OrderId, code: &str) -> Result<()> {
        self.send(
            Method::POST,
            &format!("orders/{id}/coupon"),
            Some(&CouponRequest { code }),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_addresses(&self) -> Result<Vec<SavedAddress>> {
        self.get_json("addresses").await
    }

    #[instrument(skip(self, address))]
    async fn create_address(&self, address: &NewAddress) -> Result<SavedAddress> {
        let response = self.send(Method::POST, "addresses", Some(address)).await?;
        parse(&response)
    }

    #[instrument(skip(self), fields(order_id = %id, address_id = %address_id))]
    async fn apply_shipping(&self, id: OrderId, address_id: AddressId) -> Result<()> {
        self.send_empty(Method::POST, &format!("orders/{id}/shipping/{address_id}"))
            .await
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn finalize(&self, id: OrderId) -> Result<CheckoutReceipt> {
        let response = self
            .send::<()>(Method::POST, &format!("checkout/{id}/finalize"), None)
            .await?;
        let finalized = if response.body.trim().is_empty() {
            FinalizeResponse::default()
        } else {
            parse(&response)?
        };
        Ok(finalized.into_receipt(id))
    }

    #[instrument(skip(self))]
    async fn associate_cart(&self) -> Result<()> {
        self.send_empty(Method::POST, "orders/associate-cart").await
    }

    #[instrument(skip(self))]
    async fn discard_anonymous(&self) -> Result<()> {
        self.send_empty(Method::POST, "orders/discard-anonymous")
            .await
    }

    #[instrument(skip(self))]
    async fn replace_with_anonymous(&self) -> Result<()> {
        self.send_empty(Method::POST, "orders/replace").await
    }

    #[instrument(skip(self, password), fields(email = %email))]
    async fn login(&self, email: &Email, password: &SecretString) -> Result<LoginGrant> {
        let body = LoginRequest {
            email: email.as_str(),
            password: password.expose_secret(),
        };
        let response = self
            .execute(Method::POST, "auth/login", Some(&body), Auth::Bare)
            .await?;
        Ok(parse::<TokenResponse>(&response)?.into())
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &SecretString) -> Result<LoginGrant> {
        self.request_refresh(refresh_token).await
    }

    #[instrument(skip(self, form), fields(email = %form.email))]
    async fn register(&self, form: &Registration) -> Result<()> {
        self.execute(Method::POST, "auth/register", Some(form), Auth::Bare)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_products(&self) -> Result<Vec<Product>> {
        let products: Vec<ProductDto> = self.get_json("products").await?;
        Ok(products.into_iter().map(Product::from).collect())
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn create_pix_payment(&self, id: OrderId) -> Result<PixCharge> {
        let body = PaymentRequest {
            kind: PAYMENT_TYPE_PIX,
        };
        let response = self
            .send(Method::POST, &format!("payments/{id}/payment"), Some(&body))
            .await?;
        let charge: PixChargeDto = parse(&response)?;
        charge.into_charge().ok_or_else(|| StorefrontError::Api {
            status: response.status.as_u16(),
            message: None,
        })
    }
}
