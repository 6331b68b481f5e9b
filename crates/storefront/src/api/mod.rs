//! Storefront REST API client.
//!
//! # Architecture
//!
//! - [`Backend`] is the seam between the stores and the network; the stores
//!   only ever see `vitrine-core` types
//! - [`HttpBackend`] implements it with `reqwest` 0.13: anonymous session
//!   cookie kept in the client's cookie jar, bearer token from the
//!   [`CredentialStore`](crate::session::CredentialStore), one transparent
//!   refresh-and-retry on 401
//! - The backend is the source of truth; nothing here caches order state

mod http;
mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpBackend;
pub use types::{LoginGrant, Registration};

use async_trait::async_trait;
use secrecy::SecretString;
use vitrine_core::{
    AddressId, CheckoutReceipt, Email, NewAddress, Order, OrderId, PixCharge, Product, ProductId,
    SavedAddress,
};

use crate::error::Result;

/// Operations the storefront needs from the order/catalog backend.
///
/// Mutations return `()`: callers re-fetch the order afterwards because
/// the backend computes every total.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /orders/{id}`
    async fn get_order(&self, id: OrderId) -> Result<Order>;

    /// `GET /orders/current`: the authenticated user's open order, if any.
    async fn current_order(&self) -> Result<Option<Order>>;

    /// `POST /orders`: create an order, or recover the one already bound to
    /// the anonymous session cookie.
    async fn create_order(&self) -> Result<OrderId>;

    /// `POST /orders/{id}/items`
    async fn add_item(&self, id: OrderId, product_id: ProductId, quantity: u32) -> Result<()>;

    /// `PUT /orders/{id}/items/{productId}`
    async fn set_quantity(&self, id: OrderId, product_id: ProductId, quantity: u32)
    -> Result<()>;

    /// `DELETE /orders/{id}/products/{productId}`
    async fn remove_item(&self, id: OrderId, product_id: ProductId) -> Result<()>;

    /// `DELETE /orders/{id}/items`
    async fn clear_items(&self, id: OrderId) -> Result<()>;

    /// `POST /orders/{id}/coupon`
    async fn apply_coupon(&self, id: OrderId, code: &str) -> Result<()>;

    /// `GET /addresses`
    async fn list_addresses(&self) -> Result<Vec<SavedAddress>>;

    /// `POST /addresses`
    async fn create_address(&self, address: &NewAddress) -> Result<SavedAddress>;

    /// `POST /orders/{id}/shipping/{addressId}`
    async fn apply_shipping(&self, id: OrderId, address_id: AddressId) -> Result<()>;

    /// `POST /checkout/{id}/finalize`
    async fn finalize(&self, id: OrderId) -> Result<CheckoutReceipt>;

    /// `POST /orders/associate-cart`: bind the anonymous order to the
    /// authenticated user. A 409 surfaces as
    /// [`StorefrontError::Conflict`](crate::error::StorefrontError::Conflict).
    async fn associate_cart(&self) -> Result<()>;

    /// `POST /orders/discard-anonymous`
    async fn discard_anonymous(&self) -> Result<()>;

    /// `POST /orders/replace`
    async fn replace_with_anonymous(&self) -> Result<()>;

    /// `POST /auth/login`
    async fn login(&self, email: &Email, password: &SecretString) -> Result<LoginGrant>;

    /// `POST /auth/refresh`
    async fn refresh(&self, refresh_token: &SecretString) -> Result<LoginGrant>;

    /// `POST /auth/register`
    async fn register(&self, form: &Registration) -> Result<()>;

    /// `GET /products`
    async fn list_products(&self) -> Result<Vec<Product>>;

    /// `POST /payments/{id}/payment` with the PIX payment type.
    async fn create_pix_payment(&self, id: OrderId) -> Result<PixCharge>;
}
