//! Unified error type for the storefront client.
//!
//! Every backend call, storage write and local validation surfaces as a
//! [`StorefrontError`]. Callers branch on the classification helpers
//! ([`StorefrontError::is_stale_order`], [`StorefrontError::is_auth`]) rather
//! than on raw status codes.

use thiserror::Error;
use vitrine_core::{AddressError, ConflictRecord, EmailError, IdentityError, ProductId};

use crate::storage::StorageError;

/// Messages the backend uses when an order id no longer refers to an open
/// order. Matched case-insensitively.
const STALE_ORDER_MARKERS: &[&str] = &[
    "order not found",
    "order invalid",
    "invalid order",
    "cannot be modified",
];

/// Storefront client error.
#[derive(Debug, Error)]
pub enum StorefrontError {
    /// Transport failure (connection refused, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response not covered by a more specific variant.
    #[error("API error ({status}): {}", .message.as_deref().unwrap_or("no details"))]
    Api {
        /// HTTP status code.
        status: u16,
        /// Backend-provided message, surfaced verbatim.
        message: Option<String>,
    },

    /// 404 from the backend.
    #[error("Not found: {}", .0.as_deref().unwrap_or("resource"))]
    NotFound(Option<String>),

    /// 401 from the backend (after any refresh attempt).
    #[error("Unauthorized: {}", .0.as_deref().unwrap_or("sign in required"))]
    Unauthorized(Option<String>),

    /// 403 from the backend.
    #[error("Forbidden: {}", .0.as_deref().unwrap_or("access denied"))]
    Forbidden(Option<String>),

    /// Both an anonymous and an account order are open.
    #[error(
        "Cart conflict between orders {} and {}",
        .0.user_order_id,
        .0.anonymous_order_id
    )]
    Conflict(ConflictRecord),

    /// Response body could not be decoded.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Local input validation failed before any request was made.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Quantity change for a product that has no line in the order.
    #[error("Product {0} is not in the order")]
    UnknownLine(ProductId),

    /// Client storage could not be written.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Access token could not be decoded or is expired.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Email failed local validation.
    #[error("Invalid email: {0}")]
    Email(#[from] EmailError),

    /// Address form failed local validation.
    #[error("Invalid address: {0}")]
    Address(#[from] AddressError),
}

impl StorefrontError {
    /// HTTP status associated with this error, when it came from a response.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::NotFound(_) => Some(404),
            Self::Unauthorized(_) => Some(401),
            Self::Forbidden(_) => Some(403),
            Self::Conflict(_) => Some(409),
            _ => None,
        }
    }

    /// Message sent by the backend, if any.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Api { message, .. }
            | Self::NotFound(message)
            | Self::Unauthorized(message)
            | Self::Forbidden(message) => message.as_deref(),
            Self::Conflict(record) => record.message.as_deref(),
            _ => None,
        }
    }

    /// The order id the client holds no longer refers to an open order.
    #[must_use]
    pub fn is_stale_order(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api {
                message: Some(message),
                ..
            } => {
                let message = message.to_lowercase();
                STALE_ORDER_MARKERS
                    .iter()
                    .any(|marker| message.contains(marker))
            }
            _ => false,
        }
    }

    /// The backend refused the request for lack of (valid) credentials.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Forbidden(_))
    }

    /// Transport failures and 5xx responses; safe to retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Text for an inline banner: the backend message verbatim, the local
    /// validation message, or `fallback`.
    #[must_use]
    pub fn user_message(&self, fallback: &str) -> String {
        if let Some(message) = self.server_message()
            && !message.trim().is_empty()
        {
            return message.to_string();
        }
        match self {
            Self::Validation(message) => message.clone(),
            Self::UnknownLine(_) | Self::Email(_) | Self::Address(_) => self.to_string(),
            _ => fallback.to_string(),
        }
    }
}

/// Result type alias for `StorefrontError`.
pub type Result<T> = std::result::Result<T, StorefrontError>;
