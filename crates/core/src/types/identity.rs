//! Authenticated identity derived from a bearer credential.
//!
//! The access token is a JWT issued by the backend. The client cannot verify
//! its signature (it has no key), so "validation" here means: the token is
//! well-formed, carries a user id claim, and has not expired. The backend
//! still rejects forged tokens on every request.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::id::UserId;

/// Claims checked for the user id, in priority order.
const USER_ID_CLAIMS: &[&str] = &[
    "userId",
    "user_id",
    "nameid",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier",
    "sub",
];

const EMAIL_CLAIMS: &[&str] = &[
    "email",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress",
];

/// Errors produced while decoding an access token.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The token does not have the `header.payload.signature` shape.
    #[error("malformed access token")]
    Malformed,

    /// The payload segment is not valid base64url.
    #[error("access token payload is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// The payload is not a JSON object.
    #[error("access token claims are not valid JSON: {0}")]
    Claims(#[from] serde_json::Error),

    /// No usable user id claim and no fallback id.
    #[error("access token carries no user id")]
    MissingUserId,

    /// The `exp` claim is in the past.
    #[error("access token expired at {0}")]
    Expired(DateTime<Utc>),
}

/// The currently authenticated customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: Option<String>,
    /// Access token expiry, when the token declares one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Decode and validate an access token.
    ///
    /// `fallback_user_id` is used only when the token carries no id claim
    /// (some login endpoints return the id next to the token instead).
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the token is malformed, has no user id
    /// (and no fallback was given), or is expired at `now`.
    pub fn from_access_token(
        token: &str,
        fallback_user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Self, IdentityError> {
        let claims = decode_claims(token)?;

        let user_id = USER_ID_CLAIMS
            .iter()
            .find_map(|claim| claims.get(*claim).and_then(parse_id))
            .or(fallback_user_id)
            .ok_or(IdentityError::MissingUserId)?;

        let email = EMAIL_CLAIMS
            .iter()
            .find_map(|claim| claims.get(*claim).and_then(Value::as_str))
            .map(str::to_owned);

        let expires_at = claims
            .get("exp")
            .and_then(|exp| exp.as_i64().or_else(|| exp.as_f64().map(truncate_secs)))
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        if let Some(expires_at) = expires_at
            && expires_at <= now
        {
            return Err(IdentityError::Expired(expires_at));
        }

        Ok(Self {
            user_id,
            email,
            expires_at,
        })
    }

    /// Whether the credential behind this identity has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

fn decode_claims(token: &str) -> Result<serde_json::Map<String, Value>, IdentityError> {
    let mut segments = token.trim().split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(IdentityError::Malformed);
    };
    if payload.is_empty() {
        return Err(IdentityError::Malformed);
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(map) => Ok(map),
        _ => Err(IdentityError::Malformed),
    }
}

/// User ids arrive as numbers or numeric strings depending on the issuer.
fn parse_id(value: &Value) -> Option<UserId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|id| *id > 0)
    .map(UserId::new)
}

#[allow(clippy::cast_possible_truncation)] // exp is seconds since epoch; fractions are dropped
fn truncate_secs(secs: f64) -> i64 {
    secs as i64
}
