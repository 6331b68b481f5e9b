//! Checkout receipt and PIX payment types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::id::{OrderId, PaymentId};

/// Result of a successful finalize call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub order_id: OrderId,
    /// Backend status label, when it sends one.
    pub status: Option<String>,
    /// PIX charge, when the backend creates it as part of finalizing.
    pub payment: Option<PixCharge>,
}

/// A PIX charge generated by the backend for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixCharge {
    pub payment_id: Option<PaymentId>,
    /// Backend status label (sent as text or as a numeric code).
    pub status: Option<String>,
    pub transaction_id: Option<String>,
    /// "Copia e cola" payload for banking apps.
    pub copy_paste: String,
    /// QR code image, base64-encoded PNG.
    pub qr_code_base64: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PixCharge {
    /// Whether the charge can no longer be paid at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}
