//! PIX payment for finalized orders.
//!
//! The backend generates the charge and returns the same one when asked
//! again for the same order, so charges are cached per order id for the
//! life of the process.

use std::sync::Arc;

use moka::future::Cache;
use tracing::{debug, instrument, warn};
use vitrine_core::{CheckoutReceipt, OrderId, PixCharge};

use crate::api::Backend;
use crate::error::{Result, StorefrontError};

/// Shown when charge generation fails without a backend message.
pub const PIX_FAILURE_MESSAGE: &str = "Could not generate the PIX charge.";

/// Banner text for a failed charge request.
#[must_use]
pub fn failure_message(err: &StorefrontError) -> String {
    err.user_message(PIX_FAILURE_MESSAGE)
}

/// PIX charges by order.
#[derive(Clone)]
pub struct Payments {
    backend: Arc<dyn Backend>,
    charges: Cache<OrderId, PixCharge>,
}

impl std::fmt::Debug for Payments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payments")
            .field("cached_charges", &self.charges.entry_count())
            .finish_non_exhaustive()
    }
}

impl Payments {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            charges: Cache::builder().max_capacity(256).build(),
        }
    }

    /// The PIX charge for a finalized order, requesting it on first use.
    ///
    /// # Errors
    ///
    /// Returns the backend error; see [`failure_message`] for display.
    #[instrument(skip(self))]
    pub async fn pix_for(&self, order_id: OrderId) -> Result<PixCharge> {
        if let Some(charge) = self.charges.get(&order_id).await {
            debug!("Cache hit for PIX charge");
            return Ok(charge);
        }

        let charge = self
            .backend
            .create_pix_payment(order_id)
            .await
            .inspect_err(|e| warn!(order_id = %order_id, error = %e, "PIX charge generation failed"))?;
        debug!(order_id = %order_id, payment_id = ?charge.payment_id, "PIX charge created");
        self.charges.insert(order_id, charge.clone()).await;
        Ok(charge)
    }

    /// Cache the charge that came back with the finalize response, if any.
    pub async fn seed(&self, receipt: &CheckoutReceipt) {
        if let Some(charge) = &receipt.payment {
            self.charges.insert(receipt.order_id, charge.clone()).await;
        }
    }

    /// Cached charge without contacting the backend.
    pub async fn cached(&self, order_id: OrderId) -> Option<PixCharge> {
        self.charges.get(&order_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::fake::FakeBackend;

    fn charge(code: &str) -> PixCharge {
        PixCharge {
            payment_id: None,
            status: None,
            transaction_id: None,
            copy_paste: code.to_string(),
            qr_code_base64: String::new(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_charge_is_requested_once_per_order() {
        let backend = Arc::new(FakeBackend::with_catalog());
        let id = backend.seed_order(Some(7), &[(1, 1)]);
        backend.authenticate_as(Some(7));
        let address = backend.seed_address(7, "Rua A", -8.0, -34.9);
        backend.apply_shipping(id, address).await.unwrap();
        backend.finalize(id).await.unwrap();
        let payments = Payments::new(backend.clone());

        let first = payments.pix_for(id).await.unwrap();
        let second = payments.pix_for(id).await.unwrap();

        assert_eq!(first, second);
        assert!(first.copy_paste.contains(&id.to_string()));
        assert_eq!(backend.count("create_pix_payment"), 1);
    }

    #[tokio::test]
    async fn test_failure_surfaces_backend_message() {
        let backend = Arc::new(FakeBackend::with_catalog());
        let id = backend.seed_order(Some(7), &[(1, 1)]);
        let payments = Payments::new(backend.clone());

        let err = payments.pix_for(id).await.unwrap_err();

        assert_eq!(failure_message(&err), "Order has not been finalized");
        assert!(payments.cached(id).await.is_none());
    }

    #[tokio::test]
    async fn test_failure_without_message_uses_fallback() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_next(
            "create_pix_payment",
            StorefrontError::Api {
                status: 502,
                message: None,
            },
        );
        let payments = Payments::new(backend);

        let err = payments.pix_for(OrderId::new(1)).await.unwrap_err();

        assert_eq!(failure_message(&err), PIX_FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn test_seed_from_receipt_skips_backend() {
        let backend = Arc::new(FakeBackend::new());
        let payments = Payments::new(backend.clone());
        let receipt = CheckoutReceipt {
            order_id: OrderId::new(5),
            status: Some("AwaitingPayment".to_string()),
            payment: Some(charge("000201-seeded")),
        };

        payments.seed(&receipt).await;

        let charge = payments.pix_for(OrderId::new(5)).await.unwrap();
        assert_eq!(charge.copy_paste, "000201-seeded");
        assert_eq!(backend.count("create_pix_payment"), 0);
    }
}
