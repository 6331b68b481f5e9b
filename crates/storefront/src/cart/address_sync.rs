//! Save an order's delivery address to the signed-in user's address book.
//!
//! Runs after every order load. An address entered before login ends up on
//! the order but not in the account; this copies it over at most once per
//! `(user, order)` pair. Failures only cost the convenience, so they are
//! logged and dropped.

use tracing::{debug, info, warn};

use super::{CartStore, OrderState};

impl CartStore {
    pub(super) async fn sync_delivery_address(&mut self) {
        let Some(identity) = self.identity() else {
            return;
        };
        let OrderState::Loaded(order) = &self.state else {
            return;
        };
        let Some(address) = order.delivery_address.clone() else {
            return;
        };
        let order_id = order.id;

        // Marked before the attempt: a failure is not retried for this pair.
        if !self.synced_addresses.insert((identity.user_id, order_id)) {
            return;
        }

        let saved = match self.backend.list_addresses().await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Could not list saved addresses");
                return;
            }
        };
        if saved.iter().any(|existing| address.same_place_as(existing)) {
            debug!(order_id = %order_id, "Delivery address already saved");
            return;
        }

        match self.backend.create_address(&address.to_new_address()).await {
            Ok(created) => {
                info!(order_id = %order_id, address_id = %created.id, "Saved delivery address to account");
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Could not save delivery address");
            }
        }
    }
}
