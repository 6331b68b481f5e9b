//! Cart conflict dialog.
//!
//! Shown when logging in finds an open order on the account while the
//! browser already holds an anonymous one. The dialog is a thin view over
//! [`CartStore::pending_conflict`]; choosing or dismissing always closes it.

use tracing::info;
use vitrine_core::OrderId;

use crate::cart::{CartStore, ConflictChoice};

/// Shown when the backend sends no explanation of its own.
pub const DEFAULT_CONFLICT_MESSAGE: &str = "You already have an open cart on your account. \
     Keep the account cart, or replace it with the items you added before signing in?";

/// What the dialog displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPrompt {
    pub message: String,
    pub user_order_id: OrderId,
    pub anonymous_order_id: OrderId,
}

/// Conflict resolution dialog.
#[derive(Debug)]
pub struct ConflictDialog;

impl ConflictDialog {
    /// The prompt to show, when a conflict is pending.
    #[must_use]
    pub fn prompt(cart: &CartStore) -> Option<ConflictPrompt> {
        let record = cart.pending_conflict()?;
        let message = record
            .message
            .as_deref()
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .unwrap_or(DEFAULT_CONFLICT_MESSAGE)
            .to_string();

        Some(ConflictPrompt {
            message,
            user_order_id: record.user_order_id,
            anonymous_order_id: record.anonymous_order_id,
        })
    }

    /// Apply the user's choice and close the dialog.
    pub async fn choose(cart: &mut CartStore, choice: ConflictChoice) {
        info!(?choice, "Cart conflict resolved");
        cart.resolve_conflict(choice).await;
    }

    /// Close without choosing. Both orders stay as they are.
    pub fn dismiss(cart: &mut CartStore) {
        cart.dismiss_conflict();
    }
}
