//! Order (cart-in-progress) types.
//!
//! The backend owns the order; these types are the client's read-only view
//! of it. Line subtotals and every money field are server-computed.

use serde::{Deserialize, Serialize};

use crate::types::address::DeliveryAddress;
use crate::types::id::{OrderId, ProductId};
use crate::types::money::Money;

/// One row of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Product on this line. Unique within an order.
    pub product_id: ProductId,
    /// Display name at the time the line was added.
    pub name: String,
    /// Unit price.
    pub unit_price: Money,
    /// Units ordered. A line never has quantity zero; zero removes it.
    pub quantity: u32,
    /// Server-computed line subtotal.
    pub subtotal: Money,
}

/// An open order as last fetched from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub items: Vec<LineItem>,
    pub total: Money,
    pub discount: Money,
    pub shipping_cost: Money,
    /// Shipping was waived by a promotion.
    pub promotional_shipping: bool,
    /// Coupon echoed back by the server once applied.
    pub coupon_code: Option<String>,
    pub delivery_address: Option<DeliveryAddress>,
}

impl Order {
    /// Find the line for a product, if the product is in the order.
    #[must_use]
    pub fn line(&self, product_id: ProductId) -> Option<&LineItem> {
        self.items.iter().find(|line| line.product_id == product_id)
    }

    /// Quantity ordered for a product (zero when absent).
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.line(product_id).map_or(0, |line| line.quantity)
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items
            .iter()
            .fold(0, |count: u32, line| count.saturating_add(line.quantity))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// A coupon is locked in; coupon entry must be disabled.
    #[must_use]
    pub fn has_coupon(&self) -> bool {
        self.coupon_code
            .as_deref()
            .is_some_and(|code| !code.trim().is_empty())
    }
}

/// Two open orders exist for the same browser: one owned by the user and
/// one created anonymously before login.
///
/// Only lives until the user picks a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub user_order_id: OrderId,
    pub anonymous_order_id: OrderId,
    pub message: Option<String>,
}
