//! Catalog product.

use serde::{Deserialize, Serialize};

use crate::types::id::ProductId;
use crate::types::money::Money;

/// A product as listed in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    /// Units in stock. Products with no stock are hidden from the grid.
    pub stock: u32,
    /// Flagged as on sale by the catalog.
    #[serde(default)]
    pub on_sale: bool,
    /// Flagged for the highlights strip.
    #[serde(default)]
    pub featured: bool,
}

impl Product {
    #[must_use]
    pub const fn in_stock(&self) -> bool {
        self.stock > 0
    }

    /// Case-insensitive substring match on the product name.
    ///
    /// `needle` must already be lowercased.
    #[must_use]
    pub fn name_contains(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
    }
}
