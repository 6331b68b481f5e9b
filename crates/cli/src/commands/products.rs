//! One-shot catalog commands.
//!
//! # Usage
//!
//! ```bash
//! # List everything in stock
//! vitrine products
//!
//! # Search by name
//! vitrine products "pão de queijo"
//!
//! # Show the promotions strip
//! vitrine promotions
//! ```

use std::io::Write;

use vitrine_storefront::Storefront;

use super::CliError;
use crate::render;

/// List in-stock products, optionally filtered by name.
///
/// # Errors
///
/// Returns an error if the catalog cannot be fetched or output fails.
pub async fn list(app: &Storefront, query: &str, out: &mut impl Write) -> Result<(), CliError> {
    let products = app.catalog().search(query).await?;
    tracing::debug!(count = products.len(), query, "Listing products");
    render::products(out, &products)?;
    Ok(())
}

/// List products on promotion.
///
/// # Errors
///
/// Returns an error if the catalog cannot be fetched or output fails.
pub async fn promotions(app: &Storefront, out: &mut impl Write) -> Result<(), CliError> {
    let products = app.catalog().promotions().await?;
    render::products(out, &products)?;
    Ok(())
}
