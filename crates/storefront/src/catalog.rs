//! Product catalog.
//!
//! The product list is fetched once and cached with `moka` for the configured
//! TTL. Search and the home-page strips are computed client-side from the
//! cached list; the functions doing so are pure and exported for callers
//! that already hold a list.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, instrument};
use vitrine_core::{Money, Product, ProductId};

use crate::api::Backend;
use crate::error::Result;

/// Products priced below this are shown as promotions.
const PROMOTION_CEILING_CENTS: i64 = 2000;
const PROMOTION_LIMIT: usize = 6;
const HIGHLIGHT_LIMIT: usize = 2;

/// Cache key for catalog responses.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum CacheKey {
    Products,
}

/// Cached catalog client.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    backend: Arc<dyn Backend>,
    cache: Cache<CacheKey, Arc<Vec<Product>>>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("cached_entries", &self.inner.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl Catalog {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(16).time_to_live(ttl).build();
        Self {
            inner: Arc::new(CatalogInner { backend, cache }),
        }
    }

    /// All products, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns the backend error on a cache miss.
    #[instrument(skip(self))]
    pub async fn products(&self) -> Result<Arc<Vec<Product>>> {
        if let Some(products) = self.inner.cache.get(&CacheKey::Products).await {
            debug!("Cache hit for products");
            return Ok(products);
        }

        let products = Arc::new(self.inner.backend.list_products().await?);
        debug!(count = products.len(), "Fetched products");
        self.inner
            .cache
            .insert(CacheKey::Products, Arc::clone(&products))
            .await;
        Ok(products)
    }

    /// Look a product up by id.
    ///
    /// # Errors
    ///
    /// Returns the backend error on a cache miss.
    pub async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        let products = self.products().await?;
        Ok(products.iter().find(|product| product.id == id).cloned())
    }

    /// In-stock products whose name contains `query`.
    ///
    /// # Errors
    ///
    /// Returns the backend error on a cache miss.
    pub async fn search(&self, query: &str) -> Result<Vec<Product>> {
        let products = self.products().await?;
        Ok(available(&filter_products(&products, query)))
    }

    /// The promotions strip.
    ///
    /// # Errors
    ///
    /// Returns the backend error on a cache miss.
    pub async fn promotions(&self) -> Result<Vec<Product>> {
        let products = self.products().await?;
        Ok(promotions(&products))
    }

    /// Drop cached data; the next read hits the backend.
    pub async fn invalidate(&self) {
        self.inner.cache.invalidate_all();
        self.inner.cache.run_pending_tasks().await;
    }
}

/// Case-insensitive substring match on the product name.
///
/// The query is trimmed; an empty query matches everything.
#[must_use]
pub fn filter_products(products: &[Product], query: &str) -> Vec<Product> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return products.to_vec();
    }
    products
        .iter()
        .filter(|product| product.name_contains(&needle))
        .cloned()
        .collect()
}

/// Products with stock left.
#[must_use]
pub fn available(products: &[Product]) -> Vec<Product> {
    products
        .iter()
        .filter(|product| product.in_stock())
        .cloned()
        .collect()
}

/// Up to six products priced under 20.00, in catalog order.
#[must_use]
pub fn promotions(products: &[Product]) -> Vec<Product> {
    let ceiling = Money::from_cents(PROMOTION_CEILING_CENTS);
    products
        .iter()
        .filter(|product| product.price < ceiling)
        .take(PROMOTION_LIMIT)
        .cloned()
        .collect()
}

/// The first two products of a (filtered) list.
#[must_use]
pub fn highlights(products: &[Product]) -> &[Product] {
    &products[..products.len().min(HIGHLIGHT_LIMIT)]
}
