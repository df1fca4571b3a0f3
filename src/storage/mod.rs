//! Persistence seams the pipeline depends on.
//!
//! The catalog is read-only to the pipeline apart from store status. Price history is
//! append-only; the newest record per (product, store) by `scraped_at` is the current price.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{PriceRecord, Product, ProductId, Store, StoreId, StoreStatus};
use crate::utils::error::Result;

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryCatalog, MemoryPriceHistory};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppendOutcome {
    Inserted,
    /// A record with the same (product, store, scraped_at) already exists.
    Duplicate,
}

/// Read access to products and stores, plus store status write-back.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_active_products(&self) -> Result<Vec<Product>>;
    async fn list_active_stores(&self) -> Result<Vec<Store>>;
    async fn update_store_status(
        &self,
        store_id: StoreId,
        status: StoreStatus,
        last_scraped: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

#[async_trait]
pub trait PriceHistoryStore: Send + Sync {
    async fn get_current_price(
        &self,
        product_id: ProductId,
        store_id: StoreId,
    ) -> Result<Option<PriceRecord>>;

    async fn append(&self, record: &PriceRecord) -> Result<AppendOutcome>;

    /// Every record for the product across stores since `since`, oldest first.
    async fn list_trend(
        &self,
        product_id: ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceRecord>>;
}
