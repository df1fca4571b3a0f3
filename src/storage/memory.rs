use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{AppendOutcome, CatalogStore, PriceHistoryStore};
use crate::models::{
    Category, NewProduct, NewStore, PriceRecord, Product, ProductId, Store, StoreId, StoreStatus,
};
use crate::utils::error::{AppError, Result};

/// In-memory catalog for tests and dry runs.
#[derive(Default)]
pub struct MemoryCatalog {
    products: RwLock<Vec<Product>>,
    stores: RwLock<Vec<Store>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the default vegetable list and store set.
    pub async fn seeded() -> Self {
        let catalog = Self::new();
        for product in seed_products() {
            catalog.add_product(product).await;
        }
        for store in seed_stores() {
            catalog.add_store(store).await;
        }
        catalog
    }

    pub async fn add_product(&self, new_product: NewProduct) -> Product {
        let mut products = self.products.write().await;
        let product = Product::new(products.len() as ProductId + 1, new_product);
        products.push(product.clone());
        product
    }

    pub async fn add_store(&self, new_store: NewStore) -> Store {
        let mut stores = self.stores.write().await;
        let store = Store::new(stores.len() as StoreId + 1, new_store);
        stores.push(store.clone());
        store
    }

    pub async fn set_product_active(&self, product_id: ProductId, is_active: bool) {
        let mut products = self.products.write().await;
        if let Some(product) = products.iter_mut().find(|p| p.id == product_id) {
            product.is_active = is_active;
        }
    }

    pub async fn set_store_active(&self, store_id: StoreId, is_active: bool) {
        let mut stores = self.stores.write().await;
        if let Some(store) = stores.iter_mut().find(|s| s.id == store_id) {
            store.is_active = is_active;
        }
    }

    pub async fn store(&self, store_id: StoreId) -> Option<Store> {
        let stores = self.stores.read().await;
        stores.iter().find(|s| s.id == store_id).cloned()
    }

    pub async fn product_by_name(&self, name: &str) -> Option<Product> {
        let products = self.products.read().await;
        products.iter().find(|p| p.name == name).cloned()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn list_active_products(&self) -> Result<Vec<Product>> {
        let products = self.products.read().await;
        Ok(products.iter().filter(|p| p.is_active).cloned().collect())
    }

    async fn list_active_stores(&self) -> Result<Vec<Store>> {
        let stores = self.stores.read().await;
        Ok(stores.iter().filter(|s| s.is_active).cloned().collect())
    }

    async fn update_store_status(
        &self,
        store_id: StoreId,
        status: StoreStatus,
        last_scraped: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut stores = self.stores.write().await;
        let store = stores
            .iter_mut()
            .find(|s| s.id == store_id)
            .ok_or_else(|| AppError::NotFound {
                resource: format!("store {}", store_id),
            })?;
        store.status = status;
        if last_scraped.is_some() {
            store.last_scraped = last_scraped;
        }
        Ok(())
    }
}

/// In-memory append-only price history.
#[derive(Default)]
pub struct MemoryPriceHistory {
    records: RwLock<HashMap<(ProductId, StoreId), Vec<PriceRecord>>>,
}

impl MemoryPriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let records = self.records.read().await;
        records.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn records_for(&self, product_id: ProductId, store_id: StoreId) -> Vec<PriceRecord> {
        let records = self.records.read().await;
        records.get(&(product_id, store_id)).cloned().unwrap_or_default()
    }

    pub async fn records_for_store(&self, store_id: StoreId) -> Vec<PriceRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|((_, s), _)| *s == store_id)
            .flat_map(|(_, history)| history.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl PriceHistoryStore for MemoryPriceHistory {
    async fn get_current_price(
        &self,
        product_id: ProductId,
        store_id: StoreId,
    ) -> Result<Option<PriceRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(product_id, store_id))
            .and_then(|history| history.iter().max_by_key(|r| r.scraped_at))
            .cloned())
    }

    async fn append(&self, record: &PriceRecord) -> Result<AppendOutcome> {
        let mut records = self.records.write().await;
        let history = records.entry(record.key()).or_default();
        if history.iter().any(|r| r.scraped_at == record.scraped_at) {
            return Ok(AppendOutcome::Duplicate);
        }
        history.push(record.clone());
        Ok(AppendOutcome::Inserted)
    }

    async fn list_trend(
        &self,
        product_id: ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceRecord>> {
        let records = self.records.read().await;
        let mut trend: Vec<PriceRecord> = records
            .iter()
            .filter(|((p, _), _)| *p == product_id)
            .flat_map(|(_, history)| history.iter())
            .filter(|r| r.scraped_at >= since)
            .cloned()
            .collect();
        trend.sort_by_key(|r| (r.scraped_at, r.store_id));
        Ok(trend)
    }
}

fn product(name: &str, category: Category, keywords: &[&str]) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        category,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        is_organic: false,
    }
}

/// The default tracked vegetables and herbs, with English and Arabic match terms.
pub fn seed_products() -> Vec<NewProduct> {
    use Category::{A, B};
    vec![
        product("Cucumbers", A, &["cucumber", "cucumbers", "خيار"]),
        product("Tomatoes", A, &["tomato", "tomatoes", "طماطم"]),
        product("Cherry Tomatoes", A, &["cherry tomato", "cherry tomatoes", "طماطم شيري"]),
        product("Capsicum Mix", A, &["capsicum mix", "mixed capsicum", "mixed peppers", "فلفل الوان"]),
        product("Capsicum Red", A, &["red capsicum", "capsicum red", "red pepper", "فلفل احمر"]),
        product("Capsicum Yellow", A, &["yellow capsicum", "capsicum yellow", "yellow pepper", "فلفل اصفر"]),
        product("Chili Pepper", A, &["chili", "chilli", "hot pepper", "فلفل حار"]),
        product("Arugula", A, &["arugula", "rocket", "جرجير"]),
        product("Parsley", A, &["parsley", "بقدونس"]),
        product("Coriander", A, &["coriander", "cilantro", "كزبرة"]),
        product("Mint", A, &["mint", "نعناع"]),
        product("Tuscan Kale", A, &["tuscan kale", "cavolo nero"]),
        product("Italian Basil", A, &["basil", "italian basil", "ريحان"]),
        product("Colored Cherry Tomatoes", B, &["colored cherry tomatoes", "coloured cherry tomatoes", "mixed cherry tomatoes"]),
        product("Capsicum Green", B, &["green capsicum", "capsicum green", "green pepper", "فلفل اخضر"]),
        product("Italian Arugula", B, &["italian arugula", "wild rocket", "wild arugula"]),
        product("Chives", B, &["chives", "chive"]),
        product("Curly Kale", B, &["curly kale", "kale"]),
        product("Batavia", B, &["batavia"]),
        product("Iceberg", B, &["iceberg"]),
        product("Oak Leaf", B, &["oak leaf", "oakleaf"]),
        product("Romaine", B, &["romaine", "خس روماني"]),
    ]
}

pub fn seed_stores() -> Vec<NewStore> {
    let store = |name: &str, base_url: &str, adapter: &str| NewStore {
        name: name.to_string(),
        base_url: base_url.to_string(),
        adapter: adapter.to_string(),
    };
    vec![
        store("Metro", "https://www.metro-markets.com/egypt/", "metro"),
        store("Spinneys", "https://spinneys-egypt.com/en/", "spinneys"),
        store("Gourmet", "https://gourmetegypt.com/", "gourmet"),
        store("Talabat", "https://www.talabat.com/egypt/", "talabat"),
        store("Breadfast", "https://breadfast.com/", "breadfast"),
        store("Rabbit", "https://rabbit.com.eg/", "rabbit"),
        store("Instashop", "https://instashop.com.eg/", "instashop"),
        store("RDNA", "https://rdna.com.eg/", "rdna"),
    ]
}
