use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use super::{AppendOutcome, CatalogStore, PriceHistoryStore};
use crate::config::DatabaseConfig;
use crate::models::{
    Category, NewProduct, NewStore, PriceRecord, Product, ProductId, Store, StoreId, StoreStatus,
};
use crate::utils::error::{AppError, Result};

/// SQLite-backed catalog and price history sharing one pool.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        ensure_parent_dir(&config.url)?;

        // Every in-memory connection is its own database.
        let max_connections = if config.url.contains(":memory:") {
            1
        } else {
            config.max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&config.url)
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Storage(format!("Migration failed: {}", e)))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_product(&self, new_product: NewProduct) -> Result<Product> {
        let keywords = serde_json::to_string(&new_product.keywords)?;
        let id = sqlx::query(
            "INSERT INTO products (name, category, keywords, is_organic, is_active) VALUES (?, ?, ?, ?, 1)",
        )
        .bind(&new_product.name)
        .bind(new_product.category.as_str())
        .bind(keywords)
        .bind(new_product.is_organic)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Product::new(id, new_product))
    }

    pub async fn insert_store(&self, new_store: NewStore) -> Result<Store> {
        let id = sqlx::query(
            "INSERT INTO stores (name, base_url, adapter, is_active, status) VALUES (?, ?, ?, 1, 'idle')",
        )
        .bind(&new_store.name)
        .bind(&new_store.base_url)
        .bind(&new_store.adapter)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Store::new(id, new_store))
    }

    /// Inserts the seed catalog when the product and store tables are empty.
    pub async fn seed_if_empty(&self, products: Vec<NewProduct>, stores: Vec<NewStore>) -> Result<()> {
        let product_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        if product_count == 0 {
            for product in products {
                self.insert_product(product).await?;
            }
        }

        let store_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stores")
            .fetch_one(&self.pool)
            .await?;
        if store_count == 0 {
            for store in stores {
                self.insert_store(store).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for SqliteStorage {
    async fn list_active_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            "SELECT id, name, category, keywords, is_organic, is_active FROM products WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(product_from_row).collect()
    }

    async fn list_active_stores(&self) -> Result<Vec<Store>> {
        let rows = sqlx::query(
            "SELECT id, name, base_url, adapter, is_active, status, last_scraped FROM stores WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(store_from_row).collect()
    }

    async fn update_store_status(
        &self,
        store_id: StoreId,
        status: StoreStatus,
        last_scraped: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE stores SET status = ?, last_scraped = COALESCE(?, last_scraped) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(last_scraped.map(format_timestamp))
        .bind(store_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound {
                resource: format!("store {}", store_id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PriceHistoryStore for SqliteStorage {
    async fn get_current_price(
        &self,
        product_id: ProductId,
        store_id: StoreId,
    ) -> Result<Option<PriceRecord>> {
        let row = sqlx::query(&format!(
            "{} WHERE product_id = ? AND store_id = ? ORDER BY scraped_at DESC LIMIT 1",
            SELECT_RECORDS
        ))
        .bind(product_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn append(&self, record: &PriceRecord) -> Result<AppendOutcome> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO price_records
               (product_id, store_id, price, original_price, price_per_kg, pack_size, pack_unit,
                is_available, is_discounted, discount_percent, product_url, image_url, scraped_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.product_id)
        .bind(record.store_id)
        .bind(record.price.to_string())
        .bind(record.original_price.map(|d| d.to_string()))
        .bind(record.price_per_kg.map(|d| d.to_string()))
        .bind(&record.pack_size)
        .bind(&record.pack_unit)
        .bind(record.is_available)
        .bind(record.is_discounted)
        .bind(record.discount_percent.map(|d| d.to_string()))
        .bind(&record.product_url)
        .bind(&record.image_url)
        .bind(format_timestamp(record.scraped_at))
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            AppendOutcome::Duplicate
        } else {
            AppendOutcome::Inserted
        })
    }

    async fn list_trend(
        &self,
        product_id: ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE product_id = ? AND scraped_at >= ? ORDER BY scraped_at ASC, store_id ASC",
            SELECT_RECORDS
        ))
        .bind(product_id)
        .bind(format_timestamp(since))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}

const SELECT_RECORDS: &str = "SELECT product_id, store_id, price, original_price, price_per_kg, \
    pack_size, pack_unit, is_available, is_discounted, discount_percent, product_url, image_url, \
    scraped_at FROM price_records";

// Fixed-width UTC timestamps so text ordering matches time ordering.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Storage(format!("Bad timestamp '{}': {}", text, e)))
}

fn parse_decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).map_err(|e| AppError::Storage(format!("Bad decimal '{}': {}", text, e)))
}

fn optional_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>> {
    row.try_get::<Option<String>, _>(column)?
        .as_deref()
        .map(parse_decimal)
        .transpose()
}

fn product_from_row(row: &SqliteRow) -> Result<Product> {
    let keywords: String = row.try_get("keywords")?;
    let category: String = row.try_get("category")?;
    let mut product = Product::new(
        row.try_get("id")?,
        NewProduct {
            name: row.try_get("name")?,
            category: Category::from_str(&category)?,
            keywords: serde_json::from_str(&keywords)?,
            is_organic: row.try_get("is_organic")?,
        },
    );
    product.is_active = row.try_get("is_active")?;
    Ok(product)
}

fn store_from_row(row: &SqliteRow) -> Result<Store> {
    let status: String = row.try_get("status")?;
    let last_scraped: Option<String> = row.try_get("last_scraped")?;
    let mut store = Store::new(
        row.try_get("id")?,
        NewStore {
            name: row.try_get("name")?,
            base_url: row.try_get("base_url")?,
            adapter: row.try_get("adapter")?,
        },
    );
    store.is_active = row.try_get("is_active")?;
    store.status = StoreStatus::from_str(&status)?;
    store.last_scraped = last_scraped.as_deref().map(parse_timestamp).transpose()?;
    Ok(store)
}

fn record_from_row(row: &SqliteRow) -> Result<PriceRecord> {
    let price: String = row.try_get("price")?;
    let scraped_at: String = row.try_get("scraped_at")?;
    Ok(PriceRecord {
        product_id: row.try_get("product_id")?,
        store_id: row.try_get("store_id")?,
        price: parse_decimal(&price)?,
        original_price: optional_decimal(row, "original_price")?,
        price_per_kg: optional_decimal(row, "price_per_kg")?,
        pack_size: row.try_get("pack_size")?,
        pack_unit: row.try_get("pack_unit")?,
        is_available: row.try_get("is_available")?,
        is_discounted: row.try_get("is_discounted")?,
        discount_percent: optional_decimal(row, "discount_percent")?,
        product_url: row.try_get("product_url")?,
        image_url: row.try_get("image_url")?,
        scraped_at: parse_timestamp(&scraped_at)?,
    })
}

fn ensure_parent_dir(url: &str) -> Result<()> {
    let Some(path) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.contains(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
