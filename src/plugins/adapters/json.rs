use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use super::{clean_text, detect_organic};
use crate::models::{FailureClass, FetchFailure, RawListing, Store};
use crate::normalizer;
use crate::plugins::traits::{FetchOutput, SourceAdapter};
use crate::scraper::WebScraper;

/// Field mapping for stores that expose their catalog as JSON.
/// Paths are dotted (`data.products`, `pricing.current`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonProfile {
    pub adapter_type: String,
    pub name: String,
    pub endpoints: Vec<String>,
    pub items_path: String,
    pub name_field: String,
    pub price_field: String,
    pub original_price_field: Option<String>,
    pub size_field: Option<String>,
    pub available_field: Option<String>,
    pub url_field: Option<String>,
    pub image_field: Option<String>,
}

impl JsonProfile {
    pub fn talabat() -> Self {
        Self {
            adapter_type: "talabat".to_string(),
            name: "Talabat Mart".to_string(),
            endpoints: vec!["api/grocery/categories/fruits-vegetables/items".to_string()],
            items_path: "result.items".to_string(),
            name_field: "title".to_string(),
            price_field: "price".to_string(),
            original_price_field: Some("old_price".to_string()),
            size_field: Some("unit_size".to_string()),
            available_field: Some("in_stock".to_string()),
            url_field: Some("url".to_string()),
            image_field: Some("image".to_string()),
        }
    }

    pub fn breadfast() -> Self {
        Self {
            adapter_type: "breadfast".to_string(),
            name: "Breadfast".to_string(),
            endpoints: vec!["api/v3/categories/fresh-fruits-vegetables/products".to_string()],
            items_path: "data".to_string(),
            name_field: "name".to_string(),
            price_field: "pricing.price".to_string(),
            original_price_field: Some("pricing.original_price".to_string()),
            size_field: Some("size".to_string()),
            available_field: Some("availability".to_string()),
            url_field: Some("permalink".to_string()),
            image_field: Some("images.0".to_string()),
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self::talabat(), Self::breadfast()]
    }
}

pub struct JsonCatalogAdapter {
    profile: JsonProfile,
    scraper: WebScraper,
}

impl JsonCatalogAdapter {
    pub fn new(profile: JsonProfile, scraper: WebScraper) -> Self {
        Self { profile, scraper }
    }

    pub fn parse_items(
        &self,
        store: &Store,
        document: &Value,
        cancel: &CancellationToken,
    ) -> Result<(Vec<RawListing>, usize), FetchFailure> {
        let items = lookup(document, &self.profile.items_path)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                FetchFailure::new(
                    store.id,
                    FailureClass::ParseError,
                    format!("no array at '{}'", self.profile.items_path),
                )
            })?;

        let mut listings = Vec::with_capacity(items.len());
        let mut skipped = 0;
        for item in items {
            if cancel.is_cancelled() {
                return Err(FetchFailure::new(
                    store.id,
                    FailureClass::Cancelled,
                    "cancelled between listings",
                ));
            }
            match self.parse_item(store, item) {
                Some(listing) => listings.push(listing),
                None => skipped += 1,
            }
        }
        Ok((listings, skipped))
    }

    fn parse_item(&self, store: &Store, item: &Value) -> Option<RawListing> {
        let name = lookup(item, &self.profile.name_field)
            .and_then(Value::as_str)
            .map(clean_text)?;
        let price = lookup(item, &self.profile.price_field).and_then(decimal_value)?;

        let mut listing = RawListing::new(store.id, name.clone(), price);
        if !listing.is_valid() {
            return None;
        }

        if let Some(original) = self.optional(item, &self.profile.original_price_field, decimal_value) {
            listing = listing.with_original_price(original);
        }
        let size = self.optional(item, &self.profile.size_field, |v| v.as_str().map(clean_text));
        if let Some(pack) = size.or_else(|| normalizer::parse_pack(&name).map(|_| name.clone())) {
            listing = listing.with_pack_size(pack);
        }
        let available = self
            .optional(item, &self.profile.available_field, availability_value)
            .unwrap_or(true);
        let product_url = self
            .optional(item, &self.profile.url_field, |v| v.as_str().map(str::to_string))
            .map(|u| store.absolute_url(&u));
        let image_url = self
            .optional(item, &self.profile.image_field, |v| v.as_str().map(str::to_string))
            .map(|u| store.absolute_url(&u));

        listing.organic_hint = detect_organic(&name);
        Some(
            listing
                .with_availability(available)
                .with_urls(product_url, image_url),
        )
    }

    fn optional<T>(
        &self,
        item: &Value,
        field: &Option<String>,
        extract: impl Fn(&Value) -> Option<T>,
    ) -> Option<T> {
        field.as_deref().and_then(|path| lookup(item, path)).and_then(extract)
    }
}

#[async_trait]
impl SourceAdapter for JsonCatalogAdapter {
    fn adapter_type(&self) -> &str {
        &self.profile.adapter_type
    }

    fn name(&self) -> &str {
        &self.profile.name
    }

    async fn fetch(
        &self,
        store: &Store,
        cancel: &CancellationToken,
    ) -> Result<FetchOutput, FetchFailure> {
        let mut output = FetchOutput::default();
        let mut fetched = 0;
        let mut last_failure = None;

        for endpoint in &self.profile.endpoints {
            if cancel.is_cancelled() {
                return Err(FetchFailure::new(store.id, FailureClass::Cancelled, "fetch cancelled"));
            }
            let url = store.absolute_url(endpoint);
            let page = match self.scraper.fetch_page(store.id, &url, cancel).await {
                Ok(page) => page,
                Err(failure) if failure.class.is_transient() => {
                    tracing::warn!(store_id = store.id, url = %url, "Catalog endpoint failed: {}", failure);
                    output.failed_pages += 1;
                    last_failure = Some(failure);
                    continue;
                }
                Err(failure) => return Err(failure),
            };

            let document: Value = serde_json::from_str(&page.body).map_err(|e| {
                FetchFailure::new(store.id, FailureClass::ParseError, format!("{}: {}", url, e))
            })?;
            let (listings, skipped) = self.parse_items(store, &document, cancel)?;
            fetched += 1;
            output.listings.extend(listings);
            output.skipped += skipped;
        }

        if fetched == 0 {
            return Err(last_failure.unwrap_or_else(|| {
                FetchFailure::new(store.id, FailureClass::Unreachable, "no catalog endpoints configured")
            }));
        }
        Ok(output)
    }

    async fn health_check(&self, store: &Store) -> bool {
        self.scraper.test_connection(&store.base_url).await
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').filter(|p| !p.is_empty()).try_fold(value, |current, key| {
        match key.parse::<usize>() {
            Ok(index) => current.get(index),
            Err(_) => current.get(key),
        }
    })
}

fn decimal_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => normalizer::parse_price(s),
        _ => None,
    }
}

fn availability_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|stock| stock > 0.0),
        Value::String(s) => match s.to_lowercase().as_str() {
            "in_stock" | "instock" | "available" | "true" => Some(true),
            "out_of_stock" | "outofstock" | "unavailable" | "sold_out" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
