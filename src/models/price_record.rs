use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{NormalizedObservation, ProductId, StoreId};

/// Append-only price fact. The newest record per (product, store) is the current price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRecord {
    pub product_id: ProductId,
    pub store_id: StoreId,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    /// Price per kilogram, or per liter for volume packs.
    pub price_per_kg: Option<Decimal>,
    pub pack_size: Option<String>,
    pub pack_unit: Option<String>,
    pub is_available: bool,
    pub is_discounted: bool,
    pub discount_percent: Option<Decimal>,
    pub product_url: Option<String>,
    pub image_url: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl PriceRecord {
    pub fn from_observation(product_id: ProductId, observation: &NormalizedObservation) -> Self {
        let listing = &observation.listing;
        let (pack_size, pack_unit) = match &observation.pack {
            Some(pack) => (
                pack.total_quantity()
                    .map(|total| total.normalize().to_string())
                    .or_else(|| listing.pack_size.clone()),
                Some(pack.unit.as_str().to_string()),
            ),
            None => (listing.pack_size.clone(), None),
        };

        Self {
            product_id,
            store_id: listing.store_id,
            price: listing.price,
            original_price: listing.effective_original_price(),
            price_per_kg: observation.price_per_canonical_unit(),
            pack_size,
            pack_unit,
            is_available: listing.is_available,
            is_discounted: listing.is_discounted(),
            discount_percent: listing.discount_percent(),
            product_url: listing.product_url.clone(),
            image_url: listing.image_url.clone(),
            scraped_at: listing.captured_at,
        }
    }

    pub fn key(&self) -> (ProductId, StoreId) {
        (self.product_id, self.store_id)
    }

    /// Price, availability and discount flag all match.
    pub fn same_state_as(&self, other: &PriceRecord) -> bool {
        self.price == other.price
            && self.is_available == other.is_available
            && self.is_discounted == other.is_discounted
    }
}
