use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::StoreId;
use crate::normalizer::{self, PackSize, UnitPrice};

pub const DEFAULT_CURRENCY: &str = "EGP";

/// One product tile as an adapter saw it. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawListing {
    pub store_id: StoreId,
    pub name: String,
    pub price: Decimal,
    /// Crossed-out price shown next to a promotion, if any.
    pub original_price: Option<Decimal>,
    pub currency: String,
    pub pack_size: Option<String>,
    pub is_available: bool,
    pub product_url: Option<String>,
    pub image_url: Option<String>,
    /// Listing text mentioned organic/bio. Diagnostic only.
    pub organic_hint: bool,
    pub captured_at: DateTime<Utc>,
}

impl RawListing {
    pub fn new(store_id: StoreId, name: impl Into<String>, price: Decimal) -> Self {
        Self {
            store_id,
            name: name.into(),
            price,
            original_price: None,
            currency: DEFAULT_CURRENCY.to_string(),
            pack_size: None,
            is_available: true,
            product_url: None,
            image_url: None,
            organic_hint: false,
            captured_at: Utc::now(),
        }
    }

    pub fn with_pack_size(mut self, pack_size: impl Into<String>) -> Self {
        self.pack_size = Some(pack_size.into());
        self
    }

    pub fn with_original_price(mut self, original_price: Decimal) -> Self {
        self.original_price = Some(original_price);
        self
    }

    pub fn with_availability(mut self, is_available: bool) -> Self {
        self.is_available = is_available;
        self
    }

    pub fn with_urls(mut self, product_url: Option<String>, image_url: Option<String>) -> Self {
        self.product_url = product_url;
        self.image_url = image_url;
        self
    }

    pub fn captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// A listing needs a name and a positive price to be worth normalizing.
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty() && self.price > Decimal::ZERO
    }

    /// The original price only counts when it is above the current one.
    pub fn effective_original_price(&self) -> Option<Decimal> {
        self.original_price.filter(|original| *original > self.price)
    }

    pub fn is_discounted(&self) -> bool {
        self.effective_original_price().is_some()
    }

    pub fn discount_percent(&self) -> Option<Decimal> {
        let original = self.effective_original_price()?;
        Some(((original - self.price) / original * Decimal::ONE_HUNDRED).round_dp(2))
    }
}

/// A raw listing plus its parsed pack and canonical unit price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedObservation {
    pub listing: RawListing,
    pub pack: Option<PackSize>,
    /// `None` when the pack is discrete (pieces) or could not be parsed.
    pub unit_price: Option<UnitPrice>,
}

impl NormalizedObservation {
    pub fn from_listing(listing: RawListing) -> Self {
        let pack = listing.pack_size.as_deref().and_then(normalizer::parse_pack);
        let unit_price = pack.as_ref().and_then(|p| p.unit_price(listing.price));
        Self {
            listing,
            pack,
            unit_price,
        }
    }

    pub fn price_per_canonical_unit(&self) -> Option<Decimal> {
        self.unit_price.as_ref().map(|u| u.value)
    }
}
