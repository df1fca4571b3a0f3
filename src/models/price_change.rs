use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{PriceRecord, ProductId, StoreId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChangeClass {
    Increase,
    Decrease,
    /// Price held but availability or discount state moved.
    Unchanged,
    /// No usable prior price for the pair.
    New,
    /// The listing went from available to unavailable.
    Discontinued,
}

/// Payload handed to the real-time transport. Never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceChangeEvent {
    pub product_id: ProductId,
    pub store_id: StoreId,
    pub old_price: Option<Decimal>,
    pub new_price: Decimal,
    /// Positive for increases. `None` for new listings.
    pub percent_change: Option<Decimal>,
    pub change_class: ChangeClass,
    pub is_available: bool,
    pub is_discounted: bool,
    pub price_per_kg: Option<Decimal>,
    pub scraped_at: DateTime<Utc>,
}

impl PriceChangeEvent {
    /// Diffs `current` against the pair's previous current record.
    /// Returns `None` when nothing worth announcing changed.
    pub fn between(previous: Option<&PriceRecord>, current: &PriceRecord) -> Option<Self> {
        let previous = match previous {
            Some(previous) if !previous.price.is_zero() => previous,
            other => {
                return Some(Self::from_record(
                    current,
                    other.map(|p| p.price),
                    None,
                    ChangeClass::New,
                ));
            }
        };

        if previous.same_state_as(current) {
            return None;
        }

        let percent = percent_change(previous.price, current.price);
        let change_class = if previous.is_available && !current.is_available {
            ChangeClass::Discontinued
        } else if current.price > previous.price {
            ChangeClass::Increase
        } else if current.price < previous.price {
            ChangeClass::Decrease
        } else {
            ChangeClass::Unchanged
        };

        Some(Self::from_record(
            current,
            Some(previous.price),
            percent,
            change_class,
        ))
    }

    fn from_record(
        record: &PriceRecord,
        old_price: Option<Decimal>,
        percent_change: Option<Decimal>,
        change_class: ChangeClass,
    ) -> Self {
        Self {
            product_id: record.product_id,
            store_id: record.store_id,
            old_price,
            new_price: record.price,
            percent_change,
            change_class,
            is_available: record.is_available,
            is_discounted: record.is_discounted,
            price_per_kg: record.price_per_kg,
            scraped_at: record.scraped_at,
        }
    }
}

/// `(new - old) / old * 100`, rounded to two places. `None` when `old` is zero or the
/// result does not fit a `Decimal`.
pub fn percent_change(old: Decimal, new: Decimal) -> Option<Decimal> {
    if old.is_zero() {
        return None;
    }
    let percent = new
        .checked_sub(old)?
        .checked_div(old)?
        .checked_mul(Decimal::ONE_HUNDRED)?;
    Some(percent.round_dp(2))
}
