//! Read-side price analysis over stored history.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{PriceRecord, ProductId, StoreId, percent_change};
use crate::storage::PriceHistoryStore;
use crate::utils::error::Result;

/// Moves smaller than this percentage count as stable.
const STABLE_THRESHOLD: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Stable,
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendSummary {
    pub product_id: ProductId,
    pub samples: usize,
    pub first: Decimal,
    pub last: Decimal,
    pub change: Decimal,
    pub percent: Option<Decimal>,
    pub min: Decimal,
    pub max: Decimal,
    pub average: Decimal,
    pub direction: TrendDirection,
}

impl TrendSummary {
    /// Summarizes available records in the order given. `None` when none are available.
    pub fn from_records(product_id: ProductId, records: &[PriceRecord]) -> Option<Self> {
        let prices: Vec<Decimal> = records
            .iter()
            .filter(|r| r.is_available)
            .map(|r| r.price)
            .collect();
        let (&first, &last) = (prices.first()?, prices.last()?);

        let percent = percent_change(first, last);
        let direction = match percent {
            Some(p) if p.abs() < STABLE_THRESHOLD => TrendDirection::Stable,
            Some(p) if p.is_sign_positive() => TrendDirection::Increasing,
            Some(_) => TrendDirection::Decreasing,
            None => TrendDirection::Stable,
        };
        // Running mean; a plain sum can overflow on absurd scraped prices.
        let mean = prices
            .iter()
            .zip(1u32..)
            .fold(Decimal::ZERO, |mean, (&price, n)| {
                mean + (price - mean) / Decimal::from(n)
            });

        Some(Self {
            product_id,
            samples: prices.len(),
            first,
            last,
            change: last - first,
            percent,
            min: prices.iter().copied().min().unwrap_or(first),
            max: prices.iter().copied().max().unwrap_or(first),
            average: mean.round_dp(2),
            direction,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorePrice {
    pub store_id: StoreId,
    pub price: Decimal,
    pub price_per_kg: Option<Decimal>,
    pub scraped_at: DateTime<Utc>,
}

/// Current price of one product across stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreComparison {
    pub product_id: ProductId,
    /// Cheapest first.
    pub prices: Vec<StorePrice>,
    pub lowest: Option<StorePrice>,
    pub highest: Option<StorePrice>,
    pub spread: Option<Decimal>,
}

impl StoreComparison {
    /// Uses the newest available record per store.
    pub fn from_records(product_id: ProductId, records: &[PriceRecord]) -> Self {
        let mut latest: HashMap<StoreId, &PriceRecord> = HashMap::new();
        for record in records.iter().filter(|r| r.is_available) {
            latest
                .entry(record.store_id)
                .and_modify(|current| {
                    if record.scraped_at > current.scraped_at {
                        *current = record;
                    }
                })
                .or_insert(record);
        }

        let mut prices: Vec<StorePrice> = latest
            .into_values()
            .map(|r| StorePrice {
                store_id: r.store_id,
                price: r.price,
                price_per_kg: r.price_per_kg,
                scraped_at: r.scraped_at,
            })
            .collect();
        prices.sort_by(|a, b| a.price.cmp(&b.price).then(a.store_id.cmp(&b.store_id)));

        let lowest = prices.first().cloned();
        let highest = prices.last().cloned();
        let spread = lowest
            .as_ref()
            .zip(highest.as_ref())
            .map(|(low, high)| high.price - low.price);

        Self {
            product_id,
            prices,
            lowest,
            highest,
            spread,
        }
    }
}

pub async fn product_trend(
    history: &dyn PriceHistoryStore,
    product_id: ProductId,
    since: DateTime<Utc>,
) -> Result<Option<TrendSummary>> {
    let records = history.list_trend(product_id, since).await?;
    Ok(TrendSummary::from_records(product_id, &records))
}

pub async fn compare_stores(
    history: &dyn PriceHistoryStore,
    product_id: ProductId,
    since: DateTime<Utc>,
) -> Result<StoreComparison> {
    let records = history.list_trend(product_id, since).await?;
    Ok(StoreComparison::from_records(product_id, &records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NormalizedObservation, RawListing};
    use crate::storage::MemoryPriceHistory;
    use chrono::Duration;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn record(store_id: StoreId, price: &str, days_ago: i64, available: bool) -> PriceRecord {
        let listing = RawListing::new(store_id, "Tomatoes", d(price))
            .with_availability(available)
            .captured_at(Utc::now() - Duration::days(days_ago));
        PriceRecord::from_observation(2, &NormalizedObservation::from_listing(listing))
    }

    #[test]
    fn test_increasing_trend() {
        let records = vec![record(1, "10", 3, true), record(1, "8", 2, true), record(1, "12", 1, true)];
        let summary = TrendSummary::from_records(2, &records).unwrap();

        assert_eq!(summary.direction, TrendDirection::Increasing);
        assert_eq!(summary.change, d("2"));
        assert_eq!(summary.percent, Some(d("20")));
        assert_eq!(summary.min, d("8"));
        assert_eq!(summary.max, d("12"));
        assert_eq!(summary.average, d("10"));
    }

    #[test]
    fn test_small_move_is_stable_and_unavailable_ignored() {
        let records = vec![
            record(1, "10", 3, true),
            record(1, "3", 2, false),
            record(1, "10.4", 1, true),
        ];
        let summary = TrendSummary::from_records(2, &records).unwrap();

        assert_eq!(summary.direction, TrendDirection::Stable);
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.min, d("10"));
    }

    #[test]
    fn test_huge_prices_do_not_overflow_average() {
        let records = vec![
            record(1, "79228162514264337593543950335", 2, true),
            record(1, "79228162514264337593543950335", 1, true),
        ];
        let summary = TrendSummary::from_records(2, &records).unwrap();
        assert_eq!(summary.average, Decimal::MAX);
        assert_eq!(summary.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_decreasing_and_empty() {
        let records = vec![record(1, "20", 2, true), record(1, "15", 1, true)];
        let summary = TrendSummary::from_records(2, &records).unwrap();
        assert_eq!(summary.direction, TrendDirection::Decreasing);

        assert!(TrendSummary::from_records(2, &[record(1, "5", 1, false)]).is_none());
    }

    #[tokio::test]
    async fn test_compare_stores_uses_latest_per_store() {
        let history = MemoryPriceHistory::new();
        for rec in [
            record(1, "9", 5, true),
            record(1, "12", 1, true),
            record(2, "10", 2, true),
            record(3, "7", 1, false),
        ] {
            history.append(&rec).await.unwrap();
        }

        let comparison = compare_stores(&history, 2, Utc::now() - Duration::days(30))
            .await
            .unwrap();

        assert_eq!(comparison.prices.len(), 2);
        assert_eq!(comparison.lowest.unwrap().store_id, 2);
        assert_eq!(comparison.highest.unwrap().price, d("12"));
        assert_eq!(comparison.spread, Some(d("2")));

        let trend = product_trend(&history, 2, Utc::now() - Duration::days(3)).await.unwrap().unwrap();
        assert_eq!(trend.samples, 2);
    }
}
