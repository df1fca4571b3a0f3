//! Matches normalized observations to catalog products and diffs them against the
//! current price for each (product, store) pair.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{
    NormalizedObservation, PriceChangeEvent, PriceRecord, Product, ProductId, StoreId,
};
use crate::storage::PriceHistoryStore;
use crate::utils::error::Result;

type PairKey = (ProductId, StoreId);

/// Records and events for one store's batch.
///
/// Holds the pair locks taken during reconciliation; they are released when the
/// outcome is dropped, so publish before dropping it.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub records: Vec<PriceRecord>,
    pub events: Vec<PriceChangeEvent>,
    pub unmatched: usize,
    /// Later listings for a product already seen in this batch.
    pub duplicates: usize,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl ReconcileOutcome {
    pub fn locked_pairs(&self) -> usize {
        self.guards.len()
    }
}

pub struct Reconciler {
    history: Arc<dyn PriceHistoryStore>,
    pair_locks: Mutex<HashMap<PairKey, Arc<Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(history: Arc<dyn PriceHistoryStore>) -> Self {
        Self {
            history,
            pair_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn reconcile(
        &self,
        store_id: StoreId,
        observations: Vec<NormalizedObservation>,
        products: &[Product],
    ) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();
        let mut seen = HashSet::new();
        let mut matched = Vec::new();

        for observation in observations {
            let Some(product) = match_product(&observation.listing.name, products) else {
                tracing::debug!(store_id, name = %observation.listing.name, "Unmatched listing");
                outcome.unmatched += 1;
                continue;
            };
            if !seen.insert(product.id) {
                outcome.duplicates += 1;
                continue;
            }
            if observation.listing.organic_hint != product.is_organic {
                tracing::debug!(
                    store_id,
                    product_id = product.id,
                    "Listing organic hint disagrees with catalog; using catalog"
                );
            }
            matched.push((product.id, observation));
        }

        // Lock in key order so concurrent batches can't deadlock.
        let mut keys: Vec<PairKey> = matched.iter().map(|(pid, _)| (*pid, store_id)).collect();
        keys.sort_unstable();
        for key in keys {
            outcome.guards.push(self.lock_pair(key).await);
        }

        for (product_id, observation) in matched {
            let previous = self.history.get_current_price(product_id, store_id).await?;
            let record = PriceRecord::from_observation(product_id, &observation);
            if let Some(event) = PriceChangeEvent::between(previous.as_ref(), &record) {
                outcome.events.push(event);
            }
            outcome.records.push(record);
        }

        if outcome.unmatched > 0 {
            metrics::counter!("crops_unmatched_total").increment(outcome.unmatched as u64);
        }
        tracing::debug!(
            store_id,
            records = outcome.records.len(),
            events = outcome.events.len(),
            unmatched = outcome.unmatched,
            duplicates = outcome.duplicates,
            "Reconciled batch"
        );
        Ok(outcome)
    }

    /// Drops pair locks nobody holds or waits on. Returns how many were removed.
    pub async fn prune_idle_locks(&self) -> usize {
        let mut locks = self.pair_locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub async fn tracked_pairs(&self) -> usize {
        self.pair_locks.lock().await.len()
    }

    async fn lock_pair(&self, key: PairKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.pair_locks.lock().await;
            Arc::clone(locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        lock.lock_owned().await
    }
}

/// Case-insensitive keyword containment. The longest matching keyword wins;
/// equal lengths fall back to the lowest product id.
pub fn match_product<'a>(name: &str, products: &'a [Product]) -> Option<&'a Product> {
    let text = name.to_lowercase();
    products
        .iter()
        .filter(|p| p.is_active)
        .filter_map(|p| p.longest_keyword_match(&text).map(|len| (len, p)))
        .max_by(|(len_a, a), (len_b, b)| len_a.cmp(len_b).then(b.id.cmp(&a.id)))
        .map(|(_, product)| product)
}
