//! Process-wide scrape state: per-store status, store leases and the last run.
//!
//! A store can be held by at most one fetch at a time. Leases carry a generation so a
//! fetch that the watchdog already gave up on cannot overwrite the newer status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::models::{ScrapeRun, Store, StoreId, StoreStatus};

#[derive(Debug)]
struct StoreEntry {
    name: String,
    status: StoreStatus,
    since: DateTime<Utc>,
    generation: u64,
    cancel: Option<CancellationToken>,
}

#[derive(Debug, Default)]
struct Inner {
    stores: HashMap<StoreId, StoreEntry>,
    running_runs: usize,
    last_run: Option<ScrapeRun>,
}

/// Exclusive claim on a store for one fetch.
#[derive(Debug, Clone)]
pub struct StoreLease {
    pub store_id: StoreId,
    pub generation: u64,
    /// Cancelled by `stop` through the parent, or by the watchdog.
    pub token: CancellationToken,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreStatusEntry {
    pub store_id: StoreId,
    pub name: String,
    pub status: StoreStatus,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub idle: usize,
    pub scraping: usize,
    pub online: usize,
    pub offline: usize,
    pub is_running: bool,
    pub last_run: Option<ScrapeRun>,
    pub stores: Vec<StoreStatusEntry>,
}

#[derive(Debug, Default)]
pub struct ScrapeState {
    inner: RwLock<Inner>,
}

impl ScrapeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds stores not seen before, seeding their status from the catalog. A persisted
    /// `scraping` status is stale across restarts and starts as `idle`.
    pub async fn sync_stores(&self, stores: &[Store]) {
        let mut inner = self.inner.write().await;
        for store in stores {
            inner
                .stores
                .entry(store.id)
                .and_modify(|entry| entry.name = store.name.clone())
                .or_insert_with(|| StoreEntry {
                    name: store.name.clone(),
                    status: match store.status {
                        StoreStatus::Scraping => StoreStatus::Idle,
                        other => other,
                    },
                    since: Utc::now(),
                    generation: 0,
                    cancel: None,
                });
        }
    }

    /// Moves the store to `scraping`. `None` when it is already scraping or unknown.
    pub async fn try_begin(&self, store_id: StoreId, parent: &CancellationToken) -> Option<StoreLease> {
        let mut inner = self.inner.write().await;
        let entry = inner.stores.get_mut(&store_id)?;
        if entry.status == StoreStatus::Scraping {
            return None;
        }

        let token = parent.child_token();
        entry.status = StoreStatus::Scraping;
        entry.since = Utc::now();
        entry.generation += 1;
        entry.cancel = Some(token.clone());

        Some(StoreLease {
            store_id,
            generation: entry.generation,
            token,
        })
    }

    /// Releases the lease with a final status. Returns `false` when the lease is stale
    /// because the watchdog already expired it.
    pub async fn finish(&self, lease: &StoreLease, status: StoreStatus) -> bool {
        let mut inner = self.inner.write().await;
        match inner.stores.get_mut(&lease.store_id) {
            Some(entry) if entry.generation == lease.generation && entry.status == StoreStatus::Scraping => {
                entry.status = status;
                entry.since = Utc::now();
                entry.cancel = None;
                true
            }
            _ => false,
        }
    }

    /// Forces every store stuck in `scraping` longer than `ceiling` to `offline` and
    /// cancels its fetch.
    pub async fn expire_stuck(&self, ceiling: Duration) -> Vec<StoreId> {
        let ceiling = chrono::Duration::from_std(ceiling).unwrap_or_else(|_| chrono::Duration::weeks(52));
        let now = Utc::now();
        let mut expired = Vec::new();

        let mut inner = self.inner.write().await;
        for (store_id, entry) in inner.stores.iter_mut() {
            if entry.status != StoreStatus::Scraping || now - entry.since <= ceiling {
                continue;
            }
            if let Some(token) = entry.cancel.take() {
                token.cancel();
            }
            entry.status = StoreStatus::Offline;
            entry.since = now;
            entry.generation += 1;
            expired.push(*store_id);
        }
        expired.sort_unstable();
        expired
    }

    pub async fn status(&self, store_id: StoreId) -> Option<StoreStatus> {
        let inner = self.inner.read().await;
        inner.stores.get(&store_id).map(|entry| entry.status)
    }

    pub async fn begin_run(&self) {
        let mut inner = self.inner.write().await;
        inner.running_runs += 1;
    }

    pub async fn end_run(&self, run: ScrapeRun) {
        let mut inner = self.inner.write().await;
        inner.running_runs = inner.running_runs.saturating_sub(1);
        inner.last_run = Some(run);
    }

    pub async fn is_running(&self) -> bool {
        self.inner.read().await.running_runs > 0
    }

    pub async fn last_run(&self) -> Option<ScrapeRun> {
        self.inner.read().await.last_run.clone()
    }

    pub async fn status_report(&self) -> StatusReport {
        let inner = self.inner.read().await;
        let mut stores: Vec<StoreStatusEntry> = inner
            .stores
            .iter()
            .map(|(store_id, entry)| StoreStatusEntry {
                store_id: *store_id,
                name: entry.name.clone(),
                status: entry.status,
                since: entry.since,
            })
            .collect();
        stores.sort_by_key(|s| s.store_id);

        let count = |status: StoreStatus| stores.iter().filter(|s| s.status == status).count();
        StatusReport {
            idle: count(StoreStatus::Idle),
            scraping: count(StoreStatus::Scraping),
            online: count(StoreStatus::Online),
            offline: count(StoreStatus::Offline),
            is_running: inner.running_runs > 0,
            last_run: inner.last_run.clone(),
            stores,
        }
    }

    #[cfg(test)]
    async fn backdate(&self, store_id: StoreId, by: chrono::Duration) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.stores.get_mut(&store_id) {
            entry.since -= by;
        }
    }
}
