//! Drives one scrape run across stores: bounded concurrency, per-store timeout and
//! retry, then reconcile and publish as each store finishes.

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;

use crate::config::ScraperConfig;
use crate::models::{
    FailureClass, FetchFailure, ItemCounts, NormalizedObservation, Product, ScrapeRun, Store,
    StoreId, StoreOutcome, StoreRunResult, StoreStatus, TriggerReason,
};
use crate::plugins::{AdapterRegistry, FetchOutput, SourceAdapter};
use crate::publisher::{ChangeTransport, Publisher};
use crate::reconciler::Reconciler;
use crate::state::{ScrapeState, StatusReport, StoreLease};
use crate::storage::{CatalogStore, PriceHistoryStore};
use crate::utils::error::Result;

const ALREADY_IN_PROGRESS: &str = "already in progress";

/// Inputs to `Orchestrator::serve`. The scheduler and the CLI only ever send these.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerEvent {
    Run {
        reason: TriggerReason,
        store_filter: Option<Vec<StoreId>>,
    },
    Watchdog,
    /// Cancel in-flight fetches; serving continues.
    Stop,
    /// Cancel in-flight fetches and return from `serve` once runs drain.
    Shutdown,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<ScraperConfig>,
    catalog: Arc<dyn CatalogStore>,
    registry: AdapterRegistry,
    reconciler: Arc<Reconciler>,
    publisher: Arc<Publisher>,
    state: Arc<ScrapeState>,
    /// Shared by every run, so overlapping runs stay within `max_concurrent_stores`.
    permits: Arc<Semaphore>,
    root: Arc<RwLock<CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        config: ScraperConfig,
        catalog: Arc<dyn CatalogStore>,
        history: Arc<dyn PriceHistoryStore>,
        registry: AdapterRegistry,
        transport: Arc<dyn ChangeTransport>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_stores.max(1)));
        Self {
            config: Arc::new(config),
            catalog,
            registry,
            reconciler: Arc::new(Reconciler::new(Arc::clone(&history))),
            publisher: Arc::new(Publisher::new(history, transport)),
            state: Arc::new(ScrapeState::new()),
            permits,
            root: Arc::new(RwLock::new(CancellationToken::new())),
        }
    }

    pub fn state(&self) -> &ScrapeState {
        &self.state
    }

    pub async fn status_report(&self) -> StatusReport {
        self.state.status_report().await
    }

    /// Scrapes every active store, or only those in `store_filter`.
    pub async fn run(
        &self,
        trigger: TriggerReason,
        store_filter: Option<Vec<StoreId>>,
    ) -> Result<ScrapeRun> {
        let mut run = ScrapeRun::new(trigger, store_filter.clone());
        let stores = self.catalog.list_active_stores().await?;
        let products = Arc::new(self.catalog.list_active_products().await?);
        self.state.sync_stores(&stores).await;

        let selected: Vec<Store> = match &store_filter {
            Some(ids) => {
                for id in ids.iter().filter(|id| !stores.iter().any(|s| s.id == **id)) {
                    tracing::warn!(run_id = %run.id, store_id = id, "Requested store is not active");
                }
                stores.into_iter().filter(|s| ids.contains(&s.id)).collect()
            }
            None => stores,
        };

        tracing::info!(
            run_id = %run.id,
            trigger = ?trigger,
            stores = selected.len(),
            products = products.len(),
            "Starting scrape run"
        );

        let run_token = self.root.read().await.child_token();
        self.state.begin_run().await;

        let mut tasks = JoinSet::new();
        for store in selected {
            let this = self.clone();
            let products = Arc::clone(&products);
            let run_token = run_token.clone();
            tasks.spawn(async move { this.process_store(store, products, run_token).await });
        }

        // Each store has already published by the time it lands here.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => run.record(result),
                Err(e) => tracing::error!(run_id = %run.id, error = %e, "Store task aborted"),
            }
        }
        run.stores.sort_by_key(|s| s.store_id);
        run.finalize(run_token.is_cancelled());
        let pruned = self.reconciler.prune_idle_locks().await;
        tracing::trace!(run_id = %run.id, pruned, "Pruned idle pair locks");

        let totals = run.totals();
        tracing::info!(
            run_id = %run.id,
            status = ?run.status,
            cancelled = run.cancelled,
            records = totals.records_written,
            events = totals.events,
            "Scrape run finished"
        );
        self.state.end_run(run.clone()).await;
        Ok(run)
    }

    /// Cancels in-flight and queued fetches of every running run. Later runs start fresh.
    pub async fn stop(&self) {
        let mut root = self.root.write().await;
        root.cancel();
        *root = CancellationToken::new();
        tracing::info!("Stop requested; cancelling in-flight fetches");
    }

    /// Forces stores stuck in `scraping` past the ceiling to `offline`.
    pub async fn watchdog(&self) -> Vec<StoreId> {
        let expired = self.state.expire_stuck(self.config.watchdog_ceiling()).await;
        for store_id in &expired {
            tracing::warn!(store_id, "Store exceeded scraping ceiling, marking offline");
            metrics::counter!("crops_store_failures_total", "store" => store_id.to_string(), "class" => "watchdog")
                .increment(1);
            if let Err(e) = self
                .catalog
                .update_store_status(*store_id, StoreStatus::Offline, None)
                .await
            {
                tracing::warn!(store_id, error = %e, "Failed to persist store status");
            }
        }
        expired
    }

    pub async fn health_check(&self) -> Result<Vec<(Store, bool)>> {
        let stores = self.catalog.list_active_stores().await?;
        Ok(self.registry.health_check_all(&stores).await)
    }

    /// Consumes trigger events until `Shutdown` or the channel closes, then waits for
    /// runs in flight.
    pub async fn serve(&self, mut triggers: mpsc::Receiver<TriggerEvent>) {
        let mut runs = JoinSet::new();
        loop {
            tokio::select! {
                event = triggers.recv() => match event {
                    Some(TriggerEvent::Run { reason, store_filter }) => {
                        let this = self.clone();
                        runs.spawn(async move {
                            if let Err(e) = this.run(reason, store_filter).await {
                                tracing::error!(error = %e, "Scrape run failed");
                            }
                        });
                    }
                    Some(TriggerEvent::Watchdog) => {
                        self.watchdog().await;
                    }
                    Some(TriggerEvent::Stop) => self.stop().await,
                    Some(TriggerEvent::Shutdown) => {
                        self.stop().await;
                        break;
                    }
                    None => break,
                },
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Scrape run task aborted");
                    }
                }
            }
        }

        while let Some(joined) = runs.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Scrape run task aborted");
            }
        }
        tracing::info!("Trigger channel closed; orchestrator stopped");
    }

    async fn process_store(
        self,
        store: Store,
        products: Arc<Vec<Product>>,
        run_token: CancellationToken,
    ) -> StoreRunResult {
        let permit = tokio::select! {
            biased;
            _ = run_token.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            let mut result = StoreRunResult::new(store.id, &store.name, StoreOutcome::Cancelled);
            result.detail = Some("cancelled before start".to_string());
            return result;
        };

        let Some(lease) = self.state.try_begin(store.id, &run_token).await else {
            tracing::info!(store_id = store.id, store = %store.name, "Store already scraping, skipping");
            return StoreRunResult::skipped(store.id, &store.name, ALREADY_IN_PROGRESS);
        };
        self.persist_status(store.id, StoreStatus::Scraping, None).await;

        let mut result = StoreRunResult::new(store.id, &store.name, StoreOutcome::Failed);

        let adapter = match self.registry.for_store(&store).await {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::error!(store_id = store.id, error = %e, "Cannot scrape store");
                result.outcome = StoreOutcome::Failed;
                result.detail = Some(e.to_string());
                self.release(&lease, StoreStatus::Offline, false).await;
                result.finished_at = Utc::now();
                return result;
            }
        };

        let fetch_started = Instant::now();
        let (fetched, attempts) = self.fetch_with_retry(adapter, &store, &lease.token).await;
        metrics::histogram!("crops_store_fetch_seconds", "store" => store.id.to_string())
            .record(fetch_started.elapsed().as_secs_f64());
        result.attempts = attempts;

        match fetched {
            Ok(output) => {
                result.outcome = if output.is_partial() {
                    StoreOutcome::Partial
                } else {
                    StoreOutcome::Success
                };
                result.counts.listings = output.listings.len();
                result.counts.skipped = output.skipped;
                metrics::counter!("crops_listings_total", "store" => store.id.to_string())
                    .increment(output.listings.len() as u64);
                if output.skipped > 0 {
                    metrics::counter!("crops_listings_skipped_total", "store" => store.id.to_string())
                        .increment(output.skipped as u64);
                }

                if let Err(e) = self.commit(&store, output, &products, &mut result.counts).await {
                    tracing::error!(store_id = store.id, error = %e, "Failed to persist store results");
                    result.outcome = StoreOutcome::Failed;
                    result.detail = Some(e.to_string());
                }
                self.release(&lease, StoreStatus::Online, true).await;
            }
            Err(failure) if failure.class == FailureClass::Cancelled => {
                if run_token.is_cancelled() {
                    tracing::info!(store_id = store.id, "Store fetch cancelled");
                    result.outcome = StoreOutcome::Cancelled;
                    result.failure = Some(failure);
                    self.release(&lease, StoreStatus::Idle, false).await;
                } else {
                    // Only the watchdog cancels a single store.
                    result.outcome = StoreOutcome::Failed;
                    result.failure = Some(FetchFailure::new(
                        store.id,
                        FailureClass::Timeout,
                        "exceeded scraping ceiling",
                    ));
                }
            }
            Err(failure) => {
                tracing::warn!(
                    store_id = store.id,
                    store = %store.name,
                    class = %failure.class,
                    attempts,
                    "Store fetch failed: {}",
                    failure.message
                );
                metrics::counter!(
                    "crops_store_failures_total",
                    "store" => store.id.to_string(),
                    "class" => failure.class.to_string()
                )
                .increment(1);
                result.outcome = StoreOutcome::Failed;
                result.failure = Some(failure);
                self.release(&lease, StoreStatus::Offline, false).await;
            }
        }

        result.finished_at = Utc::now();
        result
    }

    /// One initial attempt plus `retry_attempts` retries, only for transient failures.
    async fn fetch_with_retry(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        store: &Store,
        token: &CancellationToken,
    ) -> (std::result::Result<FetchOutput, FetchFailure>, u32) {
        let attempts = Arc::new(AtomicU32::new(0));
        let store_timeout = self.config.store_timeout();
        let strategy = self.config.retry_backoff();

        let action = || {
            let adapter = Arc::clone(&adapter);
            let store = store.clone();
            let token = token.clone();
            let attempts = Arc::clone(&attempts);
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(store_id = store.id, attempt, "Fetching store");
                match tokio::time::timeout(store_timeout, adapter.fetch(&store, &token)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchFailure::new(
                        store.id,
                        FailureClass::Timeout,
                        format!("no result within {}s", store_timeout.as_secs()),
                    )),
                }
            }
        };
        let retryable = |failure: &FetchFailure| {
            let retry = failure.class.is_transient() && !token.is_cancelled();
            if retry {
                tracing::warn!(
                    store_id = failure.store_id,
                    class = %failure.class,
                    "Transient fetch failure, retrying: {}",
                    failure.message
                );
            }
            retry
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(FetchFailure::new(store.id, FailureClass::Cancelled, "fetch cancelled")),
            result = RetryIf::spawn(strategy, action, retryable) => result,
        };
        (result, attempts.load(Ordering::SeqCst))
    }

    /// Normalize, reconcile and publish one store's listings. Pair locks are held until
    /// the batch is stored.
    async fn commit(
        &self,
        store: &Store,
        output: FetchOutput,
        products: &[Product],
        counts: &mut ItemCounts,
    ) -> Result<()> {
        let observations: Vec<NormalizedObservation> = output
            .listings
            .into_iter()
            .map(NormalizedObservation::from_listing)
            .collect();

        let outcome = self.reconciler.reconcile(store.id, observations, products).await?;
        counts.unmatched = outcome.unmatched;
        counts.duplicates = outcome.duplicates;

        let ack = self.publisher.publish(&outcome.records, &outcome.events).await?;
        counts.records_written = ack.inserted;
        counts.records_ignored = ack.duplicates;
        counts.events = ack.events_published;
        drop(outcome);

        tracing::info!(
            store_id = store.id,
            store = %store.name,
            listings = counts.listings,
            records = counts.records_written,
            events = counts.events,
            unmatched = counts.unmatched,
            "Store published"
        );
        Ok(())
    }

    async fn release(&self, lease: &StoreLease, status: StoreStatus, scraped: bool) {
        if !self.state.finish(lease, status).await {
            tracing::debug!(store_id = lease.store_id, "Lease expired before release");
            return;
        }
        let last_scraped = scraped.then(Utc::now);
        self.persist_status(lease.store_id, status, last_scraped).await;
    }

    async fn persist_status(
        &self,
        store_id: StoreId,
        status: StoreStatus,
        last_scraped: Option<chrono::DateTime<Utc>>,
    ) {
        if let Err(e) = self
            .catalog
            .update_store_status(store_id, status, last_scraped)
            .await
        {
            tracing::warn!(store_id, status = %status, error = %e, "Failed to persist store status");
        }
    }
}
