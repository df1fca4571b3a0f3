use super::*;
use chrono::{Duration as ChronoDuration, Utc};
use crops_watcher::models::{
    NormalizedObservation, PriceChangeEvent, PriceRecord, RawListing, RunStatus, TriggerReason,
};
use crops_watcher::publisher::Publisher;
use crops_watcher::storage::{CatalogStore, PriceHistoryStore, SqliteStorage};
use crops_watcher::trend::{self, TrendDirection};
use rust_decimal::Decimal;

async fn create_test_storage() -> anyhow::Result<Arc<SqliteStorage>> {
    let config = get_test_config();
    let storage = SqliteStorage::connect(&config.database).await?;
    storage.seed_if_empty(seed_products(), seed_stores()).await?;
    Ok(Arc::new(storage))
}

fn record(product_id: i64, store_id: StoreId, price: i64, hours_ago: i64) -> PriceRecord {
    let listing = RawListing::new(store_id, "Tomatoes", Decimal::from(price))
        .with_pack_size("1 kg")
        .captured_at(Utc::now() - ChronoDuration::hours(hours_ago));
    PriceRecord::from_observation(product_id, &NormalizedObservation::from_listing(listing))
}

#[tokio::test]
async fn test_seed_is_applied_once() -> anyhow::Result<()> {
    let storage = create_test_storage().await?;
    storage.seed_if_empty(seed_products(), seed_stores()).await?;

    assert_eq!(storage.list_active_products().await?.len(), seed_products().len());
    assert_eq!(storage.list_active_stores().await?.len(), seed_stores().len());
    Ok(())
}

#[tokio::test]
async fn test_republishing_a_batch_does_not_duplicate() -> anyhow::Result<()> {
    let storage = create_test_storage().await?;
    let transport = BroadcastTransport::new(8);
    let mut events = transport.subscribe();
    let publisher = Publisher::new(storage.clone(), Arc::new(transport));

    let records = vec![record(2, METRO, 20, 0)];
    let changes = vec![PriceChangeEvent::between(None, &records[0]).unwrap()];

    let first = publisher.publish(&records, &changes).await?;
    let second = publisher.publish(&records, &changes).await?;

    assert_eq!(first.inserted, 1);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.events_published, 0);
    assert_eq!(storage.list_trend(2, Utc::now() - ChronoDuration::days(1)).await?.len(), 1);

    events.try_recv()?;
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_current_price_and_trend_round_trip() -> anyhow::Result<()> {
    let storage = create_test_storage().await?;
    for rec in [record(2, METRO, 20, 48), record(2, METRO, 24, 24), record(2, SPINNEYS, 22, 12)] {
        storage.append(&rec).await?;
    }

    let current = storage.get_current_price(2, METRO).await?.unwrap();
    assert_eq!(current.price, Decimal::from(24));
    assert_eq!(current.price_per_kg, Some(Decimal::from(24)));
    assert_eq!(current.pack_unit.as_deref(), Some("kg"));

    let since = Utc::now() - ChronoDuration::days(7);
    let summary = trend::product_trend(storage.as_ref(), 2, since).await?.unwrap();
    assert_eq!(summary.samples, 3);
    assert_eq!(summary.direction, TrendDirection::Increasing);

    let comparison = trend::compare_stores(storage.as_ref(), 2, since).await?;
    assert_eq!(comparison.lowest.unwrap().store_id, SPINNEYS);
    assert_eq!(comparison.spread, Some(Decimal::from(2)));
    Ok(())
}

#[tokio::test]
async fn test_run_against_sqlite_persists_status() -> anyhow::Result<()> {
    let storage = Arc::new(SqliteStorage::connect(&get_test_config().database).await?);
    let server = MockServer::start().await;
    storage.seed_if_empty(seed_products(), vec![]).await?;
    let metro = storage
        .insert_store(NewStore {
            name: "Metro".to_string(),
            base_url: format!("{}/metro/", server.uri()),
            adapter: "metro".to_string(),
        })
        .await?;
    mount_metro(&server, category_page(&[tile("Cucumber", "12.50", "500g")]), Duration::ZERO).await;

    let config = get_test_config();
    let registry = AdapterRegistry::new();
    registry
        .initialize_default_adapters(&WebScraper::new(config.scraper.clone())?)
        .await?;
    let orchestrator = Orchestrator::new(
        config.scraper,
        storage.clone(),
        storage.clone(),
        registry,
        Arc::new(BroadcastTransport::new(8)),
    );

    let run = orchestrator.run(TriggerReason::Manual, None).await?;
    assert_eq!(run.status, RunStatus::Completed);

    let stores = storage.list_active_stores().await?;
    assert_eq!(stores[0].id, metro.id);
    assert_eq!(stores[0].status, crops_watcher::models::StoreStatus::Online);
    assert!(stores[0].last_scraped.is_some());
    assert!(storage.get_current_price(1, metro.id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_history_survives_reconnect() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = DatabaseConfig {
        url: format!("sqlite://{}/nested/crops.db?mode=rwc", dir.path().display()),
        max_connections: 2,
    };

    {
        let storage = SqliteStorage::connect(&config).await?;
        storage.seed_if_empty(seed_products(), seed_stores()).await?;
        tokio_test::assert_ok!(storage.append(&record(2, METRO, 20, 1)).await);
        storage
            .update_store_status(METRO, crops_watcher::models::StoreStatus::Offline, None)
            .await?;
        storage.pool().close().await;
    }

    let reopened = SqliteStorage::connect(&config).await?;
    reopened.seed_if_empty(seed_products(), seed_stores()).await?;
    assert_eq!(reopened.list_active_stores().await?.len(), seed_stores().len());
    assert_eq!(reopened.get_current_price(2, METRO).await?.unwrap().price, Decimal::from(20));

    let metro = reopened.list_active_stores().await?.into_iter().find(|s| s.id == METRO).unwrap();
    assert_eq!(metro.status, crops_watcher::models::StoreStatus::Offline);

    let missing = reopened
        .update_store_status(99, crops_watcher::models::StoreStatus::Online, None)
        .await;
    assert!(matches!(missing, Err(crops_watcher::AppError::NotFound { .. })));
    Ok(())
}
