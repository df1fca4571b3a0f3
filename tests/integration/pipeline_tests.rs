use super::*;
use chrono::{Duration as ChronoDuration, Utc};
use crops_watcher::models::{
    ChangeClass, NormalizedObservation, PriceRecord, RawListing, RunStatus, StoreOutcome,
    TriggerReason,
};
use crops_watcher::storage::PriceHistoryStore;
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio::sync::broadcast::error::TryRecvError;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

async fn seed_prior_price(pipeline: &TestPipeline, product: &str, store_id: StoreId, price: &str, size: &str) {
    let product = pipeline.product(product).await;
    let listing = RawListing::new(store_id, product.name.clone(), d(price))
        .with_pack_size(size)
        .captured_at(Utc::now() - ChronoDuration::hours(1));
    let record = PriceRecord::from_observation(product.id, &NormalizedObservation::from_listing(listing));
    pipeline.history.append(&record).await.unwrap();
}

#[tokio::test]
async fn test_unchanged_price_appends_record_without_event() -> anyhow::Result<()> {
    let pipeline = create_test_pipeline().await?;
    let mut events = pipeline.transport.subscribe();
    seed_prior_price(&pipeline, "Cucumbers", METRO, "12.5", "500g").await;
    mount_metro(
        &pipeline.server,
        category_page(&[tile("Cucumber", "12.50", "500g")]),
        Duration::ZERO,
    )
    .await;

    let run = pipeline.orchestrator.run(TriggerReason::Manual, Some(vec![METRO])).await?;

    assert_eq!(run.status, RunStatus::Completed);
    let cucumbers = pipeline.product("Cucumbers").await;
    let records = pipeline.history.records_for(cucumbers.id, METRO).await;
    assert_eq!(records.len(), 2);

    let current = pipeline.history.get_current_price(cucumbers.id, METRO).await?.unwrap();
    assert_eq!(current.price, d("12.5"));
    assert_eq!(current.price_per_kg, Some(d("25")));
    assert_eq!(run.store(METRO).unwrap().counts.events, 0);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    Ok(())
}

#[tokio::test]
async fn test_price_increase_emits_one_event() -> anyhow::Result<()> {
    let pipeline = create_test_pipeline().await?;
    let mut events = pipeline.transport.subscribe();
    seed_prior_price(&pipeline, "Cucumbers", METRO, "10", "500g").await;
    mount_metro(
        &pipeline.server,
        category_page(&[tile("Cucumber", "12.50", "500g")]),
        Duration::ZERO,
    )
    .await;

    let run = pipeline.orchestrator.run(TriggerReason::Manual, Some(vec![METRO])).await?;

    assert_eq!(run.store(METRO).unwrap().counts.events, 1);
    let event = events.try_recv()?;
    assert_eq!(event.change_class, ChangeClass::Increase);
    assert_eq!(event.percent_change, Some(d("25")));
    assert_eq!(event.old_price, Some(d("10")));
    assert_eq!(event.new_price, d("12.5"));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    Ok(())
}

#[tokio::test]
async fn test_first_sighting_is_new_and_unmatched_are_counted() -> anyhow::Result<()> {
    let pipeline = create_test_pipeline().await?;
    let mut events = pipeline.transport.subscribe();
    mount_metro(
        &pipeline.server,
        category_page(&[
            tile("Organic Cherry Tomatoes", "45", "250g"),
            tile("Cherry Tomatoes Premium", "60", "250g"),
            tile("Paper Towels", "30", "2 rolls"),
            tile("Fresh Mint", "5.50", "1 piece"),
            "<div class=\"product-tile\"><h3 class=\"product-title\">Basil</h3></div>".to_string(),
        ]),
        Duration::ZERO,
    )
    .await;

    let run = pipeline.orchestrator.run(TriggerReason::Manual, Some(vec![METRO])).await?;
    let metro = run.store(METRO).unwrap();

    assert_eq!(metro.outcome, StoreOutcome::Partial);
    assert_eq!(metro.counts.listings, 4);
    assert_eq!(metro.counts.skipped, 1);
    assert_eq!(metro.counts.unmatched, 1);
    assert_eq!(metro.counts.duplicates, 1);
    assert_eq!(metro.counts.records_written, 2);

    let cherry = pipeline.product("Cherry Tomatoes").await;
    let current = pipeline.history.get_current_price(cherry.id, METRO).await?.unwrap();
    assert_eq!(current.price, d("45"));
    assert_eq!(current.price_per_kg, Some(d("180")));

    let first = events.try_recv()?;
    assert_eq!(first.change_class, ChangeClass::New);
    assert_eq!(first.percent_change, None);
    Ok(())
}

#[tokio::test]
async fn test_json_store_with_discount_and_stock() -> anyhow::Result<()> {
    let pipeline = create_test_pipeline().await?;
    mount_talabat(
        &pipeline.server,
        serde_json::json!([
            { "title": "Tomatoes", "price": "18.00", "old_price": "24.00", "unit_size": "1 kg", "in_stock": true },
            { "title": "Iceberg Lettuce", "price": 22, "unit_size": "1 piece", "in_stock": false }
        ]),
    )
    .await;

    let run = pipeline.orchestrator.run(TriggerReason::Manual, Some(vec![TALABAT])).await?;
    assert_eq!(run.status, RunStatus::Completed);

    let tomatoes = pipeline.product("Tomatoes").await;
    let record = pipeline.history.get_current_price(tomatoes.id, TALABAT).await?.unwrap();
    assert!(record.is_discounted);
    assert_eq!(record.discount_percent, Some(d("25")));
    assert_eq!(record.price_per_kg, Some(d("18")));

    let iceberg = pipeline.product("Iceberg").await;
    let record = pipeline.history.get_current_price(iceberg.id, TALABAT).await?.unwrap();
    assert!(!record.is_available);
    assert_eq!(record.price_per_kg, None);
    Ok(())
}
