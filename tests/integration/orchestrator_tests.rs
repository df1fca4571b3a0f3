use super::*;
use async_trait::async_trait;
use crops_watcher::AppError;
use crops_watcher::models::{
    FailureClass, PriceChangeEvent, RunStatus, StoreOutcome, StoreStatus, TriggerReason,
};
use crops_watcher::TriggerEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

#[tokio::test]
async fn test_timing_out_store_goes_offline_others_persist() -> anyhow::Result<()> {
    let pipeline = create_test_pipeline().await?;
    mount_metro(
        &pipeline.server,
        category_page(&[tile("Cucumber", "12.50", "500g"), tile("Parsley", "4", "1 bunch")]),
        Duration::ZERO,
    )
    .await;
    mount_spinneys_hanging(&pipeline.server).await;
    mount_talabat(
        &pipeline.server,
        serde_json::json!([{ "title": "Tomatoes", "price": 18, "unit_size": "1 kg", "in_stock": true }]),
    )
    .await;

    let run = pipeline
        .orchestrator
        .run(TriggerReason::Scheduled, Some(vec![METRO, SPINNEYS, TALABAT]))
        .await?;

    let spinneys = run.store(SPINNEYS).unwrap();
    assert_eq!(spinneys.outcome, StoreOutcome::Failed);
    assert_eq!(spinneys.attempts, 3);
    assert_eq!(spinneys.failure.as_ref().unwrap().class, FailureClass::Timeout);
    assert_eq!(
        pipeline.catalog.store(SPINNEYS).await.unwrap().status,
        StoreStatus::Offline
    );

    assert_eq!(run.store(METRO).unwrap().outcome, StoreOutcome::Success);
    assert_eq!(run.store(TALABAT).unwrap().outcome, StoreOutcome::Success);
    assert_eq!(pipeline.history.records_for_store(METRO).await.len(), 2);
    assert_eq!(pipeline.history.records_for_store(TALABAT).await.len(), 1);
    assert!(pipeline.history.records_for_store(SPINNEYS).await.is_empty());
    assert_eq!(run.status, RunStatus::Partial);
    assert!(!run.cancelled);
    Ok(())
}

#[tokio::test]
async fn test_manual_trigger_while_scraping_is_skipped() -> anyhow::Result<()> {
    let pipeline = create_test_pipeline().await?;
    mount_metro(
        &pipeline.server,
        category_page(&[tile("Cucumber", "12.50", "500g")]),
        Duration::from_millis(600),
    )
    .await;

    let first = {
        let orchestrator = pipeline.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(TriggerReason::Scheduled, Some(vec![METRO])).await })
    };
    let orchestrator = pipeline.orchestrator.clone();
    assert!(
        wait_for_condition(
            || {
                let orchestrator = orchestrator.clone();
                async move { orchestrator.state().status(METRO).await == Some(StoreStatus::Scraping) }
            },
            5
        )
        .await
    );

    let second = pipeline.orchestrator.run(TriggerReason::Manual, Some(vec![METRO])).await?;
    let skipped = second.store(METRO).unwrap();
    assert_eq!(skipped.outcome, StoreOutcome::Skipped);
    assert_eq!(skipped.detail.as_deref(), Some("already in progress"));
    assert_eq!(second.status, RunStatus::Completed);

    let first = first.await??;
    assert_eq!(first.store(METRO).unwrap().outcome, StoreOutcome::Success);
    assert_eq!(pipeline.history.len().await, 1);
    Ok(())
}

struct FailingTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl ChangeTransport for FailingTransport {
    async fn publish(&self, _event: &PriceChangeEvent) -> crops_watcher::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AppError::Internal("websocket gone".to_string()))
    }
}

#[tokio::test]
async fn test_transport_failure_never_fails_persistence() -> anyhow::Result<()> {
    let failing = Arc::new(FailingTransport {
        calls: AtomicUsize::new(0),
    });
    let pipeline = create_test_pipeline_with(failing.clone(), BroadcastTransport::new(1)).await?;
    mount_metro(
        &pipeline.server,
        category_page(&[tile("Cucumber", "12.50", "500g"), tile("Mint", "5", "1 piece")]),
        Duration::ZERO,
    )
    .await;

    let run = pipeline.orchestrator.run(TriggerReason::Manual, Some(vec![METRO])).await?;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.store(METRO).unwrap().counts.records_written, 2);
    assert_eq!(run.store(METRO).unwrap().counts.events, 0);
    assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.history.len().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_blocked_store_is_not_retried() -> anyhow::Result<()> {
    let pipeline = create_test_pipeline().await?;
    Mock::given(method("GET"))
        .and(path("/gourmet/collections/fresh-vegetables"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&pipeline.server)
        .await;

    let run = pipeline.orchestrator.run(TriggerReason::Manual, Some(vec![GOURMET])).await?;

    let gourmet = run.store(GOURMET).unwrap();
    assert_eq!(gourmet.attempts, 1);
    assert_eq!(gourmet.failure.as_ref().unwrap().class, FailureClass::Blocked);
    assert_eq!(run.status, RunStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn test_stop_through_trigger_channel_cancels_run() -> anyhow::Result<()> {
    let pipeline = create_test_pipeline().await?;
    mount_metro(
        &pipeline.server,
        category_page(&[tile("Cucumber", "12.50", "500g")]),
        Duration::from_millis(900),
    )
    .await;

    let (tx, rx) = mpsc::channel(8);
    let server = pipeline.orchestrator.clone();
    let serving = tokio::spawn(async move { server.serve(rx).await });

    tx.send(TriggerEvent::Run {
        reason: TriggerReason::Manual,
        store_filter: Some(vec![METRO]),
    })
    .await?;
    let orchestrator = pipeline.orchestrator.clone();
    assert!(
        wait_for_condition(
            || {
                let orchestrator = orchestrator.clone();
                async move { orchestrator.state().status(METRO).await == Some(StoreStatus::Scraping) }
            },
            5
        )
        .await
    );
    tx.send(TriggerEvent::Shutdown).await?;
    serving.await?;

    let run = pipeline.orchestrator.state().last_run().await.unwrap();
    assert!(run.cancelled);
    assert_eq!(run.store(METRO).unwrap().outcome, StoreOutcome::Cancelled);
    assert!(pipeline.history.is_empty().await);
    assert_eq!(
        pipeline.catalog.store(METRO).await.unwrap().status,
        StoreStatus::Idle
    );
    Ok(())
}

#[tokio::test]
async fn test_status_report_after_run() -> anyhow::Result<()> {
    let pipeline = create_test_pipeline().await?;
    mount_metro(
        &pipeline.server,
        category_page(&[tile("Cucumber", "12.50", "500g")]),
        Duration::ZERO,
    )
    .await;

    pipeline.orchestrator.run(TriggerReason::Manual, Some(vec![METRO])).await?;
    let report = pipeline.orchestrator.status_report().await;

    assert_eq!(report.online, 1);
    assert_eq!(report.idle, seed_stores().len() - 1);
    assert!(!report.is_running);
    assert_eq!(report.last_run.unwrap().stores.len(), 1);
    Ok(())
}
