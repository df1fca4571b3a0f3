//! Persists reconciled records and announces change events.
//!
//! Storage is authoritative: a record is appended before its event is sent, and a
//! transport failure is logged without failing the batch. Replaying a batch is safe
//! because duplicate appends are ignored and their events suppressed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::models::{PriceChangeEvent, PriceRecord};
use crate::storage::{AppendOutcome, PriceHistoryStore};
use crate::utils::error::{AppError, Result};

/// Delivery of change events to live subscribers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeTransport: Send + Sync {
    async fn publish(&self, event: &PriceChangeEvent) -> Result<()>;
}

/// In-process fan-out over a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastTransport {
    sender: broadcast::Sender<PriceChangeEvent>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PriceChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl ChangeTransport for BroadcastTransport {
    async fn publish(&self, event: &PriceChangeEvent) -> Result<()> {
        // No live subscribers is fine; history already has the record.
        if self.sender.receiver_count() == 0 {
            tracing::trace!(product_id = event.product_id, "No subscribers for change event");
            return Ok(());
        }
        self.sender
            .send(event.clone())
            .map(|_| ())
            .map_err(|e| AppError::Internal(format!("broadcast failed: {}", e)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishAck {
    pub inserted: usize,
    pub duplicates: usize,
    pub events_published: usize,
    pub events_failed: usize,
}

pub struct Publisher {
    history: Arc<dyn PriceHistoryStore>,
    transport: Arc<dyn ChangeTransport>,
}

impl Publisher {
    pub fn new(history: Arc<dyn PriceHistoryStore>, transport: Arc<dyn ChangeTransport>) -> Self {
        Self { history, transport }
    }

    /// Append every record, then send the events whose records were newly inserted.
    /// Storage errors abort and propagate; transport errors do not.
    pub async fn publish(
        &self,
        records: &[PriceRecord],
        events: &[PriceChangeEvent],
    ) -> Result<PublishAck> {
        let mut ack = PublishAck::default();
        let mut inserted = HashSet::new();

        for record in records {
            match self.history.append(record).await? {
                AppendOutcome::Inserted => {
                    ack.inserted += 1;
                    inserted.insert((record.product_id, record.store_id, record.scraped_at.timestamp_micros()));
                }
                AppendOutcome::Duplicate => {
                    tracing::debug!(
                        product_id = record.product_id,
                        store_id = record.store_id,
                        scraped_at = %record.scraped_at,
                        "Record already stored, ignoring"
                    );
                    ack.duplicates += 1;
                }
            }
        }

        for event in events {
            let key = (event.product_id, event.store_id, event.scraped_at.timestamp_micros());
            if !inserted.contains(&key) {
                continue;
            }
            match self.transport.publish(event).await {
                Ok(()) => ack.events_published += 1,
                Err(e) => {
                    tracing::warn!(
                        product_id = event.product_id,
                        store_id = event.store_id,
                        error = %e,
                        "Failed to publish change event"
                    );
                    ack.events_failed += 1;
                }
            }
        }

        metrics::counter!("crops_price_records_total").increment(ack.inserted as u64);
        metrics::counter!("crops_change_events_total").increment(ack.events_published as u64);
        if ack.events_failed > 0 {
            metrics::counter!("crops_change_events_failed_total").increment(ack.events_failed as u64);
        }
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NormalizedObservation, RawListing};
    use crate::storage::MemoryPriceHistory;
    use rust_decimal::Decimal;

    fn batch(price: i64) -> (Vec<PriceRecord>, Vec<PriceChangeEvent>) {
        let listing = RawListing::new(1, "Mint", Decimal::from(price));
        let record = PriceRecord::from_observation(11, &NormalizedObservation::from_listing(listing));
        let event = PriceChangeEvent::between(None, &record).unwrap();
        (vec![record], vec![event])
    }

    #[tokio::test]
    async fn test_publish_appends_then_broadcasts() {
        let history = Arc::new(MemoryPriceHistory::new());
        let transport = Arc::new(BroadcastTransport::new(8));
        let mut rx = transport.subscribe();
        let publisher = Publisher::new(history.clone(), transport);

        let (records, events) = batch(4);
        let ack = publisher.publish(&records, &events).await.unwrap();

        assert_eq!(ack.inserted, 1);
        assert_eq!(ack.events_published, 1);
        assert_eq!(history.len().await, 1);
        assert_eq!(rx.recv().await.unwrap(), events[0]);
    }

    #[tokio::test]
    async fn test_republish_is_idempotent() {
        let history = Arc::new(MemoryPriceHistory::new());
        let mut transport = MockChangeTransport::new();
        transport.expect_publish().times(1).returning(|_| Ok(()));
        let publisher = Publisher::new(history.clone(), Arc::new(transport));

        let (records, events) = batch(4);
        publisher.publish(&records, &events).await.unwrap();
        let again = publisher.publish(&records, &events).await.unwrap();

        assert_eq!(again.inserted, 0);
        assert_eq!(again.duplicates, 1);
        assert_eq!(again.events_published, 0);
        assert_eq!(history.len().await, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_fail_batch() {
        let history = Arc::new(MemoryPriceHistory::new());
        let mut transport = MockChangeTransport::new();
        transport
            .expect_publish()
            .returning(|_| Err(AppError::Internal("socket closed".to_string())));
        let publisher = Publisher::new(history.clone(), Arc::new(transport));

        let (records, events) = batch(4);
        let ack = publisher.publish(&records, &events).await.unwrap();

        assert_eq!(ack.inserted, 1);
        assert_eq!(ack.events_failed, 1);
        assert_eq!(history.len().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let transport = BroadcastTransport::new(4);
        let (_, events) = batch(4);
        assert_eq!(transport.subscriber_count(), 0);
        assert!(transport.publish(&events[0]).await.is_ok());
    }
}
