//! Subscription hub: replay-then-live fan-out of the event log.
//!
//! Per-subscriber contract (§ exactly-once): starting from the requested
//! sequence, every event is delivered once, in sequence order, with no
//! gaps. Registration and replay happen under the hub lock, so an append
//! racing a subscribe cannot fall between replay and live delivery. A
//! subscriber that cannot drain its bounded queue is closed with `Lagged`;
//! it reconnects from its last-acknowledged sequence.

use std::sync::{Arc, RwLock as StdRwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use covenant_events::RecordedEvent;

use crate::event_store::{AppendObserver, EventStore, EventStoreError};

/// Default bound on a subscriber's in-flight queue.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    Event(RecordedEvent),
    /// The subscriber fell behind its buffer and was disconnected.
    Lagged,
}

struct HubSubscriber {
    tx: mpsc::Sender<SubscriptionMessage>,
    /// Sequence of the last event delivered to this subscriber.
    last_sent: u64,
    lagged: bool,
}

impl HubSubscriber {
    fn is_closed(&self) -> bool {
        self.lagged || self.tx.is_closed()
    }
}

/// Fan-out hub the event store notifies after every append.
pub struct SubscriptionHub {
    store: StdRwLock<Option<Arc<dyn EventStore>>>,
    subscribers: Mutex<Vec<HubSubscriber>>,
}

impl SubscriptionHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store: StdRwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Attach the store the hub replays and gap-fills from. Must be called
    /// before the first subscribe; the store's observer points back here.
    pub fn attach_store(&self, store: Arc<dyn EventStore>) {
        *self.store.write().unwrap_or_else(|e| e.into_inner()) = Some(store);
    }

    fn store(&self) -> Option<Arc<dyn EventStore>> {
        self.store.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Subscribe from `from_sequence` with the default buffer.
    pub async fn subscribe(
        &self,
        from_sequence: u64,
    ) -> Result<SubscriptionStream, EventStoreError> {
        self.subscribe_with_buffer(from_sequence, DEFAULT_SUBSCRIBER_BUFFER)
            .await
    }

    /// Subscribe from `from_sequence`: replay everything already in the log,
    /// then deliver live events in order.
    pub async fn subscribe_with_buffer(
        &self,
        from_sequence: u64,
        buffer: usize,
    ) -> Result<SubscriptionStream, EventStoreError> {
        let store = self
            .store()
            .ok_or_else(|| EventStoreError::Storage("hub has no store attached".to_string()))?;

        let from = from_sequence.max(1);
        let (tx, rx) = mpsc::channel(buffer.max(1));

        // Lock before reading the log head: a concurrent append's notify
        // will block until the subscriber (with its last_sent watermark) is
        // registered, so nothing can slip between replay and live.
        let mut subscribers = self.subscribers.lock().await;

        let replay = store.events_from(from, None).await?;
        let mut last_sent = from - 1;
        let mut lagged = false;
        for event in replay {
            if tx.try_send(SubscriptionMessage::Event(event.clone())).is_err() {
                lagged = true;
                break;
            }
            last_sent = event.sequence;
        }

        if lagged {
            // Undersized buffer for the requested replay.
            let tx_lag = tx.clone();
            tokio::spawn(async move {
                let _ = tx_lag.send(SubscriptionMessage::Lagged).await;
            });
        } else {
            subscribers.push(HubSubscriber {
                tx,
                last_sent,
                lagged: false,
            });
        }

        Ok(SubscriptionStream { rx })
    }

    async fn deliver(&self, event: &RecordedEvent) {
        let store = self.store();
        let mut subscribers = self.subscribers.lock().await;

        for sub in subscribers.iter_mut() {
            if sub.lagged || event.sequence <= sub.last_sent {
                continue;
            }

            // Gap-fill: appends can notify out of commit order under
            // concurrency; missing events are fetched from the log.
            if event.sequence > sub.last_sent + 1 {
                let Some(store) = store.as_ref() else {
                    continue;
                };
                match store
                    .events_from(sub.last_sent + 1, Some(event.sequence - 1))
                    .await
                {
                    Ok(missing) => {
                        for m in missing {
                            if !push(sub, SubscriptionMessage::Event(m.clone()), m.sequence) {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "gap-fill read failed; subscriber marked lagged");
                        mark_lagged(sub);
                    }
                }
            }

            if !sub.lagged && event.sequence == sub.last_sent + 1 {
                push(sub, SubscriptionMessage::Event(event.clone()), event.sequence);
            }
        }

        subscribers.retain(|s| !s.is_closed());
    }
}

/// Push one message; on overflow the subscriber is marked lagged and told so.
fn push(sub: &mut HubSubscriber, message: SubscriptionMessage, sequence: u64) -> bool {
    match sub.tx.try_send(message) {
        Ok(()) => {
            sub.last_sent = sequence;
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            mark_lagged(sub);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            sub.lagged = true;
            false
        }
    }
}

fn mark_lagged(sub: &mut HubSubscriber) {
    sub.lagged = true;
    let tx = sub.tx.clone();
    // The queue is full; deliver the close reason once the client drains.
    tokio::spawn(async move {
        let _ = tx.send(SubscriptionMessage::Lagged).await;
    });
}

#[async_trait]
impl AppendObserver for SubscriptionHub {
    async fn notify(&self, event: &RecordedEvent) {
        self.deliver(event).await;
    }
}

/// The consumer end of a subscription.
pub struct SubscriptionStream {
    rx: mpsc::Receiver<SubscriptionMessage>,
}

impl SubscriptionStream {
    /// Next message; `None` when the hub dropped the subscription.
    pub async fn next(&mut self) -> Option<SubscriptionMessage> {
        self.rx.recv().await
    }

    /// Non-blocking poll, mainly for tests.
    pub fn try_next(&mut self) -> Option<SubscriptionMessage> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use covenant_core::{Actor, AggregateId, EntityId, EventId};
    use covenant_events::{AggregateType, CandidateEvent};
    use serde_json::json;

    use crate::event_store::InMemoryEventStore;

    fn candidate(aggregate_id: AggregateId, version: u64) -> CandidateEvent {
        CandidateEvent {
            event_id: EventId::new(),
            aggregate_type: AggregateType::System,
            aggregate_id,
            aggregate_version: version,
            event_type: "system.tick".to_string(),
            event_schema_version: 1,
            occurred_at: Utc::now(),
            actor: Actor::system(EntityId::new()),
            payload: json!({}),
            causation_command_id: None,
        }
    }

    fn wired() -> (Arc<InMemoryEventStore>, Arc<SubscriptionHub>) {
        let store = Arc::new(InMemoryEventStore::new());
        let hub = SubscriptionHub::new();
        hub.attach_store(store.clone());
        store.set_observer(hub.clone());
        (store, hub)
    }

    fn sequences(messages: &[SubscriptionMessage]) -> Vec<u64> {
        messages
            .iter()
            .filter_map(|m| match m {
                SubscriptionMessage::Event(e) => Some(e.sequence),
                SubscriptionMessage::Lagged => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn replays_history_then_delivers_live() {
        let (store, hub) = wired();
        let a = AggregateId::new();

        store.append(candidate(a, 1)).await.unwrap();
        store.append(candidate(a, 2)).await.unwrap();

        let mut stream = hub.subscribe(1).await.unwrap();

        store.append(candidate(a, 3)).await.unwrap();

        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(stream.next().await.unwrap());
        }
        assert_eq!(sequences(&got), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn from_sequence_skips_earlier_events() {
        let (store, hub) = wired();
        let a = AggregateId::new();
        for v in 1..=4 {
            store.append(candidate(a, v)).await.unwrap();
        }

        let mut stream = hub.subscribe(3).await.unwrap();
        let first = stream.next().await.unwrap();
        let SubscriptionMessage::Event(e) = first else {
            panic!("expected event");
        };
        assert_eq!(e.sequence, 3);
    }

    #[tokio::test]
    async fn exactly_once_no_duplicates_across_subscribe_boundary() {
        let (store, hub) = wired();
        let a = AggregateId::new();
        store.append(candidate(a, 1)).await.unwrap();

        let mut stream = hub.subscribe(1).await.unwrap();
        for v in 2..=5 {
            store.append(candidate(a, v)).await.unwrap();
        }

        let mut got = Vec::new();
        for _ in 0..5 {
            got.push(stream.next().await.unwrap());
        }
        assert_eq!(sequences(&got), vec![1, 2, 3, 4, 5]);
        assert!(stream.try_next().is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_is_closed_with_lagged() {
        let (store, hub) = wired();
        let a = AggregateId::new();

        let mut stream = hub.subscribe_with_buffer(1, 2).await.unwrap();

        // Overflow the 2-slot buffer without draining.
        for v in 1..=4 {
            store.append(candidate(a, v)).await.unwrap();
        }

        let mut saw_lagged = false;
        let mut delivered = Vec::new();
        while let Some(msg) = stream.next().await {
            match msg {
                SubscriptionMessage::Event(e) => delivered.push(e.sequence),
                SubscriptionMessage::Lagged => {
                    saw_lagged = true;
                    break;
                }
            }
        }
        assert!(saw_lagged);
        // Whatever was delivered stayed gapless from 1.
        assert_eq!(delivered, (1..=delivered.len() as u64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn reconnect_from_last_acknowledged_resumes_in_order() {
        let (store, hub) = wired();
        let a = AggregateId::new();
        for v in 1..=6 {
            store.append(candidate(a, v)).await.unwrap();
        }

        let mut first = hub.subscribe(1).await.unwrap();
        let mut acked = 0;
        for _ in 0..3 {
            if let Some(SubscriptionMessage::Event(e)) = first.next().await {
                acked = e.sequence;
            }
        }
        drop(first);

        let mut second = hub.subscribe(acked + 1).await.unwrap();
        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(second.next().await.unwrap());
        }
        assert_eq!(sequences(&got), vec![4, 5, 6]);
    }
}
