//! Projection manager: tails the subscription hub and keeps every
//! projection's read model and watermark moving forward.
//!
//! Each projection runs inside a [`ProjectionRunner`], whose monotonic
//! sequence guard makes at-least-once delivery safe: re-delivered events
//! are skipped, gaps are surfaced. After a `Lagged` close the worker
//! catches up from the store and resubscribes from its lowest committed
//! watermark.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use covenant_events::{Projection, ProjectionRunner};

use crate::event_store::{EventStore, EventStoreError};
use crate::subscriptions::{SubscriptionHub, SubscriptionMessage};

use super::cursor_store::CursorStore;

/// Handle to stop and join the projection worker.
pub struct ProjectionWorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl ProjectionWorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

pub struct ProjectionManager {
    store: Arc<dyn EventStore>,
    cursors: Arc<dyn CursorStore>,
}

impl ProjectionManager {
    pub fn new(store: Arc<dyn EventStore>, cursors: Arc<dyn CursorStore>) -> Self {
        Self { store, cursors }
    }

    /// Wrap a projection in a runner resumed from its committed watermark.
    async fn resume(
        &self,
        projection: Box<dyn Projection>,
    ) -> Result<ProjectionRunner<Box<dyn Projection>>, EventStoreError> {
        let committed = self
            .cursors
            .get(projection.name())
            .await?
            .unwrap_or(projection.replay_from().saturating_sub(1));
        Ok(ProjectionRunner::resume_from(projection, committed))
    }

    fn committed(&self, runner: &ProjectionRunner<Box<dyn Projection>>) -> u64 {
        runner
            .cursor()
            .map(|c| c.last_sequence())
            .unwrap_or_else(|| runner.projection().replay_from().saturating_sub(1))
    }

    /// Apply everything between the runner's watermark and the log head,
    /// reading straight from the store. Returns the new watermark.
    pub async fn catch_up(
        &self,
        runner: &mut ProjectionRunner<Box<dyn Projection>>,
    ) -> Result<u64, EventStoreError> {
        let committed = self.committed(runner);

        let pending = self.store.events_from(committed + 1, None).await?;
        let mut cursor = committed;
        for event in &pending {
            match runner.apply(event) {
                Ok(true) => cursor = event.sequence,
                Ok(false) => {}
                Err(e) => {
                    return Err(EventStoreError::Storage(format!(
                        "projection '{}' rejected replay: {e:?}",
                        runner.projection().name()
                    )));
                }
            }
        }

        if cursor != committed {
            self.cursors
                .set(runner.projection().name(), cursor)
                .await?;
        }
        Ok(cursor)
    }

    /// Drop a projection's derived state and replay it from scratch.
    pub async fn rebuild(
        &self,
        projection: Box<dyn Projection>,
    ) -> Result<u64, EventStoreError> {
        let mut projection = projection;
        projection.reset();
        self.cursors.clear(projection.name()).await?;
        let mut runner = self.resume(projection).await?;
        self.catch_up(&mut runner).await
    }

    /// Spawn the live worker: catch up, then tail the hub.
    pub fn spawn(
        self: Arc<Self>,
        hub: Arc<SubscriptionHub>,
        projections: Vec<Box<dyn Projection>>,
    ) -> ProjectionWorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(hub, projections, shutdown_rx));
        ProjectionWorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }

    async fn run(
        self: Arc<Self>,
        hub: Arc<SubscriptionHub>,
        projections: Vec<Box<dyn Projection>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut runners = Vec::with_capacity(projections.len());
        for projection in projections {
            let name = projection.name();
            match self.resume(projection).await {
                Ok(mut runner) => {
                    if let Err(e) = self.catch_up(&mut runner).await {
                        warn!(projection = name, error = %e, "initial catch-up failed");
                    }
                    runners.push(runner);
                }
                Err(e) => {
                    warn!(projection = name, error = %e, "could not resume projection");
                }
            }
        }
        if runners.is_empty() {
            return;
        }

        'outer: loop {
            let from = runners.iter().map(|r| self.committed(r)).min().unwrap_or(0) + 1;
            let mut stream = match hub.subscribe(from).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "projection worker could not subscribe");
                    return;
                }
            };

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("projection worker shutting down");
                            return;
                        }
                    }
                    message = stream.next() => {
                        match message {
                            Some(SubscriptionMessage::Event(event)) => {
                                for runner in runners.iter_mut() {
                                    match runner.apply(&event) {
                                        Ok(true) => {
                                            let name = runner.projection().name();
                                            if let Err(e) =
                                                self.cursors.set(name, event.sequence).await
                                            {
                                                warn!(
                                                    projection = name,
                                                    error = %e,
                                                    "cursor commit failed; will re-apply after restart"
                                                );
                                            }
                                        }
                                        Ok(false) => {
                                            // Duplicate delivery; already folded.
                                        }
                                        Err(e) => {
                                            warn!(
                                                projection = runner.projection().name(),
                                                error = ?e,
                                                "gap in live delivery; catching up from the store"
                                            );
                                            if let Err(e) = self.catch_up(runner).await {
                                                warn!(error = %e, "catch-up failed");
                                            }
                                        }
                                    }
                                }
                            }
                            Some(SubscriptionMessage::Lagged) | None => {
                                // Fell behind (or hub dropped us): catch up
                                // from the store and resubscribe.
                                for runner in runners.iter_mut() {
                                    if let Err(e) = self.catch_up(runner).await {
                                        warn!(error = %e, "catch-up after lag failed");
                                    }
                                }
                                continue 'outer;
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use covenant_core::{Actor, AggregateId, EntityId, EventId};
    use covenant_events::{AggregateType, CandidateEvent, RecordedEvent};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::event_store::InMemoryEventStore;
    use crate::projections::cursor_store::InMemoryCursorStore;

    struct Counter {
        seen: Arc<AtomicU64>,
    }

    impl Projection for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn apply(&mut self, _event: &RecordedEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }

        fn reset(&mut self) {
            self.seen.store(0, Ordering::SeqCst);
        }
    }

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

    #[tokio::test]
    async fn catch_up_applies_pending_events_and_commits_the_cursor() {
        let store = Arc::new(InMemoryEventStore::new());
        let cursors = Arc::new(InMemoryCursorStore::new());
        let manager = ProjectionManager::new(store.clone(), cursors.clone());

        let a = AggregateId::new();
        for v in 1..=3 {
            store.append(candidate(a, v)).await.unwrap();
        }

        let seen = Arc::new(AtomicU64::new(0));
        let mut runner = manager
            .resume(Box::new(Counter { seen: seen.clone() }))
            .await
            .unwrap();

        let cursor = manager.catch_up(&mut runner).await.unwrap();
        assert_eq!(cursor, 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(cursors.get("counter").await.unwrap(), Some(3));

        // A second catch-up applies nothing new.
        let cursor = manager.catch_up(&mut runner).await.unwrap();
        assert_eq!(cursor, 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn resume_skips_committed_history() {
        let store = Arc::new(InMemoryEventStore::new());
        let cursors = Arc::new(InMemoryCursorStore::new());
        let manager = ProjectionManager::new(store.clone(), cursors.clone());

        let a = AggregateId::new();
        for v in 1..=4 {
            store.append(candidate(a, v)).await.unwrap();
        }
        cursors.set("counter", 2).await.unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let mut runner = manager
            .resume(Box::new(Counter { seen: seen.clone() }))
            .await
            .unwrap();
        manager.catch_up(&mut runner).await.unwrap();

        // Only events 3 and 4 were re-applied.
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rebuild_resets_and_replays() {
        let store = Arc::new(InMemoryEventStore::new());
        let cursors = Arc::new(InMemoryCursorStore::new());
        let manager = ProjectionManager::new(store.clone(), cursors.clone());

        let a = AggregateId::new();
        for v in 1..=2 {
            store.append(candidate(a, v)).await.unwrap();
        }

        let seen = Arc::new(AtomicU64::new(0));
        let mut runner = manager
            .resume(Box::new(Counter { seen: seen.clone() }))
            .await
            .unwrap();
        manager.catch_up(&mut runner).await.unwrap();

        let cursor = manager
            .rebuild(Box::new(Counter { seen: seen.clone() }))
            .await
            .unwrap();
        assert_eq!(cursor, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn live_worker_applies_appends_as_they_happen() {
        let store = Arc::new(InMemoryEventStore::new());
        let hub = SubscriptionHub::new();
        hub.attach_store(store.clone());
        store.set_observer(hub.clone());

        let cursors = Arc::new(InMemoryCursorStore::new());
        let manager = Arc::new(ProjectionManager::new(store.clone(), cursors.clone()));

        let seen = Arc::new(AtomicU64::new(0));
        let handle = manager.spawn(
            hub.clone(),
            vec![Box::new(Counter { seen: seen.clone() })],
        );

        let a = AggregateId::new();
        for v in 1..=4 {
            store.append(candidate(a, v)).await.unwrap();
        }

        // Bounded wait for eventual consistency.
        for _ in 0..100 {
            if seen.load(Ordering::SeqCst) == 4 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert_eq!(cursors.get("counter").await.unwrap(), Some(4));

        handle.shutdown().await;
    }
}
