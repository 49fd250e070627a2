use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use covenant_core::AggregateId;
use covenant_events::{chain_hash, AggregateType, CandidateEvent, RecordedEvent};

use super::store_trait::{AppendObserver, EventStore, EventStoreError};

#[derive(Debug, Default)]
struct LogState {
    log: Vec<RecordedEvent>,
    versions: HashMap<(AggregateType, AggregateId), u64>,
    last_hash: Option<String>,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. The whole log lives in one `RwLock`; appends
/// serialize globally, reads clone a snapshot and never block writers for
/// longer than the copy.
pub struct InMemoryEventStore {
    state: RwLock<LogState>,
    observer: RwLock<Option<Arc<dyn AppendObserver>>>,
    chaining: bool,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LogState::default()),
            observer: RwLock::new(None),
            chaining: false,
        }
    }

    /// Enable the hash chain on every appended event.
    pub fn with_hash_chain() -> Self {
        Self {
            state: RwLock::new(LogState::default()),
            observer: RwLock::new(None),
            chaining: true,
        }
    }

    /// Attach the append observer (subscription hub). One observer only;
    /// fan-out beyond it is the hub's job.
    pub fn set_observer(&self, observer: Arc<dyn AppendObserver>) {
        *self
            .observer
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }

    fn observer(&self) -> Option<Arc<dyn AppendObserver>> {
        self.observer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, candidate: CandidateEvent) -> Result<RecordedEvent, EventStoreError> {
        if candidate.aggregate_version == 0 {
            return Err(EventStoreError::InvalidAppend(
                "aggregate_version must start at 1".to_string(),
            ));
        }

        let recorded = {
            let mut state = self
                .state
                .write()
                .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

            let key = (candidate.aggregate_type, candidate.aggregate_id);
            let current = state.versions.get(&key).copied().unwrap_or(0);

            if candidate.aggregate_version != current + 1 {
                return Err(EventStoreError::Concurrency(format!(
                    "aggregate {}/{} is at version {current}, append carried {}",
                    candidate.aggregate_type, candidate.aggregate_id, candidate.aggregate_version
                )));
            }

            let sequence = state.log.len() as u64 + 1;
            let hash = self
                .chaining
                .then(|| chain_hash(state.last_hash.as_deref(), &candidate, sequence));

            let recorded = candidate.into_recorded(sequence, hash.clone());
            state.versions.insert(key, recorded.aggregate_version);
            if self.chaining {
                state.last_hash = hash;
            }
            state.log.push(recorded.clone());
            recorded
        };

        if let Some(observer) = self.observer() {
            observer.notify(&recorded).await;
        }

        Ok(recorded)
    }

    async fn events_for_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        Ok(state
            .log
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    async fn events_from(
        &self,
        from_sequence: u64,
        to_sequence: Option<u64>,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        let to = to_sequence.unwrap_or(state.log.len() as u64);
        Ok(state
            .log
            .iter()
            .filter(|e| e.sequence >= from_sequence && e.sequence <= to)
            .cloned()
            .collect())
    }

    async fn latest_for_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
    ) -> Result<Option<RecordedEvent>, EventStoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        Ok(state
            .log
            .iter()
            .rev()
            .find(|e| e.aggregate_type == aggregate_type && e.aggregate_id == aggregate_id)
            .cloned())
    }

    async fn current_sequence(&self) -> Result<u64, EventStoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;
        Ok(state.log.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use covenant_core::{Actor, EntityId, EventId};
    use covenant_events::verify_chain;
    use serde_json::json;

    fn candidate(aggregate_id: AggregateId, version: u64) -> CandidateEvent {
        CandidateEvent {
            event_id: EventId::new(),
            aggregate_type: AggregateType::Party,
            aggregate_id,
            aggregate_version: version,
            event_type: "party.created".to_string(),
            event_schema_version: 1,
            occurred_at: Utc::now(),
            actor: Actor::system(EntityId::new()),
            payload: json!({"n": version}),
            causation_command_id: None,
        }
    }

    #[tokio::test]
    async fn sequences_are_gapless_and_versions_contiguous() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        let e1 = store.append(candidate(a, 1)).await.unwrap();
        let e2 = store.append(candidate(b, 1)).await.unwrap();
        let e3 = store.append(candidate(a, 2)).await.unwrap();

        assert_eq!((e1.sequence, e2.sequence, e3.sequence), (1, 2, 3));
        assert_eq!(store.current_sequence().await.unwrap(), 3);

        let stream = store
            .events_for_aggregate(AggregateType::Party, a)
            .await
            .unwrap();
        assert_eq!(
            stream.iter().map(|e| e.aggregate_version).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();

        store.append(candidate(a, 1)).await.unwrap();
        let err = store.append(candidate(a, 1)).await.unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));

        // Version 3 (skipping 2) is equally stale.
        let err = store.append(candidate(a, 3)).await.unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[tokio::test]
    async fn range_reads_honor_bounds() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        for v in 1..=5 {
            store.append(candidate(a, v)).await.unwrap();
        }

        let middle = store.events_from(2, Some(4)).await.unwrap();
        assert_eq!(
            middle.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );

        let tail = store.events_from(4, None).await.unwrap();
        assert_eq!(tail.len(), 2);
    }

    #[tokio::test]
    async fn latest_returns_the_newest_event() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        store.append(candidate(a, 1)).await.unwrap();
        store.append(candidate(a, 2)).await.unwrap();

        let latest = store
            .latest_for_aggregate(AggregateType::Party, a)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.aggregate_version, 2);
    }

    #[tokio::test]
    async fn hash_chain_is_valid_when_enabled() {
        let store = InMemoryEventStore::with_hash_chain();
        let a = AggregateId::new();
        for v in 1..=4 {
            store.append(candidate(a, v)).await.unwrap();
        }

        let log = store.events_from(1, None).await.unwrap();
        assert!(verify_chain(&log).is_ok());
    }

    #[tokio::test]
    async fn concurrent_same_version_appends_have_one_winner() {
        let store = Arc::new(InMemoryEventStore::new());
        let a = AggregateId::new();
        store.append(candidate(a, 1)).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(
                async move { store.append(candidate(a, 2)).await },
            ));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
