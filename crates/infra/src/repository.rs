//! Aggregate rehydration.
//!
//! A repository folds an aggregate's events, in version order, through the
//! domain crate's `apply`. Folds are pure and deterministic: the same
//! stream always yields structurally identical state, and the folded
//! `version` equals the highest applied `aggregate_version`. Unknown event
//! types are skipped (forward compatibility); writers never rely on them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;

use covenant_agreements::{Agreement, AgreementEvent, AgreementId};
use covenant_assets::{Asset, AssetEvent, AssetId};
use covenant_auth::{ApiKey, ApiKeyEvent, ApiKeyId};
use covenant_containers::{Container, ContainerEvent, ContainerId};
use covenant_core::{Aggregate, AggregateId};
use covenant_events::{AggregateType, RecordedEvent};
use covenant_parties::{Party, PartyEvent, PartyId};

use crate::event_store::{EventStore, EventStoreError};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// Read-side access to aggregates, rebuilt from the log on every call.
///
/// Cheap to clone; it holds only the store handle.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn EventStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// The version the next append to this aggregate must carry.
    pub async fn next_version(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
    ) -> Result<u64, RepositoryError> {
        Ok(self.current_version(aggregate_type, aggregate_id).await? + 1)
    }

    /// The aggregate's current version (0 when it does not exist).
    pub async fn current_version(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
    ) -> Result<u64, RepositoryError> {
        Ok(self
            .store
            .latest_for_aggregate(aggregate_type, aggregate_id)
            .await?
            .map(|e| e.aggregate_version)
            .unwrap_or(0))
    }

    pub async fn party(&self, id: PartyId) -> Result<Option<Party>, RepositoryError> {
        self.fold::<Party, PartyEvent>(AggregateType::Party, id.into(), Party::empty(id), None)
            .await
    }

    /// Fold only events with `occurred_at <= at` (point-in-time view).
    pub async fn party_as_of(
        &self,
        id: PartyId,
        at: DateTime<Utc>,
    ) -> Result<Option<Party>, RepositoryError> {
        self.fold::<Party, PartyEvent>(AggregateType::Party, id.into(), Party::empty(id), Some(at))
            .await
    }

    pub async fn agreement(&self, id: AgreementId) -> Result<Option<Agreement>, RepositoryError> {
        self.fold::<Agreement, AgreementEvent>(
            AggregateType::Agreement,
            id.into(),
            Agreement::empty(id),
            None,
        )
        .await
    }

    pub async fn agreement_as_of(
        &self,
        id: AgreementId,
        at: DateTime<Utc>,
    ) -> Result<Option<Agreement>, RepositoryError> {
        self.fold::<Agreement, AgreementEvent>(
            AggregateType::Agreement,
            id.into(),
            Agreement::empty(id),
            Some(at),
        )
        .await
    }

    pub async fn asset(&self, id: AssetId) -> Result<Option<Asset>, RepositoryError> {
        self.fold::<Asset, AssetEvent>(AggregateType::Asset, id.into(), Asset::empty(id), None)
            .await
    }

    pub async fn container(&self, id: ContainerId) -> Result<Option<Container>, RepositoryError> {
        self.fold::<Container, ContainerEvent>(
            AggregateType::Container,
            id.into(),
            Container::empty(id),
            None,
        )
        .await
    }

    pub async fn api_key(&self, id: ApiKeyId) -> Result<Option<ApiKey>, RepositoryError> {
        self.fold::<ApiKey, ApiKeyEvent>(AggregateType::ApiKey, id.into(), ApiKey::empty(id), None)
            .await
    }

    async fn fold<A, E>(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        initial: A,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Option<A>, RepositoryError>
    where
        A: Aggregate<Event = E>,
        E: DeserializeOwned,
    {
        let events = self
            .store
            .events_for_aggregate(aggregate_type, aggregate_id)
            .await?;

        if events.is_empty() {
            return Ok(None);
        }

        let mut state = initial;
        let mut applied = 0usize;
        for recorded in &events {
            if let Some(at) = as_of {
                if recorded.occurred_at > at {
                    continue;
                }
            }
            apply_recorded(&mut state, recorded);
            applied += 1;
        }

        if applied == 0 {
            // Every event postdates the as-of point: the aggregate did not
            // exist yet from that vantage.
            return Ok(None);
        }

        Ok(Some(state))
    }
}

/// Deserialize and apply a single recorded event, skipping unknown types.
fn apply_recorded<A, E>(state: &mut A, recorded: &RecordedEvent)
where
    A: Aggregate<Event = E>,
    E: DeserializeOwned,
{
    match recorded.typed::<E>() {
        Ok(event) => state.apply(&event),
        Err(e) => {
            tracing::warn!(
                event_type = %recorded.event_type,
                sequence = recorded.sequence,
                error = %e,
                "skipping undecodable event during rehydration"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use covenant_core::{Actor, EntityId, EventId};
    use covenant_events::{CandidateEvent, Event};
    use covenant_parties::{Identity, PartyCreated, PartyKind};

    use crate::event_store::InMemoryEventStore;

    async fn append_party_event(
        store: &InMemoryEventStore,
        id: PartyId,
        version: u64,
        event: &PartyEvent,
    ) {
        let candidate = CandidateEvent::from_typed(
            AggregateType::Party,
            id.into(),
            version,
            Actor::system(EntityId::new()),
            None,
            event,
        )
        .unwrap();
        store.append(candidate).await.unwrap();
    }

    fn created(id: PartyId, name: &str, at: DateTime<Utc>) -> PartyEvent {
        PartyEvent::Created(PartyCreated {
            party_id: id,
            kind: PartyKind::Person,
            identity: Identity::named(name),
            realm_id: None,
            occurred_at: at,
        })
    }

    fn renamed(id: PartyId, name: &str, at: DateTime<Utc>) -> PartyEvent {
        PartyEvent::IdentityUpdated(covenant_parties::party::IdentityUpdated {
            party_id: id,
            identity: Identity::named(name),
            occurred_at: at,
        })
    }

    #[tokio::test]
    async fn folds_state_with_version() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = Repository::new(store.clone());
        let id = PartyId::new();
        let t = Utc::now();

        append_party_event(&store, id, 1, &created(id, "Ada", t)).await;
        append_party_event(&store, id, 2, &renamed(id, "Ada L.", t + Duration::seconds(1))).await;

        let party = repo.party(id).await.unwrap().unwrap();
        assert_eq!(party.identity.name, "Ada L.");
        assert_eq!(party.version, 2);
    }

    #[tokio::test]
    async fn missing_aggregate_is_none() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = Repository::new(store);
        assert!(repo.party(PartyId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rehydration_is_deterministic() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = Repository::new(store.clone());
        let id = PartyId::new();
        let t = Utc::now();

        append_party_event(&store, id, 1, &created(id, "Ada", t)).await;
        append_party_event(&store, id, 2, &renamed(id, "Countess", t + Duration::seconds(1))).await;

        let first = repo.party(id).await.unwrap().unwrap();
        let second = repo.party(id).await.unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn as_of_reconstructs_past_state() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = Repository::new(store.clone());
        let id = PartyId::new();
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(10);
        let t3 = t2 + Duration::seconds(10);

        append_party_event(&store, id, 1, &created(id, "First", t1)).await;
        append_party_event(&store, id, 2, &renamed(id, "Second", t2)).await;
        append_party_event(&store, id, 3, &renamed(id, "Third", t3)).await;

        let at_t2 = repo.party_as_of(id, t2).await.unwrap().unwrap();
        assert_eq!(at_t2.identity.name, "Second");

        let before_creation = repo.party_as_of(id, t1 - Duration::seconds(1)).await.unwrap();
        assert!(before_creation.is_none());
    }

    #[tokio::test]
    async fn unknown_event_types_are_ignored() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = Repository::new(store.clone());
        let id = PartyId::new();
        let t = Utc::now();

        append_party_event(&store, id, 1, &created(id, "Ada", t)).await;

        // A future event type this build does not know how to decode.
        let unknown = CandidateEvent {
            event_id: EventId::new(),
            aggregate_type: AggregateType::Party,
            aggregate_id: id.into(),
            aggregate_version: 2,
            event_type: "party.hologram_attached".to_string(),
            event_schema_version: 7,
            occurred_at: t,
            actor: Actor::system(EntityId::new()),
            payload: serde_json::json!({"shape": "octahedron"}),
            causation_command_id: None,
        };
        store.append(unknown).await.unwrap();

        let party = repo.party(id).await.unwrap().unwrap();
        assert_eq!(party.identity.name, "Ada");
        // Version reflects applied events only.
        assert_eq!(party.version, 1);
    }

    #[tokio::test]
    async fn next_version_tracks_the_stream() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = Repository::new(store.clone());
        let id = PartyId::new();

        assert_eq!(
            repo.next_version(AggregateType::Party, id.into()).await.unwrap(),
            1
        );
        append_party_event(&store, id, 1, &created(id, "Ada", Utc::now())).await;
        assert_eq!(
            repo.next_version(AggregateType::Party, id.into()).await.unwrap(),
            2
        );
    }

    #[test]
    fn party_events_expose_business_time() {
        let id = PartyId::new();
        let t = Utc::now();
        assert_eq!(created(id, "x", t).occurred_at(), t);
    }
}
