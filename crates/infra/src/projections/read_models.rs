//! Built-in read models.
//!
//! Read models are disposable caches of the log: every one can be rebuilt
//! by replaying from sequence 1. Query paths check the watermark against
//! the store head and fall back to a log scan when the projection is
//! behind, so correctness never depends on projection timing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use covenant_agreements::{AgreementEvent, AgreementId};
use covenant_auth::{ApiKeyEvent, ApiKeyRecord};
use covenant_containers::{ContainerEvent, ContainerId};
use covenant_core::{EntityId, RealmId};
use covenant_events::{Projection, RecordedEvent};

// ─────────────────────────────────────────────────────────────────────────────
// Realms
// ─────────────────────────────────────────────────────────────────────────────

/// One realm, as listed by `realm:list`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RealmSummary {
    pub realm_id: RealmId,
    pub container_id: ContainerId,
    pub name: String,
    pub governance_agreement_id: Option<AgreementId>,
    pub owner_id: Option<EntityId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RealmsReadModel {
    inner: RwLock<BTreeMap<RealmId, RealmSummary>>,
    watermark: AtomicU64,
}

impl RealmsReadModel {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
            watermark: AtomicU64::new(0),
        }
    }

    pub fn list(&self) -> Vec<RealmSummary> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, realm_id: RealmId) -> Option<RealmSummary> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&realm_id)
            .cloned()
    }

    /// Highest sequence folded in (staleness check for fallback reads).
    pub fn last_sequence(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    fn upsert(&self, summary: RealmSummary) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(summary.realm_id, summary);
    }

    fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.watermark.store(0, Ordering::Release);
    }
}

impl Default for RealmsReadModel {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RealmsProjection {
    model: Arc<RealmsReadModel>,
}

impl RealmsProjection {
    pub fn new(model: Arc<RealmsReadModel>) -> Self {
        Self { model }
    }
}

impl Projection for RealmsProjection {
    fn name(&self) -> &'static str {
        "realms"
    }

    fn apply(&mut self, event: &RecordedEvent) {
        if event.event_type == "container.created" {
            if let Ok(ContainerEvent::Created {
                container_id,
                realm_id,
                name,
                container_type,
                governance_agreement_id,
                owner_id,
                occurred_at,
                ..
            }) = event.typed::<ContainerEvent>()
            {
                if container_type == "Realm" {
                    let realm_id = realm_id.unwrap_or_else(|| {
                        RealmId::from_uuid(*container_id.as_uuid())
                    });
                    self.model.upsert(RealmSummary {
                        realm_id,
                        container_id,
                        name,
                        governance_agreement_id,
                        owner_id,
                        created_at: occurred_at,
                    });
                }
            }
        }
        self.model.watermark.store(event.sequence, Ordering::Release);
    }

    fn reset(&mut self) {
        self.model.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Api keys
// ─────────────────────────────────────────────────────────────────────────────

/// `key_hash → folded key state`, the index the authentication engine reads.
#[derive(Debug)]
pub struct ApiKeysReadModel {
    by_hash: RwLock<BTreeMap<String, ApiKeyRecord>>,
    hash_by_id: RwLock<BTreeMap<String, String>>,
    watermark: AtomicU64,
}

impl ApiKeysReadModel {
    pub fn new() -> Self {
        Self {
            by_hash: RwLock::new(BTreeMap::new()),
            hash_by_id: RwLock::new(BTreeMap::new()),
            watermark: AtomicU64::new(0),
        }
    }

    pub fn lookup(&self, key_hash: &str) -> Option<ApiKeyRecord> {
        self.by_hash
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key_hash)
            .cloned()
    }

    pub fn last_sequence(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.by_hash
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.hash_by_id
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.watermark.store(0, Ordering::Release);
    }
}

impl Default for ApiKeysReadModel {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ApiKeysProjection {
    model: Arc<ApiKeysReadModel>,
}

impl ApiKeysProjection {
    pub fn new(model: Arc<ApiKeysReadModel>) -> Self {
        Self { model }
    }
}

impl Projection for ApiKeysProjection {
    fn name(&self) -> &'static str {
        "api_keys"
    }

    fn apply(&mut self, event: &RecordedEvent) {
        match event.typed::<ApiKeyEvent>() {
            Ok(ApiKeyEvent::Created {
                api_key_id,
                key_hash,
                entity_id,
                realm_id,
                scopes,
                expires_at,
                established_by,
                ..
            }) if event.event_type == "api_key.created" => {
                self.model
                    .hash_by_id
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(api_key_id.to_string(), key_hash.clone());
                self.model
                    .by_hash
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(
                        key_hash,
                        ApiKeyRecord {
                            api_key_id,
                            entity_id,
                            realm_id,
                            scopes,
                            expires_at,
                            established_by,
                            revoked: false,
                        },
                    );
            }
            Ok(ApiKeyEvent::Revoked { api_key_id, .. })
                if event.event_type == "api_key.revoked" =>
            {
                let hash = self
                    .model
                    .hash_by_id
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&api_key_id.to_string())
                    .cloned();
                if let Some(hash) = hash {
                    if let Some(record) = self
                        .model
                        .by_hash
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .get_mut(&hash)
                    {
                        record.revoked = true;
                    }
                }
            }
            _ => {}
        }
        self.model.watermark.store(event.sequence, Ordering::Release);
    }

    fn reset(&mut self) {
        self.model.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agreements by party (authorization index)
// ─────────────────────────────────────────────────────────────────────────────

/// `entity → agreements naming it`; the authorization engine's index.
#[derive(Debug)]
pub struct AgreementsByPartyReadModel {
    inner: RwLock<BTreeMap<EntityId, BTreeSet<AgreementId>>>,
    watermark: AtomicU64,
}

impl AgreementsByPartyReadModel {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
            watermark: AtomicU64::new(0),
        }
    }

    pub fn agreements_for(&self, entity: EntityId) -> Vec<AgreementId> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&entity)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn last_sequence(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.watermark.store(0, Ordering::Release);
    }
}

impl Default for AgreementsByPartyReadModel {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AgreementsByPartyProjection {
    model: Arc<AgreementsByPartyReadModel>,
}

impl AgreementsByPartyProjection {
    pub fn new(model: Arc<AgreementsByPartyReadModel>) -> Self {
        Self { model }
    }
}

impl Projection for AgreementsByPartyProjection {
    fn name(&self) -> &'static str {
        "agreements_by_party"
    }

    fn apply(&mut self, event: &RecordedEvent) {
        if event.event_type == "agreement.proposed" {
            if let Ok(AgreementEvent::Proposed {
                agreement_id,
                parties,
                ..
            }) = event.typed::<AgreementEvent>()
            {
                let mut inner = self.model.inner.write().unwrap_or_else(|e| e.into_inner());
                for party in parties {
                    inner.entry(party.entity_id).or_default().insert(agreement_id);
                }
            }
        }
        self.model.watermark.store(event.sequence, Ordering::Release);
    }

    fn reset(&mut self) {
        self.model.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_agreements::{ConsentQuorum, PartyRef, Validity};
    use covenant_core::{Actor, EventId};
    use covenant_events::{AggregateType, CandidateEvent};

    fn recorded(sequence: u64, aggregate_type: AggregateType, event_type: &str, payload: serde_json::Value) -> RecordedEvent {
        CandidateEvent {
            event_id: EventId::new(),
            aggregate_type,
            aggregate_id: covenant_core::AggregateId::new(),
            aggregate_version: 1,
            event_type: event_type.to_string(),
            event_schema_version: 1,
            occurred_at: Utc::now(),
            actor: Actor::system(EntityId::new()),
            payload,
            causation_command_id: None,
        }
        .into_recorded(sequence, None)
    }

    #[test]
    fn realms_projection_tracks_realm_containers_only() {
        let model = Arc::new(RealmsReadModel::new());
        let mut projection = RealmsProjection::new(model.clone());

        let realm_id = RealmId::new();
        let realm_event = ContainerEvent::Created {
            container_id: ContainerId::from_uuid(*realm_id.as_uuid()),
            realm_id: Some(realm_id),
            name: "Acme".to_string(),
            container_type: "Realm".to_string(),
            physics: covenant_containers::ContainerPhysics::realm(),
            governance_agreement_id: None,
            owner_id: None,
            parent_container_id: None,
            occurred_at: Utc::now(),
        };
        projection.apply(&recorded(
            1,
            AggregateType::Container,
            "container.created",
            serde_json::to_value(&realm_event).unwrap(),
        ));

        let wallet_event = ContainerEvent::Created {
            container_id: ContainerId::new(),
            realm_id: Some(realm_id),
            name: "wallet".to_string(),
            container_type: "Wallet".to_string(),
            physics: covenant_containers::ContainerPhysics::wallet(),
            governance_agreement_id: None,
            owner_id: None,
            parent_container_id: None,
            occurred_at: Utc::now(),
        };
        projection.apply(&recorded(
            2,
            AggregateType::Container,
            "container.created",
            serde_json::to_value(&wallet_event).unwrap(),
        ));

        let realms = model.list();
        assert_eq!(realms.len(), 1);
        assert_eq!(realms[0].name, "Acme");
        assert_eq!(model.last_sequence(), 2);
    }

    #[test]
    fn agreements_by_party_indexes_every_named_entity() {
        let model = Arc::new(AgreementsByPartyReadModel::new());
        let mut projection = AgreementsByPartyProjection::new(model.clone());

        let a = EntityId::new();
        let b = EntityId::new();
        let agreement_id = AgreementId::new();
        let event = AgreementEvent::Proposed {
            agreement_id,
            agreement_type: "employment".to_string(),
            parties: vec![PartyRef::new(a, "employer"), PartyRef::new(b, "employee")],
            terms: serde_json::json!({}),
            assets: vec![],
            validity: Validity::default(),
            realm_id: None,
            parent_agreement_id: None,
            quorum: ConsentQuorum::AllParties,
            occurred_at: Utc::now(),
        };

        projection.apply(&recorded(
            1,
            AggregateType::Agreement,
            "agreement.proposed",
            serde_json::to_value(&event).unwrap(),
        ));

        assert_eq!(model.agreements_for(a), vec![agreement_id]);
        assert_eq!(model.agreements_for(b), vec![agreement_id]);
        assert!(model.agreements_for(EntityId::new()).is_empty());
    }
}
