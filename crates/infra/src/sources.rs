//! Log-derived lookup sources for the authorization and authentication
//! engines.
//!
//! Fast path: the projection read models. Whenever a read model's
//! watermark is behind the log head, the lookup falls back to a log scan;
//! projections are caches, never the source of truth.

use std::sync::Arc;

use async_trait::async_trait;

use covenant_agreements::{Agreement, AgreementEvent, AgreementId};
use covenant_auth::{AgreementSource, ApiKeyIndex, ApiKeyRecord};
use covenant_core::EntityId;
use covenant_events::AggregateType;

use crate::event_store::EventStore;
use crate::projections::ReadModels;
use crate::repository::Repository;

pub struct LedgerSources {
    store: Arc<dyn EventStore>,
    repository: Repository,
    read_models: Arc<ReadModels>,
}

impl LedgerSources {
    pub fn new(store: Arc<dyn EventStore>, read_models: Arc<ReadModels>) -> Self {
        Self {
            repository: Repository::new(store.clone()),
            store,
            read_models,
        }
    }

    /// Log head; 0 on storage failure, so lookups fall back to whatever the
    /// read models have rather than denying outright.
    async fn head(&self) -> u64 {
        self.store.current_sequence().await.unwrap_or(0)
    }

    /// Ids of agreements naming `entity`, scanning the full log.
    async fn scan_agreement_ids(&self, entity: EntityId) -> Vec<AgreementId> {
        let Ok(log) = self.store.events_from(1, None).await else {
            return Vec::new();
        };

        let mut ids = Vec::new();
        for event in log {
            if event.aggregate_type != AggregateType::Agreement
                || event.event_type != "agreement.proposed"
            {
                continue;
            }
            if let Ok(AgreementEvent::Proposed {
                agreement_id,
                parties,
                ..
            }) = event.typed::<AgreementEvent>()
            {
                if parties.iter().any(|p| p.entity_id == entity) {
                    ids.push(agreement_id);
                }
            }
        }
        ids
    }

    /// Implicit role lookup: the roles an entity currently holds, with the
    /// agreement granting each. Roles exist only while an active agreement
    /// names the party under them.
    pub async fn active_roles(&self, entity: EntityId) -> Vec<(AgreementId, String)> {
        let now = chrono::Utc::now();
        let mut roles = Vec::new();
        for agreement in self.agreements_naming(entity).await {
            if !agreement.grants_at(now) {
                continue;
            }
            if let Some(role) = agreement.role_of(entity) {
                roles.push((agreement.id, role.to_string()));
            }
        }
        roles
    }
}

#[async_trait]
impl AgreementSource for LedgerSources {
    async fn agreements_naming(&self, entity: EntityId) -> Vec<Agreement> {
        let index = &self.read_models.agreements_by_party;
        let ids = if index.last_sequence() >= self.head().await {
            index.agreements_for(entity)
        } else {
            self.scan_agreement_ids(entity).await
        };

        let mut agreements = Vec::with_capacity(ids.len());
        for id in ids {
            // The fold is authoritative; the index only names candidates.
            if let Ok(Some(agreement)) = self.repository.agreement(id).await {
                agreements.push(agreement);
            }
        }
        agreements
    }

    async fn agreement_by_id(&self, id: AgreementId) -> Option<Agreement> {
        self.repository.agreement(id).await.ok().flatten()
    }
}

#[async_trait]
impl ApiKeyIndex for LedgerSources {
    async fn lookup_hash(&self, key_hash: &str) -> Option<ApiKeyRecord> {
        let index = &self.read_models.api_keys;
        if index.last_sequence() >= self.head().await {
            return index.lookup(key_hash);
        }

        // Projection unavailable or behind: scan the log for a matching
        // hash, then fold the aggregate for the authoritative state.
        let log = self.store.events_from(1, None).await.ok()?;
        for event in log {
            if event.aggregate_type != AggregateType::ApiKey
                || event.event_type != "api_key.created"
            {
                continue;
            }
            if let Ok(covenant_auth::ApiKeyEvent::Created {
                api_key_id,
                key_hash: created_hash,
                ..
            }) = event.typed::<covenant_auth::ApiKeyEvent>()
            {
                if created_hash == key_hash {
                    let key = self.repository.api_key(api_key_id).await.ok().flatten()?;
                    return Some(ApiKeyRecord {
                        api_key_id: key.id,
                        entity_id: key.entity_id?,
                        realm_id: key.realm_id?,
                        scopes: key.scopes,
                        expires_at: key.expires_at,
                        established_by: key.established_by,
                        revoked: key.revoked,
                    });
                }
            }
        }
        None
    }
}
