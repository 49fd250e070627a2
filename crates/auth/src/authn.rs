//! Authentication engine: API key verification.
//!
//! Correctness derives from the log. The engine consults a key-hash index
//! (normally a projection; a log scan when the projection is unavailable),
//! then checks revocation, expiry, and that the establishing agreement is
//! still active. Terminating an agreement therefore revokes every key it
//! established without any `api_key.revoked` event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use covenant_agreements::AgreementId;
use covenant_core::{EntityId, RealmId};

use crate::api_key::ApiKeyId;
use crate::engine::AgreementSource;

/// Hash a presented key for storage or lookup.
pub fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Folded state of one API key, as served by the key-hash index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    pub api_key_id: ApiKeyId,
    pub entity_id: EntityId,
    pub realm_id: RealmId,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub established_by: Option<AgreementId>,
    pub revoked: bool,
}

/// Lookup from key hash to folded key state.
#[async_trait]
pub trait ApiKeyIndex: Send + Sync {
    async fn lookup_hash(&self, key_hash: &str) -> Option<ApiKeyRecord>;
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnContext {
    pub realm_id: RealmId,
    pub entity_id: EntityId,
    pub scopes: Vec<String>,
}

/// Verifies presented API keys against the log-derived index.
pub struct AuthenticationEngine {
    index: Arc<dyn ApiKeyIndex>,
    agreements: Arc<dyn AgreementSource>,
}

impl AuthenticationEngine {
    pub fn new(index: Arc<dyn ApiKeyIndex>, agreements: Arc<dyn AgreementSource>) -> Self {
        Self { index, agreements }
    }

    pub async fn verify(&self, presented: &str, now: DateTime<Utc>) -> Option<AuthnContext> {
        let record = self.index.lookup_hash(&hash_key(presented)).await?;

        if record.revoked {
            return None;
        }

        if let Some(expires_at) = record.expires_at {
            if now >= expires_at {
                return None;
            }
        }

        // Cascade revocation: a key is only as alive as its agreement.
        if let Some(established_by) = record.established_by {
            let agreement = self.agreements.agreement_by_id(established_by).await?;
            if !agreement.grants_at(now) {
                return None;
            }
        }

        Some(AuthnContext {
            realm_id: record.realm_id,
            entity_id: record.entity_id,
            scopes: record.scopes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_agreements::{Agreement, AgreementStatus, PartyRef};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapIndex {
        records: HashMap<String, ApiKeyRecord>,
    }

    #[async_trait]
    impl ApiKeyIndex for MapIndex {
        async fn lookup_hash(&self, key_hash: &str) -> Option<ApiKeyRecord> {
            self.records.get(key_hash).cloned()
        }
    }

    struct FixedAgreements {
        agreements: Mutex<Vec<Agreement>>,
    }

    #[async_trait]
    impl AgreementSource for FixedAgreements {
        async fn agreements_naming(&self, entity: EntityId) -> Vec<Agreement> {
            self.agreements
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.party(entity).is_some())
                .cloned()
                .collect()
        }

        async fn agreement_by_id(&self, id: AgreementId) -> Option<Agreement> {
            self.agreements
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.id == id)
                .cloned()
        }
    }

    fn record(established_by: Option<AgreementId>) -> ApiKeyRecord {
        ApiKeyRecord {
            api_key_id: ApiKeyId::new(),
            entity_id: EntityId::new(),
            realm_id: RealmId::new(),
            scopes: vec!["query:*".to_string()],
            expires_at: None,
            established_by,
            revoked: false,
        }
    }

    fn engine_with(
        records: Vec<(String, ApiKeyRecord)>,
        agreements: Vec<Agreement>,
    ) -> AuthenticationEngine {
        AuthenticationEngine::new(
            Arc::new(MapIndex {
                records: records.into_iter().collect(),
            }),
            Arc::new(FixedAgreements {
                agreements: Mutex::new(agreements),
            }),
        )
    }

    fn active_agreement() -> Agreement {
        let mut agreement = Agreement::empty(AgreementId::new());
        agreement.created = true;
        agreement.agreement_type = "api-access".to_string();
        agreement.status = AgreementStatus::Active;
        agreement.parties = vec![PartyRef::new(EntityId::new(), "holder")];
        agreement
    }

    #[tokio::test]
    async fn valid_key_verifies() {
        let agreement = active_agreement();
        let rec = record(Some(agreement.id));
        let expected_entity = rec.entity_id;
        let engine = engine_with(vec![(hash_key("raw-key"), rec)], vec![agreement]);

        let ctx = engine.verify("raw-key", Utc::now()).await.unwrap();
        assert_eq!(ctx.entity_id, expected_entity);
        assert_eq!(ctx.scopes, vec!["query:*".to_string()]);
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let engine = engine_with(vec![], vec![]);
        assert!(engine.verify("nope", Utc::now()).await.is_none());
    }

    #[tokio::test]
    async fn revoked_key_is_rejected() {
        let agreement = active_agreement();
        let mut rec = record(Some(agreement.id));
        rec.revoked = true;
        let engine = engine_with(vec![(hash_key("raw-key"), rec)], vec![agreement]);

        assert!(engine.verify("raw-key", Utc::now()).await.is_none());
    }

    #[tokio::test]
    async fn expired_key_is_rejected() {
        let agreement = active_agreement();
        let mut rec = record(Some(agreement.id));
        rec.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        let engine = engine_with(vec![(hash_key("raw-key"), rec)], vec![agreement]);

        assert!(engine.verify("raw-key", Utc::now()).await.is_none());
    }

    #[tokio::test]
    async fn terminated_agreement_cascades_to_keys() {
        let mut agreement = active_agreement();
        agreement.status = AgreementStatus::Terminated;
        let rec = record(Some(agreement.id));
        let engine = engine_with(vec![(hash_key("raw-key"), rec)], vec![agreement]);

        assert!(engine.verify("raw-key", Utc::now()).await.is_none());
    }
}
