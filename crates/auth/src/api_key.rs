//! ApiKey aggregate (event-sourced).
//!
//! Only the hash of a key is ever recorded; the raw key is shown once at
//! issuance and never stored. A key's validity is subordinate to the
//! agreement that established it: terminating that agreement invalidates
//! the key at verification time without any revocation event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use covenant_agreements::AgreementId;
use covenant_core::{Aggregate, AggregateId, AggregateRoot, DomainError, EntityId, RealmId};
use covenant_events::Event;

// ─────────────────────────────────────────────────────────────────────────────
// ApiKey ID
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for an API key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKeyId(Uuid);

impl ApiKeyId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ApiKeyId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<AggregateId> for ApiKeyId {
    fn from(value: AggregateId) -> Self {
        Self(*value.as_uuid())
    }
}

impl From<ApiKeyId> for AggregateId {
    fn from(value: ApiKeyId) -> Self {
        AggregateId::from_uuid(value.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ApiKey aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// ApiKey aggregate.
///
/// # Invariants
/// - The key hash is immutable after creation.
/// - Revocation is terminal and idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub key_hash: String,
    pub entity_id: Option<EntityId>,
    pub realm_id: Option<RealmId>,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub established_by: Option<AgreementId>,
    pub revoked: bool,
    pub version: u64,
    pub created: bool,
}

impl ApiKey {
    pub fn empty(id: ApiKeyId) -> Self {
        Self {
            id,
            key_hash: String::new(),
            entity_id: None,
            realm_id: None,
            scopes: Vec::new(),
            expires_at: None,
            established_by: None,
            revoked: false,
            version: 0,
            created: false,
        }
    }
}

impl AggregateRoot for ApiKey {
    type Id = ApiKeyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands & events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueApiKey {
    pub api_key_id: ApiKeyId,
    pub key_hash: String,
    pub entity_id: EntityId,
    pub realm_id: RealmId,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub established_by: Option<AgreementId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeApiKey {
    pub api_key_id: ApiKeyId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiKeyCommand {
    Issue(IssueApiKey),
    Revoke(RevokeApiKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiKeyEvent {
    Created {
        api_key_id: ApiKeyId,
        key_hash: String,
        entity_id: EntityId,
        realm_id: RealmId,
        scopes: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
        established_by: Option<AgreementId>,
        occurred_at: DateTime<Utc>,
    },
    Revoked {
        api_key_id: ApiKeyId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for ApiKeyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ApiKeyEvent::Created { .. } => "api_key.created",
            ApiKeyEvent::Revoked { .. } => "api_key.revoked",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ApiKeyEvent::Created { occurred_at, .. }
            | ApiKeyEvent::Revoked { occurred_at, .. } => *occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for ApiKey {
    type Command = ApiKeyCommand;
    type Event = ApiKeyEvent;
    type Error = DomainError;

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ApiKeyCommand::Issue(cmd) => self.handle_issue(cmd),
            ApiKeyCommand::Revoke(cmd) => self.handle_revoke(cmd),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ApiKeyEvent::Created {
                api_key_id,
                key_hash,
                entity_id,
                realm_id,
                scopes,
                expires_at,
                established_by,
                ..
            } => {
                self.id = *api_key_id;
                self.key_hash = key_hash.clone();
                self.entity_id = Some(*entity_id);
                self.realm_id = Some(*realm_id);
                self.scopes = scopes.clone();
                self.expires_at = *expires_at;
                self.established_by = *established_by;
                self.created = true;
            }
            ApiKeyEvent::Revoked { .. } => {
                self.revoked = true;
            }
        }
        self.version += 1;
    }
}

impl ApiKey {
    fn handle_issue(&self, cmd: &IssueApiKey) -> Result<Vec<ApiKeyEvent>, DomainError> {
        if self.created {
            return Err(DomainError::already_exists("api key already issued"));
        }

        if cmd.key_hash.trim().is_empty() {
            return Err(DomainError::validation("key hash cannot be empty"));
        }

        Ok(vec![ApiKeyEvent::Created {
            api_key_id: cmd.api_key_id,
            key_hash: cmd.key_hash.clone(),
            entity_id: cmd.entity_id,
            realm_id: cmd.realm_id,
            scopes: cmd.scopes.clone(),
            expires_at: cmd.expires_at,
            established_by: cmd.established_by,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_revoke(&self, cmd: &RevokeApiKey) -> Result<Vec<ApiKeyEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }

        // Revoking twice is a no-op.
        if self.revoked {
            return Ok(vec![]);
        }

        Ok(vec![ApiKeyEvent::Revoked {
            api_key_id: cmd.api_key_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn issued_key() -> ApiKey {
        let id = ApiKeyId::new();
        let mut key = ApiKey::empty(id);
        let cmd = ApiKeyCommand::Issue(IssueApiKey {
            api_key_id: id,
            key_hash: "abc123".to_string(),
            entity_id: EntityId::new(),
            realm_id: RealmId::new(),
            scopes: vec!["query:*".to_string()],
            expires_at: None,
            established_by: Some(AgreementId::new()),
            occurred_at: now(),
        });
        for event in key.handle(&cmd).unwrap() {
            key.apply(&event);
        }
        key
    }

    #[test]
    fn issue_then_revoke() {
        let mut key = issued_key();
        assert!(!key.revoked);

        let cmd = ApiKeyCommand::Revoke(RevokeApiKey {
            api_key_id: key.id,
            reason: "rotated".to_string(),
            occurred_at: now(),
        });
        for event in key.handle(&cmd).unwrap() {
            key.apply(&event);
        }
        assert!(key.revoked);

        // Second revoke: no events.
        assert!(key.handle(&cmd).unwrap().is_empty());
    }

    #[test]
    fn issue_requires_a_hash() {
        let id = ApiKeyId::new();
        let key = ApiKey::empty(id);
        let cmd = ApiKeyCommand::Issue(IssueApiKey {
            api_key_id: id,
            key_hash: "  ".to_string(),
            entity_id: EntityId::new(),
            realm_id: RealmId::new(),
            scopes: vec![],
            expires_at: None,
            established_by: None,
            occurred_at: now(),
        });
        assert!(key.handle(&cmd).is_err());
    }
}
