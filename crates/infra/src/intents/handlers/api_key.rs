//! API key issuance and revocation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use covenant_agreements::AgreementId;
use covenant_auth::{hash_key, ApiKey, ApiKeyCommand, ApiKeyId, IssueApiKey, RevokeApiKey};
use covenant_core::{Aggregate, EntityId, RealmId};
use covenant_events::AggregateType;

use crate::intents::context::HandlerContext;
use crate::intents::dispatcher::IntentRequest;
use crate::intents::registry::{IntentCategory, IntentDefinition, IntentHandler, IntentRegistry};
use crate::intents::result::{ErrorCode, HandlerOutput, IntentError, IntentOutcome};
use crate::intents::schema::{FieldKind, PayloadSchema};

use super::{require_uuid, str_field, string_list, uuid_field};

pub fn register(registry: &mut IntentRegistry) {
    registry.register(
        IntentDefinition::new(
            "apikey:issue",
            IntentCategory::Meta,
            "Issue an API key for an entity (the raw key is returned once)",
            PayloadSchema::new()
                .required("entity_id", FieldKind::Uuid)
                .optional("realm_id", FieldKind::Uuid)
                .optional("scopes", FieldKind::Array)
                .optional("expires_at", FieldKind::String)
                .optional("established_by", FieldKind::Uuid)
                .optional("api_key_id", FieldKind::Uuid),
            &["apikey:issue"],
            Arc::new(Issue),
        )
        .example(json!({
            "entity_id": "0193e061-0000-7000-8000-000000000002",
            "scopes": ["query:*"],
        })),
    );

    registry.register(IntentDefinition::new(
        "apikey:revoke",
        IntentCategory::Meta,
        "Revoke an API key",
        PayloadSchema::new()
            .required("api_key_id", FieldKind::Uuid)
            .optional("reason", FieldKind::String),
        &["apikey:revoke"],
        Arc::new(Revoke),
    ));
}

struct Issue;

#[async_trait]
impl IntentHandler for Issue {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let api_key_id = uuid_field(payload, "api_key_id")?
            .map(ApiKeyId::from_uuid)
            .unwrap_or_default();

        if ctx.repository.api_key(api_key_id).await?.is_some() {
            return Err(IntentError::new(
                ErrorCode::AlreadyExists,
                "an api key with this id already exists",
            ));
        }

        let realm_id = uuid_field(payload, "realm_id")?
            .map(RealmId::from_uuid)
            .or(request.realm)
            .ok_or_else(|| {
                IntentError::validation("a realm is required to issue a key", Some("realm_id"))
            })?;

        let expires_at = match str_field(payload, "expires_at") {
            None => None,
            Some(s) => Some(s.parse::<DateTime<Utc>>().map_err(|e| {
                IntentError::validation(format!("expires_at: {e}"), Some("expires_at"))
            })?),
        };

        // Shown once in the response, stored only as a hash.
        let raw_key = format!("ck_{}", Uuid::now_v7().simple());

        let key = ApiKey::empty(api_key_id);
        let command = ApiKeyCommand::Issue(IssueApiKey {
            api_key_id,
            key_hash: hash_key(&raw_key),
            entity_id: EntityId::from_uuid(require_uuid(payload, "entity_id")?),
            realm_id,
            scopes: string_list(payload, "scopes"),
            expires_at,
            established_by: uuid_field(payload, "established_by")?.map(AgreementId::from_uuid),
            occurred_at: ctx.occurred_at(request),
        });

        let events = key.handle(&command).map_err(IntentError::from)?;
        let mut output = HandlerOutput::with_outcome(IntentOutcome::Created)
            .data(json!({ "api_key_id": api_key_id, "api_key": raw_key }));
        for event in &events {
            let recorded = ctx
                .append_typed(
                    AggregateType::ApiKey,
                    api_key_id.into(),
                    &request.actor,
                    event,
                )
                .await?;
            output.record(&recorded);
        }
        Ok(output)
    }
}

struct Revoke;

#[async_trait]
impl IntentHandler for Revoke {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let api_key_id = ApiKeyId::from_uuid(require_uuid(payload, "api_key_id")?);

        let key = ctx
            .repository
            .api_key(api_key_id)
            .await?
            .ok_or_else(|| IntentError::new(ErrorCode::NotFound, "api key not found"))?;

        let command = ApiKeyCommand::Revoke(RevokeApiKey {
            api_key_id,
            reason: str_field(payload, "reason").unwrap_or("revoked").to_string(),
            occurred_at: ctx.occurred_at(request),
        });
        let events = key.handle(&command).map_err(IntentError::from)?;

        if events.is_empty() {
            return Ok(HandlerOutput::with_outcome(IntentOutcome::Nothing)
                .data(json!({ "api_key_id": api_key_id })));
        }

        let mut output = HandlerOutput::with_outcome(IntentOutcome::Transitioned)
            .data(json!({ "api_key_id": api_key_id, "revoked": true }));
        for event in &events {
            let recorded = ctx
                .append_typed(
                    AggregateType::ApiKey,
                    api_key_id.into(),
                    &request.actor,
                    event,
                )
                .await?;
            output.record(&recorded);
        }
        Ok(output)
    }
}
