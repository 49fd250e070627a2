//! Query intents.
//!
//! Queries serve from projections when the projection has caught up to the
//! log head, and fall back to a log scan otherwise. Reads are correct the
//! moment an append returns, projection timing aside.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};

use covenant_containers::ContainerEvent;
use covenant_core::RealmId;
use covenant_events::AggregateType;
use covenant_parties::{PartyId, PartyKind};

use crate::intents::context::HandlerContext;
use crate::intents::dispatcher::IntentRequest;
use crate::intents::registry::{IntentCategory, IntentDefinition, IntentHandler, IntentRegistry};
use crate::intents::result::{ErrorCode, HandlerOutput, IntentError, IntentOutcome};
use crate::intents::schema::{FieldKind, PayloadSchema};

use super::{require_uuid, str_field};

pub fn register(registry: &mut IntentRegistry) {
    registry.register(IntentDefinition::new(
        "realm:list",
        IntentCategory::Query,
        "List realms",
        PayloadSchema::any(),
        &[],
        Arc::new(RealmList),
    ));

    registry.register(IntentDefinition::new(
        "entity:get",
        IntentCategory::Query,
        "Fetch an entity, optionally as of a past moment",
        PayloadSchema::new()
            .required("entity_id", FieldKind::Uuid)
            .optional("as_of", FieldKind::String),
        &[],
        Arc::new(EntityGet),
    ));

    registry.register(IntentDefinition::new(
        "intent:list",
        IntentCategory::Meta,
        "List the intent catalog",
        PayloadSchema::any(),
        &[],
        Arc::new(IntentList),
    ));
}

struct RealmList;

#[async_trait]
impl IntentHandler for RealmList {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        _request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let head = ctx.store.current_sequence().await?;
        let model = &ctx.read_models.realms;

        let realms: Vec<JsonValue> = if model.last_sequence() >= head {
            model
                .list()
                .into_iter()
                .map(|r| {
                    json!({
                        "id": r.realm_id,
                        "name": r.name,
                        "container_id": r.container_id,
                        "owner_id": r.owner_id,
                        "created_at": r.created_at,
                    })
                })
                .collect()
        } else {
            // Projection behind the head: the log is the source of truth.
            let mut realms = Vec::new();
            for event in ctx.store.events_from(1, None).await? {
                if event.aggregate_type != AggregateType::Container
                    || event.event_type != "container.created"
                {
                    continue;
                }
                if let Ok(ContainerEvent::Created {
                    container_id,
                    realm_id,
                    name,
                    container_type,
                    owner_id,
                    occurred_at,
                    ..
                }) = event.typed::<ContainerEvent>()
                {
                    if container_type == "Realm" {
                        let realm_id = realm_id
                            .unwrap_or_else(|| RealmId::from_uuid(*container_id.as_uuid()));
                        realms.push(json!({
                            "id": realm_id,
                            "name": name,
                            "container_id": container_id,
                            "owner_id": owner_id,
                            "created_at": occurred_at,
                        }));
                    }
                }
            }
            realms
        };

        Ok(HandlerOutput::with_outcome(IntentOutcome::Queried)
            .data(json!({ "realms": realms })))
    }
}

struct EntityGet;

#[async_trait]
impl IntentHandler for EntityGet {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let party_id = PartyId::from_uuid(require_uuid(payload, "entity_id")?);

        let party = match str_field(payload, "as_of") {
            None => ctx.repository.party(party_id).await?,
            Some(s) => {
                let at = s.parse::<DateTime<Utc>>().map_err(|e| {
                    IntentError::validation(format!("as_of: {e}"), Some("as_of"))
                })?;
                ctx.repository.party_as_of(party_id, at).await?
            }
        };

        let party = party
            .ok_or_else(|| IntentError::new(ErrorCode::NotFound, "entity not found"))?;

        let kind = match party.kind {
            PartyKind::Person => "Person",
            PartyKind::Organization => "Organization",
            PartyKind::Agent => "Agent",
            PartyKind::System => "System",
        };

        Ok(HandlerOutput::with_outcome(IntentOutcome::Queried).data(json!({
            "entity_id": party.id,
            "kind": kind,
            "name": party.identity.name,
            "identifiers": party.identity.identifiers,
            "contacts": party.identity.contacts,
            "realm_id": party.realm_id,
            "autonomy": party.autonomy,
            "guardian": party.guardian,
            "created_at": party.created_at,
            "version": party.version,
        })))
    }
}

struct IntentList;

#[async_trait]
impl IntentHandler for IntentList {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        _request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let intents: Vec<JsonValue> = ctx
            .intent_catalog
            .definitions()
            .into_iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "description": d.description,
                    "required_permissions": d.required_permissions,
                    "examples": d.examples,
                })
            })
            .collect();

        Ok(HandlerOutput::with_outcome(IntentOutcome::Queried)
            .data(json!({ "intents": intents })))
    }
}
