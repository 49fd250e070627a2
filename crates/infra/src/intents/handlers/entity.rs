//! Entity registration.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use covenant_core::{Aggregate, RealmId};
use covenant_events::AggregateType;
use covenant_parties::{
    CreateParty, Identity, Party, PartyCommand, PartyId, PartyKind, UpdateIdentity,
};

use crate::intents::context::HandlerContext;
use crate::intents::dispatcher::IntentRequest;
use crate::intents::registry::{IntentCategory, IntentDefinition, IntentHandler, IntentRegistry};
use crate::intents::result::{ErrorCode, HandlerOutput, IntentError, IntentOutcome};
use crate::intents::schema::{FieldKind, PayloadSchema};

use super::{require_str, require_uuid, string_list, uuid_field};

pub fn register(registry: &mut IntentRegistry) {
    registry.register(
        IntentDefinition::new(
            "register",
            IntentCategory::Entity,
            "Register a person, organization, agent or system party",
            PayloadSchema::new()
                .required("kind", FieldKind::String)
                .required("name", FieldKind::String)
                .optional("entity_id", FieldKind::Uuid)
                .optional("realm_id", FieldKind::Uuid)
                .optional("identifiers", FieldKind::Array)
                .optional("contacts", FieldKind::Array),
            &[],
            Arc::new(RegisterEntity),
        )
        .example(json!({"kind": "Person", "name": "Ada Lovelace"})),
    );

    registry.register(IntentDefinition::new(
        "entity:update",
        IntentCategory::Entity,
        "Update an entity's identity",
        PayloadSchema::new()
            .required("entity_id", FieldKind::Uuid)
            .required("name", FieldKind::String)
            .optional("identifiers", FieldKind::Array)
            .optional("contacts", FieldKind::Array),
        &["entity:update"],
        Arc::new(UpdateEntity),
    ));
}

fn parse_kind(kind: &str) -> Result<PartyKind, IntentError> {
    match kind {
        "Person" => Ok(PartyKind::Person),
        "Organization" => Ok(PartyKind::Organization),
        "Agent" => Ok(PartyKind::Agent),
        "System" => Ok(PartyKind::System),
        other => Err(IntentError::validation(
            format!("unknown party kind '{other}'"),
            Some("kind"),
        )),
    }
}

struct RegisterEntity;

#[async_trait]
impl IntentHandler for RegisterEntity {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let kind = parse_kind(require_str(payload, "kind")?)?;
        let name = require_str(payload, "name")?;

        let party_id = uuid_field(payload, "entity_id")?
            .map(PartyId::from_uuid)
            .unwrap_or_default();
        let realm_id = uuid_field(payload, "realm_id")?
            .map(RealmId::from_uuid)
            .or(request.realm);

        if ctx.repository.party(party_id).await?.is_some() {
            return Err(IntentError::new(
                ErrorCode::AlreadyExists,
                "an entity with this id is already registered",
            ));
        }

        let party = Party::empty(party_id);
        let command = PartyCommand::Create(CreateParty {
            party_id,
            kind,
            identity: Identity {
                name: name.to_string(),
                identifiers: string_list(payload, "identifiers"),
                contacts: string_list(payload, "contacts"),
            },
            realm_id,
            occurred_at: ctx.occurred_at(request),
        });

        let events = party.handle(&command).map_err(IntentError::from)?;

        let mut output = HandlerOutput::with_outcome(IntentOutcome::Created)
            .data(json!({ "entity_id": party_id }));
        for event in &events {
            let recorded = ctx
                .append_typed(AggregateType::Party, party_id.into(), &request.actor, event)
                .await?;
            output.record(&recorded);
        }

        Ok(output)
    }
}

struct UpdateEntity;

#[async_trait]
impl IntentHandler for UpdateEntity {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let party_id = PartyId::from_uuid(require_uuid(payload, "entity_id")?);

        let party = ctx
            .repository
            .party(party_id)
            .await?
            .ok_or_else(|| IntentError::new(ErrorCode::NotFound, "entity not found"))?;

        let command = PartyCommand::UpdateIdentity(UpdateIdentity {
            party_id,
            identity: Identity {
                name: require_str(payload, "name")?.to_string(),
                identifiers: string_list(payload, "identifiers"),
                contacts: string_list(payload, "contacts"),
            },
            occurred_at: ctx.occurred_at(request),
        });

        let events = party.handle(&command).map_err(IntentError::from)?;
        let mut output = HandlerOutput::with_outcome(IntentOutcome::Updated)
            .data(json!({ "entity_id": party_id }));
        for event in &events {
            let recorded = ctx
                .append_typed(AggregateType::Party, party_id.into(), &request.actor, event)
                .await?;
            output.record(&recorded);
        }
        Ok(output)
    }
}
