//! Container intents, delegating physics to the container manager.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use covenant_agreements::AgreementId;
use covenant_containers::{
    ContainerId, ContainerItem, ContainerPhysics, CreateContainer, Deposit, ItemKind, Withdraw,
};
use covenant_core::{EntityId, RealmId};

use crate::container_manager::ContainerManager;
use crate::intents::context::HandlerContext;
use crate::intents::dispatcher::IntentRequest;
use crate::intents::registry::{IntentCategory, IntentDefinition, IntentHandler, IntentRegistry};
use crate::intents::result::{HandlerOutput, IntentError, IntentOutcome};
use crate::intents::schema::{FieldKind, PayloadSchema};

use super::{require_str, require_uuid, u64_field, uuid_field};

pub fn register(registry: &mut IntentRegistry) {
    registry.register(
        IntentDefinition::new(
            "container:create",
            IntentCategory::Asset,
            "Create a container (wallet, workspace, realm)",
            PayloadSchema::new()
                .required("name", FieldKind::String)
                .required("container_type", FieldKind::String)
                .optional("container_id", FieldKind::Uuid)
                .optional("realm_id", FieldKind::Uuid)
                .optional("physics", FieldKind::Object)
                .optional("governance_agreement_id", FieldKind::Uuid)
                .optional("owner_id", FieldKind::Uuid)
                .optional("parent_container_id", FieldKind::Uuid),
            &["container:create"],
            Arc::new(Create),
        )
        .example(json!({"name": "treasury", "container_type": "Wallet"})),
    );

    registry.register(IntentDefinition::new(
        "container:deposit",
        IntentCategory::Asset,
        "Deposit an item into a container",
        PayloadSchema::new()
            .required("container_id", FieldKind::Uuid)
            .required("item_id", FieldKind::String)
            .required("item", FieldKind::Object)
            .optional("governing_agreement_id", FieldKind::Uuid),
        &["container:deposit"],
        Arc::new(DepositIntent),
    ));

    registry.register(IntentDefinition::new(
        "container:withdraw",
        IntentCategory::Asset,
        "Withdraw an item from a container",
        PayloadSchema::new()
            .required("container_id", FieldKind::Uuid)
            .required("item_id", FieldKind::String)
            .optional("quantity", FieldKind::Number)
            .optional("governing_agreement_id", FieldKind::Uuid),
        &["container:withdraw"],
        Arc::new(WithdrawIntent),
    ));

    registry.register(IntentDefinition::new(
        "container:transfer",
        IntentCategory::Asset,
        "Move or copy an item between containers",
        PayloadSchema::new()
            .required("source_id", FieldKind::Uuid)
            .required("destination_id", FieldKind::Uuid)
            .required("item_id", FieldKind::String)
            .optional("quantity", FieldKind::Number)
            .optional("governing_agreement_id", FieldKind::Uuid),
        &["container:transfer"],
        Arc::new(TransferIntent),
    ));
}

fn parse_item(payload: &JsonValue) -> Result<ContainerItem, IntentError> {
    let item = payload
        .get("item")
        .ok_or_else(|| IntentError::validation("missing field 'item'", Some("item")))?;

    let kind = match item.get("kind").and_then(JsonValue::as_str) {
        Some("Value") => ItemKind::Value,
        Some("Object") => ItemKind::Object,
        Some("Subject") => ItemKind::Subject,
        Some("Link") => ItemKind::Link,
        Some(other) => {
            return Err(IntentError::validation(
                format!("unknown item kind '{other}'"),
                Some("item"),
            ));
        }
        None => {
            return Err(IntentError::validation(
                "item.kind is required",
                Some("item"),
            ));
        }
    };

    Ok(ContainerItem {
        kind,
        quantity: u64_field(item, "quantity")?,
        metadata: item.get("metadata").cloned().unwrap_or(JsonValue::Null),
    })
}

/// Physics from the payload, or sensible defaults by container type.
fn parse_physics(payload: &JsonValue, container_type: &str) -> Result<ContainerPhysics, IntentError> {
    match payload.get("physics") {
        Some(physics) => serde_json::from_value(physics.clone())
            .map_err(|e| IntentError::validation(format!("physics: {e}"), Some("physics"))),
        None => Ok(match container_type {
            "Realm" => ContainerPhysics::realm(),
            "Wallet" => ContainerPhysics::wallet(),
            _ => ContainerPhysics::workspace(),
        }),
    }
}

struct Create;

#[async_trait]
impl IntentHandler for Create {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let container_type = require_str(payload, "container_type")?;
        let container_id = uuid_field(payload, "container_id")?
            .map(ContainerId::from_uuid)
            .unwrap_or_default();

        let command = CreateContainer {
            container_id,
            realm_id: uuid_field(payload, "realm_id")?
                .map(RealmId::from_uuid)
                .or(request.realm),
            name: require_str(payload, "name")?.to_string(),
            container_type: container_type.to_string(),
            physics: parse_physics(payload, container_type)?,
            governance_agreement_id: uuid_field(payload, "governance_agreement_id")?
                .map(AgreementId::from_uuid),
            owner_id: uuid_field(payload, "owner_id")?.map(EntityId::from_uuid),
            parent_container_id: uuid_field(payload, "parent_container_id")?
                .map(ContainerId::from_uuid),
            occurred_at: ctx.occurred_at(request),
        };

        let events = ContainerManager::create(ctx, &request.actor, command).await?;

        Ok(HandlerOutput {
            outcome: Some(IntentOutcome::Created),
            data: json!({ "container_id": container_id }),
            events,
            affordances: Vec::new(),
        })
    }
}

struct DepositIntent;

#[async_trait]
impl IntentHandler for DepositIntent {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let command = Deposit {
            container_id: ContainerId::from_uuid(require_uuid(payload, "container_id")?),
            item_id: require_str(payload, "item_id")?.to_string(),
            item: parse_item(payload)?,
            governing_agreement_id: uuid_field(payload, "governing_agreement_id")?
                .map(AgreementId::from_uuid),
            occurred_at: ctx.occurred_at(request),
        };
        let container_id = command.container_id;

        let events = ContainerManager::deposit(ctx, &request.actor, command).await?;

        Ok(HandlerOutput {
            outcome: Some(IntentOutcome::Updated),
            data: json!({ "container_id": container_id }),
            events,
            affordances: Vec::new(),
        })
    }
}

struct WithdrawIntent;

#[async_trait]
impl IntentHandler for WithdrawIntent {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let command = Withdraw {
            container_id: ContainerId::from_uuid(require_uuid(payload, "container_id")?),
            item_id: require_str(payload, "item_id")?.to_string(),
            quantity: u64_field(payload, "quantity")?,
            governing_agreement_id: uuid_field(payload, "governing_agreement_id")?
                .map(AgreementId::from_uuid),
            occurred_at: ctx.occurred_at(request),
        };
        let container_id = command.container_id;

        let events = ContainerManager::withdraw(ctx, &request.actor, command).await?;

        Ok(HandlerOutput {
            outcome: Some(IntentOutcome::Updated),
            data: json!({ "container_id": container_id }),
            events,
            affordances: Vec::new(),
        })
    }
}

struct TransferIntent;

#[async_trait]
impl IntentHandler for TransferIntent {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let source_id = ContainerId::from_uuid(require_uuid(payload, "source_id")?);
        let destination_id = ContainerId::from_uuid(require_uuid(payload, "destination_id")?);
        let item_id = require_str(payload, "item_id")?;

        let outcome = ContainerManager::transfer(
            ctx,
            &request.actor,
            source_id,
            destination_id,
            item_id,
            u64_field(payload, "quantity")?,
            uuid_field(payload, "governing_agreement_id")?.map(AgreementId::from_uuid),
        )
        .await?;

        Ok(HandlerOutput {
            outcome: Some(IntentOutcome::Transferred),
            data: json!({
                "source_id": source_id,
                "destination_id": destination_id,
                "mode": format!("{:?}", outcome.mode),
            }),
            events: outcome.events,
            affordances: Vec::new(),
        })
    }
}
