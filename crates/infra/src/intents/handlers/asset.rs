//! Asset lifecycle intents.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use covenant_agreements::AgreementId;
use covenant_assets::{
    Asset, AssetCommand, AssetId, AssetStatus, RegisterAsset, RetireAsset, TransferOwnership,
};
use covenant_core::{Aggregate, EntityId};
use covenant_events::AggregateType;

use crate::intents::context::HandlerContext;
use crate::intents::dispatcher::IntentRequest;
use crate::intents::registry::{IntentCategory, IntentDefinition, IntentHandler, IntentRegistry};
use crate::intents::result::{ErrorCode, HandlerOutput, IntentError, IntentOutcome};
use crate::intents::schema::{FieldKind, PayloadSchema};

use super::{require_str, require_uuid, str_field, u64_field, uuid_field};

pub fn register(registry: &mut IntentRegistry) {
    registry.register(
        IntentDefinition::new(
            "asset:register",
            IntentCategory::Asset,
            "Register an asset",
            PayloadSchema::new()
                .required("asset_type", FieldKind::String)
                .optional("asset_id", FieldKind::Uuid)
                .optional("owner_id", FieldKind::Uuid)
                .optional("properties", FieldKind::Object)
                .optional("quantity", FieldKind::Number)
                .optional("established_by", FieldKind::Uuid),
            &["asset:register"],
            Arc::new(Register),
        )
        .example(json!({"asset_type": "credits", "quantity": 1000})),
    );

    registry.register(IntentDefinition::new(
        "asset:transfer",
        IntentCategory::Asset,
        "Transfer an asset's ownership",
        PayloadSchema::new()
            .required("asset_id", FieldKind::Uuid)
            .required("new_owner", FieldKind::Uuid),
        &["asset:transfer"],
        Arc::new(Transfer),
    ));

    registry.register(IntentDefinition::new(
        "asset:retire",
        IntentCategory::Asset,
        "Retire an asset from circulation",
        PayloadSchema::new()
            .required("asset_id", FieldKind::Uuid)
            .optional("reason", FieldKind::String),
        &["asset:retire"],
        Arc::new(Retire),
    ));
}

struct Register;

#[async_trait]
impl IntentHandler for Register {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let asset_id = uuid_field(payload, "asset_id")?
            .map(AssetId::from_uuid)
            .unwrap_or_default();

        if ctx.repository.asset(asset_id).await?.is_some() {
            return Err(IntentError::new(
                ErrorCode::AlreadyExists,
                "an asset with this id is already registered",
            ));
        }

        let asset = Asset::empty(asset_id);
        let command = AssetCommand::Register(RegisterAsset {
            asset_id,
            asset_type: require_str(payload, "asset_type")?.to_string(),
            owner_id: uuid_field(payload, "owner_id")?.map(EntityId::from_uuid),
            properties: payload.get("properties").cloned().unwrap_or(json!({})),
            quantity: u64_field(payload, "quantity")?,
            established_by: uuid_field(payload, "established_by")?.map(AgreementId::from_uuid),
            occurred_at: ctx.occurred_at(request),
        });

        let events = asset.handle(&command).map_err(IntentError::from)?;
        let mut output = HandlerOutput::with_outcome(IntentOutcome::Created)
            .data(json!({ "asset_id": asset_id }));
        for event in &events {
            let recorded = ctx
                .append_typed(AggregateType::Asset, asset_id.into(), &request.actor, event)
                .await?;
            output.record(&recorded);
        }
        Ok(output)
    }
}

struct Transfer;

#[async_trait]
impl IntentHandler for Transfer {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let asset_id = AssetId::from_uuid(require_uuid(payload, "asset_id")?);
        let new_owner = EntityId::from_uuid(require_uuid(payload, "new_owner")?);

        let asset = ctx
            .repository
            .asset(asset_id)
            .await?
            .ok_or_else(|| IntentError::new(ErrorCode::NotFound, "asset not found"))?;

        let state = match asset.status {
            AssetStatus::Registered => "Registered",
            AssetStatus::Retired => "Retired",
        };
        ctx.workflow.validate("asset", state, "transfer")?;

        let command = AssetCommand::TransferOwnership(TransferOwnership {
            asset_id,
            new_owner,
            occurred_at: ctx.occurred_at(request),
        });
        let events = asset.handle(&command).map_err(IntentError::from)?;

        let mut output = HandlerOutput::with_outcome(IntentOutcome::Transferred)
            .data(json!({ "asset_id": asset_id, "new_owner": new_owner }));
        for event in &events {
            let recorded = ctx
                .append_typed(AggregateType::Asset, asset_id.into(), &request.actor, event)
                .await?;
            output.record(&recorded);
        }
        Ok(output)
    }
}

struct Retire;

#[async_trait]
impl IntentHandler for Retire {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let asset_id = AssetId::from_uuid(require_uuid(payload, "asset_id")?);

        let asset = ctx
            .repository
            .asset(asset_id)
            .await?
            .ok_or_else(|| IntentError::new(ErrorCode::NotFound, "asset not found"))?;

        let command = AssetCommand::Retire(RetireAsset {
            asset_id,
            reason: str_field(payload, "reason").unwrap_or("retired").to_string(),
            occurred_at: ctx.occurred_at(request),
        });
        let events = asset.handle(&command).map_err(IntentError::from)?;

        if events.is_empty() {
            return Ok(HandlerOutput::with_outcome(IntentOutcome::Nothing)
                .data(json!({ "asset_id": asset_id })));
        }

        let mut output = HandlerOutput::with_outcome(IntentOutcome::Transitioned)
            .data(json!({ "asset_id": asset_id, "status": "Retired" }));
        for event in &events {
            let recorded = ctx
                .append_typed(AggregateType::Asset, asset_id.into(), &request.actor, event)
                .await?;
            output.record(&recorded);
        }
        Ok(output)
    }
}
