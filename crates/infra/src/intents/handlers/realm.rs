//! Realm provisioning.
//!
//! `realm:create` composes nested intents: register the realm operator and
//! the owning organization, propose the tenant license between them,
//! consent on the organization's behalf (activation fires the license hook
//! that creates the realm container), then issue the bootstrap API key.
//! Every event lands under one causation command id.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use covenant_core::RealmId;

use crate::intents::context::HandlerContext;
use crate::intents::dispatcher::IntentRequest;
use crate::intents::registry::{IntentCategory, IntentDefinition, IntentHandler, IntentRegistry};
use crate::intents::result::{Affordance, HandlerOutput, IntentError, IntentOutcome};
use crate::intents::schema::{FieldKind, PayloadSchema};

use super::require_str;

pub fn register(registry: &mut IntentRegistry) {
    registry.register(
        IntentDefinition::new(
            "realm:create",
            IntentCategory::Entity,
            "Provision a realm: operator, organization, license, container, api key",
            PayloadSchema::new().required("name", FieldKind::String),
            &["realm:create"],
            Arc::new(RealmCreate),
        )
        .example(json!({"name": "Acme"})),
    );
}

struct RealmCreate;

#[async_trait]
impl IntentHandler for RealmCreate {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let name = require_str(&request.payload, "name")?;
        let realm_id = RealmId::new();
        let mut output = HandlerOutput::default();

        // Realm operator: the system party that services this realm.
        let operator = ctx
            .dispatch_nested_ok(
                IntentRequest::new(
                    "register",
                    request.actor.clone(),
                    json!({"kind": "System", "name": format!("{name} Operator")}),
                )
                .in_realm(realm_id),
            )
            .await?;
        output.merge_events(&operator);
        let operator_id = operator.data["entity_id"].clone();

        // The organization that owns the realm.
        let organization = ctx
            .dispatch_nested_ok(
                IntentRequest::new(
                    "register",
                    request.actor.clone(),
                    json!({"kind": "Organization", "name": name}),
                )
                .in_realm(realm_id),
            )
            .await?;
        output.merge_events(&organization);
        let organization_id = organization.data["entity_id"].clone();

        // The tenant license: authority for everything inside the realm.
        let proposal = ctx
            .dispatch_nested_ok(
                IntentRequest::new(
                    "agreement:propose",
                    request.actor.clone(),
                    json!({
                        "agreement_type": "tenant-license",
                        "parties": [
                            {"entity_id": operator_id, "role": "licensor"},
                            {"entity_id": organization_id, "role": "licensee"},
                        ],
                        "terms": {"realm_name": name, "realm_id": realm_id},
                    }),
                )
                .in_realm(realm_id),
            )
            .await?;
        output.merge_events(&proposal);
        let agreement_id = proposal.data["agreement_id"].clone();

        // Licensee consent completes the quorum; activation runs the
        // tenant-license hook, which creates the realm container.
        let consent = ctx
            .dispatch_nested_ok(
                IntentRequest::new(
                    "agreement:consent",
                    ctx.system_actor.clone(),
                    json!({
                        "agreement_id": agreement_id,
                        "entity_id": organization_id,
                        "method": "Explicit",
                    }),
                )
                .in_realm(realm_id),
            )
            .await?;
        output.merge_events(&consent);

        // Bootstrap credential for the organization.
        let api_key = ctx
            .dispatch_nested_ok(
                IntentRequest::new(
                    "apikey:issue",
                    request.actor.clone(),
                    json!({
                        "entity_id": organization_id,
                        "realm_id": realm_id,
                        "scopes": ["*:*"],
                        "established_by": agreement_id,
                    }),
                )
                .in_realm(realm_id),
            )
            .await?;
        output.merge_events(&api_key);

        Ok(HandlerOutput {
            outcome: Some(IntentOutcome::Created),
            data: json!({
                "realm": {"id": realm_id, "name": name},
                "entity_id": organization_id,
                "agreement_id": agreement_id,
                "api_key": api_key.data["api_key"],
            }),
            affordances: vec![
                Affordance::new("register", "Register entities in the realm", &[]),
                Affordance::new("container:create", "Create containers", &["container:create"]),
                Affordance::new("realm:list", "List visible realms", &[]),
            ],
            ..output
        })
    }
}
