//! Agreement lifecycle intents.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};

use covenant_agreements::{
    Agreement, AgreementCommand, AgreementEvent, AgreementId, AgreementStatus, Consent,
    ConsentMethod, DisputeResolution, OpenDispute, PartyRef, ProposeAgreement, RecordConsent,
    RejectProposal, ResolveDispute, Terminate, Validity,
};
use covenant_core::{Actor, Aggregate, AggregateId, EntityId};
use covenant_events::AggregateType;

use crate::hooks::{AgreementTransition, HookProcessor};
use crate::intents::context::HandlerContext;
use crate::intents::dispatcher::IntentRequest;
use crate::intents::registry::{IntentCategory, IntentDefinition, IntentHandler, IntentRegistry};
use crate::intents::result::{ErrorCode, HandlerOutput, IntentError, IntentOutcome};
use crate::intents::schema::{FieldKind, PayloadSchema};

use super::{require_str, require_uuid, str_field, uuid_field};

pub fn register(registry: &mut IntentRegistry) {
    registry.register(
        IntentDefinition::new(
            "agreement:propose",
            IntentCategory::Agreement,
            "Propose an agreement between parties",
            PayloadSchema::new()
                .required("agreement_type", FieldKind::String)
                .required("parties", FieldKind::Array)
                .optional("agreement_id", FieldKind::Uuid)
                .optional("terms", FieldKind::Object)
                .optional("validity", FieldKind::Object)
                .optional("assets", FieldKind::Array)
                .optional("parent_agreement_id", FieldKind::Uuid),
            &["agreement:propose"],
            Arc::new(Propose),
        )
        .example(json!({
            "agreement_type": "employment",
            "parties": [
                {"entity_id": "0193e061-0000-7000-8000-000000000001", "role": "employer"},
                {"entity_id": "0193e061-0000-7000-8000-000000000002", "role": "employee"},
            ],
            "terms": {"position": "engineer"},
        })),
    );

    registry.register(IntentDefinition::new(
        "agreement:consent",
        IntentCategory::Agreement,
        "Record a party's consent to a proposal",
        PayloadSchema::new()
            .required("agreement_id", FieldKind::Uuid)
            .optional("entity_id", FieldKind::Uuid)
            .optional("method", FieldKind::String),
        &[],
        Arc::new(ConsentIntent),
    ));

    registry.register(IntentDefinition::new(
        "agreement:reject",
        IntentCategory::Agreement,
        "Reject a proposal",
        PayloadSchema::new()
            .required("agreement_id", FieldKind::Uuid)
            .optional("reason", FieldKind::String),
        &[],
        Arc::new(Reject),
    ));

    registry.register(IntentDefinition::new(
        "agreement:terminate",
        IntentCategory::Agreement,
        "Terminate an active agreement",
        PayloadSchema::new()
            .required("agreement_id", FieldKind::Uuid)
            .optional("reason", FieldKind::String),
        &["agreement:terminate"],
        Arc::new(TerminateIntent),
    ));

    registry.register(IntentDefinition::new(
        "dispute:open",
        IntentCategory::Workflow,
        "Open a dispute on an active agreement",
        PayloadSchema::new()
            .required("agreement_id", FieldKind::Uuid)
            .required("reason", FieldKind::String),
        &[],
        Arc::new(DisputeOpen),
    ));

    registry.register(IntentDefinition::new(
        "dispute:resolve",
        IntentCategory::Workflow,
        "Resolve an open dispute",
        PayloadSchema::new()
            .required("agreement_id", FieldKind::Uuid)
            .required("resolution", FieldKind::String),
        &[],
        Arc::new(DisputeResolve),
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared plumbing
// ─────────────────────────────────────────────────────────────────────────────

fn agreement_status_name(status: AgreementStatus) -> &'static str {
    match status {
        AgreementStatus::Proposed => "Proposed",
        AgreementStatus::Active => "Active",
        AgreementStatus::Terminated => "Terminated",
        AgreementStatus::Disputed => "Disputed",
        AgreementStatus::Resolved => "Resolved",
    }
}

/// The entity a lifecycle intent acts for: the actor itself, or an explicit
/// `entity_id` when a System actor acts on a party's behalf (hooks,
/// bootstrap).
fn acting_entity(actor: &Actor, payload: &JsonValue) -> Result<EntityId, IntentError> {
    if let Some(entity_id) = actor.entity_id() {
        return Ok(entity_id);
    }
    if actor.is_system() {
        if let Some(id) = uuid_field(payload, "entity_id")? {
            return Ok(EntityId::from_uuid(id));
        }
    }
    Err(IntentError::new(
        ErrorCode::Forbidden,
        "this intent requires an acting entity",
    ))
}

async fn load_agreement(
    ctx: &HandlerContext,
    id: AgreementId,
) -> Result<Agreement, IntentError> {
    ctx.repository
        .agreement(id)
        .await?
        .ok_or_else(|| IntentError::new(ErrorCode::NotFound, "agreement not found"))
}

/// Append agreement events, then run lifecycle hooks for any transition
/// they caused. Returns the full event list for the result.
async fn append_and_hook(
    ctx: &HandlerContext,
    actor: &Actor,
    agreement_id: AgreementId,
    events: Vec<AgreementEvent>,
) -> Result<(HandlerOutput, Vec<AgreementTransition>), IntentError> {
    let aggregate_id: AggregateId = agreement_id.into();
    let mut output = HandlerOutput::default();
    let mut transitions = Vec::new();

    for event in &events {
        let recorded = ctx
            .append_typed(AggregateType::Agreement, aggregate_id, actor, event)
            .await?;
        output.record(&recorded);

        match event {
            AgreementEvent::Proposed { .. } => transitions.push(AgreementTransition::Proposed),
            AgreementEvent::Activated { .. } => transitions.push(AgreementTransition::Activated),
            AgreementEvent::Rejected { .. } | AgreementEvent::Terminated { .. } => {
                transitions.push(AgreementTransition::Terminated)
            }
            AgreementEvent::DisputeResolved { resolution, .. } => {
                if resolution.resulting_status().is_terminal() {
                    transitions.push(AgreementTransition::Terminated);
                }
            }
            _ => {}
        }
    }

    // Hooks see the post-fold state and emit under the same causation.
    if !transitions.is_empty() {
        let folded = load_agreement(ctx, agreement_id).await?;
        for transition in &transitions {
            let hook_events = HookProcessor::process(ctx, &folded, *transition).await?;
            output.events.extend(hook_events);
        }
    }

    Ok((output, transitions))
}

fn parse_validity(payload: &JsonValue) -> Result<Validity, IntentError> {
    let Some(validity) = payload.get("validity") else {
        return Ok(Validity::default());
    };
    let parse = |name: &'static str| -> Result<Option<DateTime<Utc>>, IntentError> {
        match validity.get(name).and_then(JsonValue::as_str) {
            None => Ok(None),
            Some(s) => s
                .parse::<DateTime<Utc>>()
                .map(Some)
                .map_err(|e| IntentError::validation(format!("validity.{name}: {e}"), Some(name))),
        }
    };
    Ok(Validity {
        effective_from: parse("effective_from")?,
        effective_until: parse("effective_until")?,
    })
}

fn parse_consent_method(value: Option<&str>) -> Result<ConsentMethod, IntentError> {
    match value {
        None | Some("Explicit") => Ok(ConsentMethod::Explicit),
        Some("Implicit") => Ok(ConsentMethod::Implicit),
        Some("Signature") => Ok(ConsentMethod::Signature),
        Some(other) => Err(IntentError::validation(
            format!("unknown consent method '{other}'"),
            Some("method"),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// agreement:propose
// ─────────────────────────────────────────────────────────────────────────────

struct Propose;

#[async_trait]
impl IntentHandler for Propose {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let occurred_at = ctx.occurred_at(request);

        let type_name = require_str(payload, "agreement_type")?;
        let definition = ctx.agreement_types.get(type_name).ok_or_else(|| {
            IntentError::validation(
                format!("unknown agreement type '{type_name}'"),
                Some("agreement_type"),
            )
        })?;

        let terms = payload.get("terms").cloned().unwrap_or(json!({}));
        (definition.validate_terms)(&terms)
            .map_err(|e| IntentError::validation(e, Some("terms")))?;

        let raw_parties = payload
            .get("parties")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| IntentError::validation("parties must be an array", Some("parties")))?;

        let mut parties = Vec::with_capacity(raw_parties.len());
        for entry in raw_parties {
            let entity_id = EntityId::from_uuid(require_uuid(entry, "entity_id")?);
            let role = require_str(entry, "role")?;
            let role_spec = definition.role(role).ok_or_else(|| {
                IntentError::validation(
                    format!("agreement type '{type_name}' has no role '{role}'"),
                    Some("parties"),
                )
            })?;

            let mut party = PartyRef::new(entity_id, role);
            // Implicit-consent roles consent by the act of proposing, when
            // the proposal comes from that entity or from the system.
            let proposer = request.actor.entity_id() == Some(entity_id)
                || request.actor.is_system();
            if proposer && role_spec.consent_method == ConsentMethod::Implicit {
                party.consents.push(Consent {
                    method: ConsentMethod::Implicit,
                    consented_at: occurred_at,
                });
            }
            parties.push(party);
        }

        // Non-system proposers must be among the parties they bind.
        if let Some(actor_entity) = request.actor.entity_id() {
            if !parties.iter().any(|p| p.entity_id == actor_entity) {
                return Err(IntentError::new(
                    ErrorCode::Forbidden,
                    "the proposer must be a party to the agreement",
                ));
            }
        }

        let agreement_id = uuid_field(payload, "agreement_id")?
            .map(AgreementId::from_uuid)
            .unwrap_or_default();

        let assets = payload
            .get("assets")
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .filter_map(|s| s.parse().ok())
                    .map(AggregateId::from_uuid)
                    .collect()
            })
            .unwrap_or_default();

        let agreement = ctx
            .repository
            .agreement(agreement_id)
            .await?
            .unwrap_or_else(|| Agreement::empty(agreement_id));

        let command = AgreementCommand::Propose(ProposeAgreement {
            agreement_id,
            agreement_type: type_name.to_string(),
            parties,
            terms,
            assets,
            validity: parse_validity(payload)?,
            realm_id: request.realm,
            parent_agreement_id: uuid_field(payload, "parent_agreement_id")?
                .map(AgreementId::from_uuid),
            quorum: definition.quorum,
            occurred_at,
        });

        let events = agreement.handle(&command).map_err(IntentError::from)?;

        let (output, _) = match append_and_hook(ctx, &request.actor, agreement_id, events).await {
            Ok(done) => done,
            // A collision on a brand-new agreement id is a real conflict the
            // caller must see and retry; re-running the handler would turn
            // it into a spurious re-proposal.
            Err(e) if e.is_concurrency() => {
                return Err(IntentError {
                    retryable: false,
                    ..e
                });
            }
            Err(e) => return Err(e),
        };

        Ok(HandlerOutput {
            outcome: Some(IntentOutcome::Created),
            data: json!({ "agreement_id": agreement_id }),
            ..output
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// agreement:consent
// ─────────────────────────────────────────────────────────────────────────────

struct ConsentIntent;

#[async_trait]
impl IntentHandler for ConsentIntent {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let agreement_id = AgreementId::from_uuid(require_uuid(payload, "agreement_id")?);
        let entity_id = acting_entity(&request.actor, payload)?;
        let method = parse_consent_method(str_field(payload, "method"))?;

        let agreement = load_agreement(ctx, agreement_id).await?;

        let command = AgreementCommand::Consent(RecordConsent {
            agreement_id,
            entity_id,
            method,
            occurred_at: ctx.occurred_at(request),
        });
        let events = agreement.handle(&command).map_err(IntentError::from)?;

        // Defense in depth: an activation must also be legal in the
        // declared workflow machine.
        if events
            .iter()
            .any(|e| matches!(e, AgreementEvent::Activated { .. }))
        {
            ctx.workflow.validate(
                "agreement",
                agreement_status_name(agreement.status),
                "consent_complete",
            )?;
        }

        let (output, _) = append_and_hook(ctx, &request.actor, agreement_id, events).await?;

        Ok(HandlerOutput {
            outcome: Some(IntentOutcome::Consented),
            data: json!({ "agreement_id": agreement_id }),
            ..output
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// agreement:reject
// ─────────────────────────────────────────────────────────────────────────────

struct Reject;

#[async_trait]
impl IntentHandler for Reject {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let agreement_id = AgreementId::from_uuid(require_uuid(payload, "agreement_id")?);
        let entity_id = acting_entity(&request.actor, payload)?;

        let agreement = load_agreement(ctx, agreement_id).await?;
        ctx.workflow.validate(
            "agreement",
            agreement_status_name(agreement.status),
            "reject",
        )?;

        let command = AgreementCommand::Reject(RejectProposal {
            agreement_id,
            entity_id,
            reason: str_field(payload, "reason").unwrap_or("rejected").to_string(),
            occurred_at: ctx.occurred_at(request),
        });
        let events = agreement.handle(&command).map_err(IntentError::from)?;
        let (output, _) = append_and_hook(ctx, &request.actor, agreement_id, events).await?;

        Ok(HandlerOutput {
            outcome: Some(IntentOutcome::Transitioned),
            data: json!({ "agreement_id": agreement_id, "status": "Terminated" }),
            ..output
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// agreement:terminate
// ─────────────────────────────────────────────────────────────────────────────

struct TerminateIntent;

#[async_trait]
impl IntentHandler for TerminateIntent {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let agreement_id = AgreementId::from_uuid(require_uuid(payload, "agreement_id")?);

        let agreement = load_agreement(ctx, agreement_id).await?;

        // Only named parties (or the system) may terminate.
        if let Some(actor_entity) = request.actor.entity_id() {
            if agreement.party(actor_entity).is_none() {
                return Err(IntentError::new(
                    ErrorCode::Forbidden,
                    "only a party to the agreement may terminate it",
                ));
            }
        }

        let command = AgreementCommand::Terminate(Terminate {
            agreement_id,
            reason: str_field(payload, "reason").unwrap_or("terminated").to_string(),
            occurred_at: ctx.occurred_at(request),
        });
        let events = agreement.handle(&command).map_err(IntentError::from)?;

        if events.is_empty() {
            // Already terminal; nothing to record.
            return Ok(HandlerOutput::with_outcome(IntentOutcome::Nothing)
                .data(json!({ "agreement_id": agreement_id })));
        }

        ctx.workflow.validate(
            "agreement",
            agreement_status_name(agreement.status),
            "terminate",
        )?;

        let (output, _) = append_and_hook(ctx, &request.actor, agreement_id, events).await?;

        Ok(HandlerOutput {
            outcome: Some(IntentOutcome::Transitioned),
            data: json!({ "agreement_id": agreement_id, "status": "Terminated" }),
            ..output
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// dispute:open / dispute:resolve
// ─────────────────────────────────────────────────────────────────────────────

struct DisputeOpen;

#[async_trait]
impl IntentHandler for DisputeOpen {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let agreement_id = AgreementId::from_uuid(require_uuid(payload, "agreement_id")?);
        let entity_id = acting_entity(&request.actor, payload)?;

        let agreement = load_agreement(ctx, agreement_id).await?;
        ctx.workflow.validate(
            "agreement",
            agreement_status_name(agreement.status),
            "dispute_open",
        )?;

        let command = AgreementCommand::OpenDispute(OpenDispute {
            agreement_id,
            entity_id,
            reason: require_str(payload, "reason")?.to_string(),
            occurred_at: ctx.occurred_at(request),
        });
        let events = agreement.handle(&command).map_err(IntentError::from)?;
        let (output, _) = append_and_hook(ctx, &request.actor, agreement_id, events).await?;

        Ok(HandlerOutput {
            outcome: Some(IntentOutcome::Transitioned),
            data: json!({ "agreement_id": agreement_id, "status": "Disputed" }),
            ..output
        })
    }
}

struct DisputeResolve;

#[async_trait]
impl IntentHandler for DisputeResolve {
    async fn execute(
        &self,
        ctx: &HandlerContext,
        request: &IntentRequest,
    ) -> Result<HandlerOutput, IntentError> {
        let payload = &request.payload;
        let agreement_id = AgreementId::from_uuid(require_uuid(payload, "agreement_id")?);

        let (resolution, action) = match require_str(payload, "resolution")? {
            "Reinstate" => (DisputeResolution::Reinstate, "dispute_reinstate"),
            "Terminate" => (DisputeResolution::Terminate, "dispute_terminate"),
            "Settle" => (DisputeResolution::Settle, "dispute_settle"),
            other => {
                return Err(IntentError::validation(
                    format!("unknown resolution '{other}'"),
                    Some("resolution"),
                ));
            }
        };

        let agreement = load_agreement(ctx, agreement_id).await?;

        if let Some(actor_entity) = request.actor.entity_id() {
            if agreement.party(actor_entity).is_none() {
                return Err(IntentError::new(
                    ErrorCode::Forbidden,
                    "only a party to the agreement may resolve its dispute",
                ));
            }
        }

        let target =
            ctx.workflow
                .validate("agreement", agreement_status_name(agreement.status), action)?;

        let command = AgreementCommand::ResolveDispute(ResolveDispute {
            agreement_id,
            resolution,
            occurred_at: ctx.occurred_at(request),
        });
        let events = agreement.handle(&command).map_err(IntentError::from)?;
        let (output, _) = append_and_hook(ctx, &request.actor, agreement_id, events).await?;

        Ok(HandlerOutput {
            outcome: Some(IntentOutcome::Transitioned),
            data: json!({ "agreement_id": agreement_id, "status": target }),
            ..output
        })
    }
}
