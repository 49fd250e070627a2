//! Container manager: enforces container physics on every movement.
//!
//! The aggregate guards everything it can see locally (topology, the
//! sealed-reference rule, conservation). This manager adds the rules that
//! need other aggregates: gate evaluation against the governing agreement's
//! terms, collaborative membership, strict/transient movement pairing, and
//! the two-legged transfer protocol with its compensating failure record.

use serde_json::Value as JsonValue;

use covenant_agreements::{Agreement, AgreementId};
use covenant_containers::{
    Container, ContainerCommand, ContainerId, ContainerItem, CreateContainer, Deposit, Fungibility,
    Permeability, RecordDepositRejection, RecordTransferFailure, TransferMode, Withdraw,
};
use covenant_core::{Actor, Aggregate, DomainError};
use covenant_events::AggregateType;

use crate::intents::result::{ErrorCode, EventSummary, IntentError};
use crate::intents::HandlerContext;

pub struct ContainerManager;

pub struct TransferOutcome {
    pub mode: TransferMode,
    pub events: Vec<EventSummary>,
}

impl ContainerManager {
    /// Create a container (physics are fixed for its lifetime).
    pub async fn create(
        ctx: &HandlerContext,
        actor: &Actor,
        command: CreateContainer,
    ) -> Result<Vec<EventSummary>, IntentError> {
        let container = ctx
            .repository
            .container(command.container_id)
            .await?
            .unwrap_or_else(|| Container::empty(command.container_id));

        let events = container
            .handle(&ContainerCommand::Create(command))
            .map_err(IntentError::from)?;

        let mut summaries = Vec::new();
        for event in &events {
            let recorded = ctx
                .append_typed(AggregateType::Container, container.id.into(), actor, event)
                .await?;
            summaries.push(EventSummary::from(&recorded));
        }
        Ok(summaries)
    }

    /// Deposit one item, enforcing the full physics. A physics rejection
    /// appends a `container.deposit_attempted` record before surfacing.
    pub async fn deposit(
        ctx: &HandlerContext,
        actor: &Actor,
        command: Deposit,
    ) -> Result<Vec<EventSummary>, IntentError> {
        let container = ctx
            .repository
            .container(command.container_id)
            .await?
            .ok_or_else(|| IntentError::new(ErrorCode::NotFound, "container not found"))?;

        if container.physics.fungibility == Fungibility::Transient {
            return Self::reject_deposit(
                ctx,
                actor,
                &container,
                &command.item_id,
                "FUNGIBILITY_VIOLATION: flow-through containers accept items only inside a transfer",
            )
            .await;
        }

        if let Err(reason) = Self::check_entry(ctx, actor, &container, &command).await? {
            return Self::reject_deposit(ctx, actor, &container, &command.item_id, &reason).await;
        }

        match container.handle(&ContainerCommand::Deposit(command.clone())) {
            Ok(events) => {
                let mut summaries = Vec::new();
                for event in &events {
                    let recorded = ctx
                        .append_typed(AggregateType::Container, container.id.into(), actor, event)
                        .await?;
                    summaries.push(EventSummary::from(&recorded));
                }
                Ok(summaries)
            }
            Err(DomainError::PhysicsViolation(reason)) => {
                Self::reject_deposit(ctx, actor, &container, &command.item_id, &reason).await
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Withdraw one item. Strict containers only release value through
    /// transfers, so a standalone withdrawal is a physics violation there.
    pub async fn withdraw(
        ctx: &HandlerContext,
        actor: &Actor,
        command: Withdraw,
    ) -> Result<Vec<EventSummary>, IntentError> {
        let container = ctx
            .repository
            .container(command.container_id)
            .await?
            .ok_or_else(|| IntentError::new(ErrorCode::NotFound, "container not found"))?;

        if container.physics.fungibility == Fungibility::Strict {
            return Err(IntentError::new(
                ErrorCode::PhysicsViolation,
                "FUNGIBILITY_VIOLATION: strict containers release value only through transfers",
            ));
        }

        let events = container
            .handle(&ContainerCommand::Withdraw(command))
            .map_err(IntentError::from)?;

        let mut summaries = Vec::new();
        for event in &events {
            let recorded = ctx
                .append_typed(AggregateType::Container, container.id.into(), actor, event)
                .await?;
            summaries.push(EventSummary::from(&recorded));
        }
        Ok(summaries)
    }

    /// The transfer protocol: withdraw from source, deposit into dest,
    /// both legs under one causation id. If the deposit leg fails after
    /// the withdrawal, a compensating `container.transfer_failed` fact is
    /// appended to the source before the failure surfaces.
    pub async fn transfer(
        ctx: &HandlerContext,
        actor: &Actor,
        source_id: ContainerId,
        dest_id: ContainerId,
        item_id: &str,
        quantity: Option<u64>,
        governing_agreement_id: Option<AgreementId>,
    ) -> Result<TransferOutcome, IntentError> {
        let source = ctx
            .repository
            .container(source_id)
            .await?
            .ok_or_else(|| IntentError::new(ErrorCode::NotFound, "source container not found"))?;
        let dest = ctx
            .repository
            .container(dest_id)
            .await?
            .ok_or_else(|| {
                IntentError::new(ErrorCode::NotFound, "destination container not found")
            })?;

        let Some(held) = source.items.get(item_id).cloned() else {
            return Err(IntentError::new(
                ErrorCode::NotFound,
                format!("item '{item_id}' is not in the source container"),
            ));
        };

        let moved = match (held.quantity, quantity) {
            (Some(available), Some(requested)) => {
                if requested > available {
                    return Err(IntentError::new(
                        ErrorCode::PhysicsViolation,
                        format!("INSUFFICIENT_QUANTITY: requested {requested}, held {available}"),
                    ));
                }
                ContainerItem {
                    quantity: Some(requested),
                    ..held.clone()
                }
            }
            _ => held.clone(),
        };

        // Destination must admit the item before the source is debited.
        if !dest.physics.admits(moved.kind) {
            return Err(IntentError::new(
                ErrorCode::PhysicsViolation,
                format!(
                    "TOPOLOGY_VIOLATION: destination does not admit {:?} items",
                    moved.kind
                ),
            ));
        }

        let occurred_at = ctx.clock.now();
        let deposit = Deposit {
            container_id: dest_id,
            item_id: item_id.to_string(),
            item: moved,
            governing_agreement_id,
            occurred_at,
        };
        if let Err(reason) = Self::check_entry(ctx, actor, &dest, &deposit).await? {
            return Err(IntentError::new(ErrorCode::PhysicsViolation, reason));
        }

        let mode = source.physics.transfer_mode();
        let mut events = Vec::new();

        if mode == TransferMode::Move {
            let withdraw = Withdraw {
                container_id: source_id,
                item_id: item_id.to_string(),
                quantity,
                governing_agreement_id,
                occurred_at,
            };
            let withdrawn = source
                .handle(&ContainerCommand::Withdraw(withdraw))
                .map_err(IntentError::from)?;
            for event in &withdrawn {
                let recorded = ctx
                    .append_typed(AggregateType::Container, source_id.into(), actor, event)
                    .await?;
                events.push(EventSummary::from(&recorded));
            }
        }

        match dest.handle(&ContainerCommand::Deposit(deposit)) {
            Ok(deposited) => {
                for event in &deposited {
                    let recorded = ctx
                        .append_typed(AggregateType::Container, dest_id.into(), actor, event)
                        .await?;
                    events.push(EventSummary::from(&recorded));
                }
                Ok(TransferOutcome { mode, events })
            }
            Err(e) => {
                // The withdrawal is a fact; record the failed transfer so
                // the partial state is auditable, then surface the failure.
                let failure = RecordTransferFailure {
                    container_id: source_id,
                    destination_id: dest_id,
                    item_id: item_id.to_string(),
                    reason: e.to_string(),
                    occurred_at: ctx.clock.now(),
                };
                // Refold: the withdrawal leg bumped the source version.
                if let Ok(Some(source)) = ctx.repository.container(source_id).await {
                    if let Ok(compensations) =
                        source.handle(&ContainerCommand::RecordTransferFailure(failure))
                    {
                        for event in &compensations {
                            if let Ok(recorded) = ctx
                                .append_typed(
                                    AggregateType::Container,
                                    source_id.into(),
                                    actor,
                                    event,
                                )
                                .await
                            {
                                events.push(EventSummary::from(&recorded));
                            }
                        }
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Entry rules that need the governing agreement: `Ok(Err(reason))`
    /// means "rejected for an auditable reason".
    async fn check_entry(
        ctx: &HandlerContext,
        actor: &Actor,
        container: &Container,
        deposit: &Deposit,
    ) -> Result<Result<(), String>, IntentError> {
        match container.physics.permeability {
            Permeability::Open | Permeability::Sealed => Ok(Ok(())),
            Permeability::Collaborative => {
                if actor.is_system() {
                    return Ok(Ok(()));
                }
                let Some(agreement) = Self::governance(ctx, container).await? else {
                    return Ok(Err(
                        "PERMEABILITY_VIOLATION: collaborative container has no governing agreement"
                            .to_string(),
                    ));
                };
                let member = actor
                    .entity_id()
                    .map(|id| agreement.party(id).is_some())
                    .unwrap_or(false);
                if member {
                    Ok(Ok(()))
                } else {
                    Ok(Err(
                        "PERMEABILITY_VIOLATION: actor is not a party to the governing agreement"
                            .to_string(),
                    ))
                }
            }
            Permeability::Gated => {
                if actor.is_system() {
                    return Ok(Ok(()));
                }
                let Some(agreement) = Self::governance(ctx, container).await? else {
                    return Ok(Err(
                        "PERMEABILITY_VIOLATION: gated container has no governing agreement"
                            .to_string(),
                    ));
                };
                Ok(evaluate_gate(&agreement, actor, deposit))
            }
        }
    }

    async fn governance(
        ctx: &HandlerContext,
        container: &Container,
    ) -> Result<Option<Agreement>, IntentError> {
        let Some(id) = container.governance_agreement_id else {
            return Ok(None);
        };
        Ok(ctx.repository.agreement(id).await?)
    }

    async fn reject_deposit(
        ctx: &HandlerContext,
        actor: &Actor,
        container: &Container,
        item_id: &str,
        reason: &str,
    ) -> Result<Vec<EventSummary>, IntentError> {
        let rejection = RecordDepositRejection {
            container_id: container.id,
            item_id: item_id.to_string(),
            reason: reason.to_string(),
            occurred_at: ctx.clock.now(),
        };
        if let Ok(events) = container.handle(&ContainerCommand::RecordDepositRejection(rejection)) {
            for event in &events {
                let _ = ctx
                    .append_typed(AggregateType::Container, container.id.into(), actor, event)
                    .await;
            }
        }
        Err(IntentError::new(ErrorCode::PhysicsViolation, reason))
    }
}

/// Gate rules live in the governing agreement's `terms.gate` object:
/// `allowed_item_types` (item kind names) and `allowed_depositors`
/// (entity ids). A missing rule admits; a present rule must match.
fn evaluate_gate(agreement: &Agreement, actor: &Actor, deposit: &Deposit) -> Result<(), String> {
    if !agreement.grants_at(deposit.occurred_at) {
        return Err("PERMEABILITY_VIOLATION: governing agreement is not active".to_string());
    }

    let Some(gate) = agreement.terms.get("gate") else {
        return Ok(());
    };

    if let Some(kinds) = gate.get("allowed_item_types").and_then(JsonValue::as_array) {
        let kind = format!("{:?}", deposit.item.kind);
        if !kinds.iter().any(|k| k.as_str() == Some(kind.as_str())) {
            return Err(format!(
                "PERMEABILITY_VIOLATION: gate does not admit {kind} items"
            ));
        }
    }

    if let Some(depositors) = gate.get("allowed_depositors").and_then(JsonValue::as_array) {
        let allowed = actor
            .entity_id()
            .map(|id| {
                depositors
                    .iter()
                    .any(|d| d.as_str() == Some(id.to_string().as_str()))
            })
            .unwrap_or(false);
        if !allowed {
            return Err("PERMEABILITY_VIOLATION: gate does not admit this depositor".to_string());
        }
    }

    Ok(())
}
