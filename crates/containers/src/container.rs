//! Container aggregate (event-sourced).
//!
//! The aggregate enforces every physics rule it can decide locally:
//! topology on deposit, the sealed-reference requirement, and conservation
//! on withdrawal. Rules that need the governing agreement's state (gate
//! evaluation, strict transfer pairing, transient flow-through) are enforced
//! by the container manager before the command reaches the aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use covenant_agreements::AgreementId;
use covenant_core::{Aggregate, AggregateId, AggregateRoot, DomainError, EntityId, RealmId};
use covenant_events::Event;

use crate::physics::{ContainerPhysics, Permeability};
use crate::physics::ItemKind;

// ─────────────────────────────────────────────────────────────────────────────
// Container ID
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a container.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(Uuid);

impl ContainerId {
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

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<AggregateId> for ContainerId {
    fn from(value: AggregateId) -> Self {
        Self(*value.as_uuid())
    }
}

impl From<ContainerId> for AggregateId {
    fn from(value: ContainerId) -> Self {
        AggregateId::from_uuid(value.0)
    }
}

impl From<RealmId> for ContainerId {
    fn from(value: RealmId) -> Self {
        Self(*value.as_uuid())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Items
// ─────────────────────────────────────────────────────────────────────────────

/// A single item held by a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerItem {
    pub kind: ItemKind,
    /// Present for fungible quantities; absent for discrete items.
    pub quantity: Option<u64>,
    #[serde(default)]
    pub metadata: JsonValue,
}

impl ContainerItem {
    pub fn value(quantity: u64) -> Self {
        Self {
            kind: ItemKind::Value,
            quantity: Some(quantity),
            metadata: JsonValue::Null,
        }
    }

    pub fn object(metadata: JsonValue) -> Self {
        Self {
            kind: ItemKind::Object,
            quantity: None,
            metadata,
        }
    }

    pub fn subject(entity_id: EntityId) -> Self {
        Self {
            kind: ItemKind::Subject,
            quantity: None,
            metadata: serde_json::json!({ "entity_id": entity_id }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Container aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// Container aggregate.
///
/// # Invariants
/// - Physics are immutable after creation.
/// - Deposits match the container's topology.
/// - Sealed containers require a governing-agreement reference on every
///   movement.
/// - For each held quantity, deposits minus withdrawals never go negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: ContainerId,
    pub realm_id: Option<RealmId>,
    pub name: String,
    pub container_type: String,
    pub physics: ContainerPhysics,
    pub governance_agreement_id: Option<AgreementId>,
    pub owner_id: Option<EntityId>,
    /// Ordered map so folds are structurally identical across replays.
    pub items: BTreeMap<String, ContainerItem>,
    pub parent_container_id: Option<ContainerId>,
    pub version: u64,
    pub created: bool,
}

impl Container {
    pub fn empty(id: ContainerId) -> Self {
        Self {
            id,
            realm_id: None,
            name: String::new(),
            container_type: String::new(),
            physics: ContainerPhysics::workspace(),
            governance_agreement_id: None,
            owner_id: None,
            items: BTreeMap::new(),
            parent_container_id: None,
            version: 0,
            created: false,
        }
    }

    /// Current quantity of a fungible item (0 if absent).
    pub fn quantity_of(&self, item_id: &str) -> u64 {
        self.items
            .get(item_id)
            .and_then(|i| i.quantity)
            .unwrap_or(0)
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    fn ensure_movement_reference(
        &self,
        governing_agreement_id: Option<AgreementId>,
    ) -> Result<(), DomainError> {
        if self.physics.permeability == Permeability::Sealed {
            match governing_agreement_id {
                Some(reference) if Some(reference) == self.governance_agreement_id => {}
                Some(_) => {
                    return Err(DomainError::physics(
                        "PERMEABILITY_VIOLATION: movement references a foreign agreement",
                    ));
                }
                None => {
                    return Err(DomainError::physics(
                        "PERMEABILITY_VIOLATION: sealed container requires a governing agreement reference",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl AggregateRoot for Container {
    type Id = ContainerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContainer {
    pub container_id: ContainerId,
    pub realm_id: Option<RealmId>,
    pub name: String,
    pub container_type: String,
    pub physics: ContainerPhysics,
    pub governance_agreement_id: Option<AgreementId>,
    pub owner_id: Option<EntityId>,
    pub parent_container_id: Option<ContainerId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub container_id: ContainerId,
    pub item_id: String,
    pub item: ContainerItem,
    pub governing_agreement_id: Option<AgreementId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdraw {
    pub container_id: ContainerId,
    pub item_id: String,
    /// For fungible items: how much to withdraw. Absent = the whole item.
    pub quantity: Option<u64>,
    pub governing_agreement_id: Option<AgreementId>,
    pub occurred_at: DateTime<Utc>,
}

/// Record a rejected deposit attempt as an auditable fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDepositRejection {
    pub container_id: ContainerId,
    pub item_id: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Record a transfer that failed between its withdraw and deposit legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTransferFailure {
    pub container_id: ContainerId,
    pub destination_id: ContainerId,
    pub item_id: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContainerCommand {
    Create(CreateContainer),
    Deposit(Deposit),
    Withdraw(Withdraw),
    RecordDepositRejection(RecordDepositRejection),
    RecordTransferFailure(RecordTransferFailure),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome recorded on a `DepositAttempted` event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptResult {
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerEvent {
    Created {
        container_id: ContainerId,
        realm_id: Option<RealmId>,
        name: String,
        container_type: String,
        physics: ContainerPhysics,
        governance_agreement_id: Option<AgreementId>,
        owner_id: Option<EntityId>,
        parent_container_id: Option<ContainerId>,
        occurred_at: DateTime<Utc>,
    },
    ItemDeposited {
        container_id: ContainerId,
        item_id: String,
        item: ContainerItem,
        governing_agreement_id: Option<AgreementId>,
        occurred_at: DateTime<Utc>,
    },
    ItemWithdrawn {
        container_id: ContainerId,
        item_id: String,
        quantity: Option<u64>,
        governing_agreement_id: Option<AgreementId>,
        occurred_at: DateTime<Utc>,
    },
    DepositAttempted {
        container_id: ContainerId,
        item_id: String,
        result: AttemptResult,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    TransferFailed {
        container_id: ContainerId,
        destination_id: ContainerId,
        item_id: String,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for ContainerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ContainerEvent::Created { .. } => "container.created",
            ContainerEvent::ItemDeposited { .. } => "container.item_deposited",
            ContainerEvent::ItemWithdrawn { .. } => "container.item_withdrawn",
            ContainerEvent::DepositAttempted { .. } => "container.deposit_attempted",
            ContainerEvent::TransferFailed { .. } => "container.transfer_failed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ContainerEvent::Created { occurred_at, .. }
            | ContainerEvent::ItemDeposited { occurred_at, .. }
            | ContainerEvent::ItemWithdrawn { occurred_at, .. }
            | ContainerEvent::DepositAttempted { occurred_at, .. }
            | ContainerEvent::TransferFailed { occurred_at, .. } => *occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for Container {
    type Command = ContainerCommand;
    type Event = ContainerEvent;
    type Error = DomainError;

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ContainerCommand::Create(cmd) => self.handle_create(cmd),
            ContainerCommand::Deposit(cmd) => self.handle_deposit(cmd),
            ContainerCommand::Withdraw(cmd) => self.handle_withdraw(cmd),
            ContainerCommand::RecordDepositRejection(cmd) => self.handle_record_rejection(cmd),
            ContainerCommand::RecordTransferFailure(cmd) => self.handle_record_failure(cmd),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ContainerEvent::Created {
                container_id,
                realm_id,
                name,
                container_type,
                physics,
                governance_agreement_id,
                owner_id,
                parent_container_id,
                ..
            } => {
                self.id = *container_id;
                self.realm_id = *realm_id;
                self.name = name.clone();
                self.container_type = container_type.clone();
                self.physics = *physics;
                self.governance_agreement_id = *governance_agreement_id;
                self.owner_id = *owner_id;
                self.parent_container_id = *parent_container_id;
                self.created = true;
            }
            ContainerEvent::ItemDeposited { item_id, item, .. } => {
                let held = self.items.get(item_id).and_then(|i| i.quantity);
                match (held, item.quantity) {
                    (Some(held), Some(incoming)) => {
                        if let Some(existing) = self.items.get_mut(item_id) {
                            existing.quantity = Some(held + incoming);
                        }
                    }
                    _ => {
                        self.items.insert(item_id.clone(), item.clone());
                    }
                }
            }
            ContainerEvent::ItemWithdrawn {
                item_id, quantity, ..
            } => match quantity {
                Some(amount) => {
                    let remaining = self.quantity_of(item_id).saturating_sub(*amount);
                    if remaining == 0 {
                        self.items.remove(item_id);
                    } else if let Some(existing) = self.items.get_mut(item_id) {
                        existing.quantity = Some(remaining);
                    }
                }
                None => {
                    self.items.remove(item_id);
                }
            },
            // Attempt/failure records change no held items.
            ContainerEvent::DepositAttempted { .. } | ContainerEvent::TransferFailed { .. } => {}
        }
        self.version += 1;
    }
}

impl Container {
    // ─────────────────────────────────────────────────────────────────────────
    // Command handlers
    // ─────────────────────────────────────────────────────────────────────────

    fn handle_create(&self, cmd: &CreateContainer) -> Result<Vec<ContainerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::already_exists("container already exists"));
        }

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("container name cannot be empty"));
        }

        if cmd.container_type.trim().is_empty() {
            return Err(DomainError::validation("container type cannot be empty"));
        }

        Ok(vec![ContainerEvent::Created {
            container_id: cmd.container_id,
            realm_id: cmd.realm_id,
            name: cmd.name.trim().to_string(),
            container_type: cmd.container_type.clone(),
            physics: cmd.physics,
            governance_agreement_id: cmd.governance_agreement_id,
            owner_id: cmd.owner_id,
            parent_container_id: cmd.parent_container_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_deposit(&self, cmd: &Deposit) -> Result<Vec<ContainerEvent>, DomainError> {
        self.ensure_created()?;

        if !self.physics.admits(cmd.item.kind) {
            return Err(DomainError::physics(format!(
                "TOPOLOGY_VIOLATION: {:?} items cannot enter a {:?} container",
                cmd.item.kind, self.physics.topology
            )));
        }

        self.ensure_movement_reference(cmd.governing_agreement_id)?;

        if cmd.item.quantity == Some(0) {
            return Err(DomainError::validation("deposit quantity must be positive"));
        }

        Ok(vec![ContainerEvent::ItemDeposited {
            container_id: cmd.container_id,
            item_id: cmd.item_id.clone(),
            item: cmd.item.clone(),
            governing_agreement_id: cmd.governing_agreement_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_withdraw(&self, cmd: &Withdraw) -> Result<Vec<ContainerEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_movement_reference(cmd.governing_agreement_id)?;

        let Some(held) = self.items.get(&cmd.item_id) else {
            return Err(DomainError::NotFound);
        };

        if let Some(amount) = cmd.quantity {
            if amount == 0 {
                return Err(DomainError::validation(
                    "withdrawal quantity must be positive",
                ));
            }
            let available = held.quantity.unwrap_or(0);
            if amount > available {
                return Err(DomainError::physics(format!(
                    "INSUFFICIENT_QUANTITY: requested {amount}, held {available}"
                )));
            }
        }

        Ok(vec![ContainerEvent::ItemWithdrawn {
            container_id: cmd.container_id,
            item_id: cmd.item_id.clone(),
            quantity: cmd.quantity,
            governing_agreement_id: cmd.governing_agreement_id,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_record_rejection(
        &self,
        cmd: &RecordDepositRejection,
    ) -> Result<Vec<ContainerEvent>, DomainError> {
        self.ensure_created()?;

        Ok(vec![ContainerEvent::DepositAttempted {
            container_id: cmd.container_id,
            item_id: cmd.item_id.clone(),
            result: AttemptResult::Rejected,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_record_failure(
        &self,
        cmd: &RecordTransferFailure,
    ) -> Result<Vec<ContainerEvent>, DomainError> {
        self.ensure_created()?;

        Ok(vec![ContainerEvent::TransferFailed {
            container_id: cmd.container_id,
            destination_id: cmd.destination_id,
            item_id: cmd.item_id.clone(),
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{Execution, Fungibility, Topology};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn container_with(physics: ContainerPhysics, governance: Option<AgreementId>) -> Container {
        let id = ContainerId::new();
        let mut container = Container::empty(id);
        let cmd = ContainerCommand::Create(CreateContainer {
            container_id: id,
            realm_id: Some(RealmId::new()),
            name: "treasury".to_string(),
            container_type: "Wallet".to_string(),
            physics,
            governance_agreement_id: governance,
            owner_id: Some(EntityId::new()),
            parent_container_id: None,
            occurred_at: now(),
        });
        for event in container.handle(&cmd).unwrap() {
            container.apply(&event);
        }
        container
    }

    fn deposit(container: &mut Container, item_id: &str, quantity: u64) {
        let cmd = ContainerCommand::Deposit(Deposit {
            container_id: container.id,
            item_id: item_id.to_string(),
            item: ContainerItem::value(quantity),
            governing_agreement_id: container.governance_agreement_id,
            occurred_at: now(),
        });
        for event in container.handle(&cmd).unwrap() {
            container.apply(&event);
        }
    }

    #[test]
    fn deposits_accumulate_fungible_quantities() {
        let mut wallet = container_with(ContainerPhysics::wallet(), None);
        deposit(&mut wallet, "credits", 40);
        deposit(&mut wallet, "credits", 2);
        assert_eq!(wallet.quantity_of("credits"), 42);
    }

    #[test]
    fn topology_rejects_foreign_item_kinds() {
        let wallet = container_with(ContainerPhysics::wallet(), None);
        let cmd = ContainerCommand::Deposit(Deposit {
            container_id: wallet.id,
            item_id: "doc-1".to_string(),
            item: ContainerItem::object(serde_json::json!({"title": "contract"})),
            governing_agreement_id: None,
            occurred_at: now(),
        });
        let err = wallet.handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::PhysicsViolation(msg) if msg.contains("TOPOLOGY")));
    }

    #[test]
    fn sealed_containers_demand_their_governing_agreement() {
        let governance = AgreementId::new();
        let sealed = ContainerPhysics {
            fungibility: Fungibility::Strict,
            topology: Topology::Values,
            permeability: Permeability::Sealed,
            execution: Execution::Disabled,
        };
        let container = container_with(sealed, Some(governance));

        let without_reference = ContainerCommand::Deposit(Deposit {
            container_id: container.id,
            item_id: "credits".to_string(),
            item: ContainerItem::value(5),
            governing_agreement_id: None,
            occurred_at: now(),
        });
        let err = container.handle(&without_reference).unwrap_err();
        assert!(
            matches!(err, DomainError::PhysicsViolation(msg) if msg.contains("PERMEABILITY_VIOLATION"))
        );

        let foreign = ContainerCommand::Deposit(Deposit {
            container_id: container.id,
            item_id: "credits".to_string(),
            item: ContainerItem::value(5),
            governing_agreement_id: Some(AgreementId::new()),
            occurred_at: now(),
        });
        assert!(container.handle(&foreign).is_err());

        let proper = ContainerCommand::Deposit(Deposit {
            container_id: container.id,
            item_id: "credits".to_string(),
            item: ContainerItem::value(5),
            governing_agreement_id: Some(governance),
            occurred_at: now(),
        });
        assert!(container.handle(&proper).is_ok());
    }

    #[test]
    fn withdrawal_beyond_balance_is_rejected() {
        let mut wallet = container_with(ContainerPhysics::wallet(), None);
        deposit(&mut wallet, "credits", 10);

        let cmd = ContainerCommand::Withdraw(Withdraw {
            container_id: wallet.id,
            item_id: "credits".to_string(),
            quantity: Some(11),
            governing_agreement_id: None,
            occurred_at: now(),
        });
        let err = wallet.handle(&cmd).unwrap_err();
        assert!(
            matches!(err, DomainError::PhysicsViolation(msg) if msg.contains("INSUFFICIENT_QUANTITY"))
        );
    }

    #[test]
    fn withdrawing_everything_removes_the_item() {
        let mut wallet = container_with(ContainerPhysics::wallet(), None);
        deposit(&mut wallet, "credits", 10);

        let cmd = ContainerCommand::Withdraw(Withdraw {
            container_id: wallet.id,
            item_id: "credits".to_string(),
            quantity: Some(10),
            governing_agreement_id: None,
            occurred_at: now(),
        });
        for event in wallet.handle(&cmd).unwrap() {
            wallet.apply(&event);
        }
        assert!(!wallet.items.contains_key("credits"));
    }

    #[test]
    fn rejection_records_do_not_touch_items() {
        let mut wallet = container_with(ContainerPhysics::wallet(), None);
        deposit(&mut wallet, "credits", 10);
        let before = wallet.items.clone();

        let cmd = ContainerCommand::RecordDepositRejection(RecordDepositRejection {
            container_id: wallet.id,
            item_id: "doc-1".to_string(),
            reason: "PERMEABILITY_VIOLATION".to_string(),
            occurred_at: now(),
        });
        for event in wallet.handle(&cmd).unwrap() {
            wallet.apply(&event);
        }
        assert_eq!(wallet.items, before);
        assert_eq!(wallet.version, 3);
    }

    // Conservation: no interleaving of deposits and withdrawals drives a
    // strict container's balance negative.
    proptest! {
        #[test]
        fn conservation_holds_under_any_interleaving(
            ops in proptest::collection::vec((proptest::bool::ANY, 1u64..50), 1..60)
        ) {
            let mut wallet = container_with(ContainerPhysics::wallet(), None);
            let mut expected: i128 = 0;

            for (is_deposit, amount) in ops {
                if is_deposit {
                    deposit(&mut wallet, "credits", amount);
                    expected += amount as i128;
                } else {
                    let cmd = ContainerCommand::Withdraw(Withdraw {
                        container_id: wallet.id,
                        item_id: "credits".to_string(),
                        quantity: Some(amount),
                        governing_agreement_id: None,
                        occurred_at: now(),
                    });
                    match wallet.handle(&cmd) {
                        Ok(events) => {
                            for event in events {
                                wallet.apply(&event);
                            }
                            expected -= amount as i128;
                        }
                        Err(_) => {
                            // Rejected: over-withdrawal. Balance unchanged.
                        }
                    }
                }

                prop_assert!(expected >= 0);
                prop_assert_eq!(wallet.quantity_of("credits") as i128, expected);
            }
        }
    }
}
