//! Asset aggregate (event-sourced).
//!
//! An asset is any registered thing: goods, credits, documents, claims.
//! Every asset is established by an agreement; its ownership and status
//! change only through events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use covenant_agreements::AgreementId;
use covenant_core::{Aggregate, AggregateId, AggregateRoot, DomainError, EntityId};
use covenant_events::Event;

// ─────────────────────────────────────────────────────────────────────────────
// Asset ID
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for an asset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(Uuid);

impl AssetId {
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

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for AssetId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<AggregateId> for AssetId {
    fn from(value: AggregateId) -> Self {
        Self(*value.as_uuid())
    }
}

impl From<AssetId> for AggregateId {
    fn from(value: AssetId) -> Self {
        AggregateId::from_uuid(value.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssetStatus {
    #[default]
    Registered,
    /// No longer in circulation; terminal.
    Retired,
}

// ─────────────────────────────────────────────────────────────────────────────
// Asset aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// Asset aggregate.
///
/// # Invariants
/// - `asset_type` and `established_by` are immutable after registration.
/// - Retired assets accept no further transitions.
/// - Quantities, when present, are non-negative by construction (u64).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: AssetId,
    pub asset_type: String,
    pub owner_id: Option<EntityId>,
    pub properties: JsonValue,
    pub quantity: Option<u64>,
    /// The agreement that established this asset.
    pub established_by: Option<AgreementId>,
    pub status: AssetStatus,
    pub version: u64,
    pub created: bool,
}

impl Asset {
    pub fn empty(id: AssetId) -> Self {
        Self {
            id,
            asset_type: String::new(),
            owner_id: None,
            properties: JsonValue::Null,
            quantity: None,
            established_by: None,
            status: AssetStatus::Registered,
            version: 0,
            created: false,
        }
    }

    fn ensure_live(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }
        if self.status == AssetStatus::Retired {
            return Err(DomainError::lifecycle("asset is retired"));
        }
        Ok(())
    }
}

impl AggregateRoot for Asset {
    type Id = AssetId;

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
pub struct RegisterAsset {
    pub asset_id: AssetId,
    pub asset_type: String,
    pub owner_id: Option<EntityId>,
    pub properties: JsonValue,
    pub quantity: Option<u64>,
    pub established_by: Option<AgreementId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOwnership {
    pub asset_id: AssetId,
    pub new_owner: EntityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProperties {
    pub asset_id: AssetId,
    pub properties: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetireAsset {
    pub asset_id: AssetId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssetCommand {
    Register(RegisterAsset),
    TransferOwnership(TransferOwnership),
    UpdateProperties(UpdateProperties),
    Retire(RetireAsset),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetEvent {
    Registered {
        asset_id: AssetId,
        asset_type: String,
        owner_id: Option<EntityId>,
        properties: JsonValue,
        quantity: Option<u64>,
        established_by: Option<AgreementId>,
        occurred_at: DateTime<Utc>,
    },
    OwnershipTransferred {
        asset_id: AssetId,
        previous_owner: Option<EntityId>,
        new_owner: EntityId,
        occurred_at: DateTime<Utc>,
    },
    PropertiesUpdated {
        asset_id: AssetId,
        properties: JsonValue,
        occurred_at: DateTime<Utc>,
    },
    Retired {
        asset_id: AssetId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for AssetEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AssetEvent::Registered { .. } => "asset.registered",
            AssetEvent::OwnershipTransferred { .. } => "asset.ownership_transferred",
            AssetEvent::PropertiesUpdated { .. } => "asset.properties_updated",
            AssetEvent::Retired { .. } => "asset.retired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AssetEvent::Registered { occurred_at, .. }
            | AssetEvent::OwnershipTransferred { occurred_at, .. }
            | AssetEvent::PropertiesUpdated { occurred_at, .. }
            | AssetEvent::Retired { occurred_at, .. } => *occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for Asset {
    type Command = AssetCommand;
    type Event = AssetEvent;
    type Error = DomainError;

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AssetCommand::Register(cmd) => self.handle_register(cmd),
            AssetCommand::TransferOwnership(cmd) => self.handle_transfer(cmd),
            AssetCommand::UpdateProperties(cmd) => self.handle_update(cmd),
            AssetCommand::Retire(cmd) => self.handle_retire(cmd),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AssetEvent::Registered {
                asset_id,
                asset_type,
                owner_id,
                properties,
                quantity,
                established_by,
                ..
            } => {
                self.id = *asset_id;
                self.asset_type = asset_type.clone();
                self.owner_id = *owner_id;
                self.properties = properties.clone();
                self.quantity = *quantity;
                self.established_by = *established_by;
                self.status = AssetStatus::Registered;
                self.created = true;
            }
            AssetEvent::OwnershipTransferred { new_owner, .. } => {
                self.owner_id = Some(*new_owner);
            }
            AssetEvent::PropertiesUpdated { properties, .. } => {
                self.properties = properties.clone();
            }
            AssetEvent::Retired { .. } => {
                self.status = AssetStatus::Retired;
            }
        }
        self.version += 1;
    }
}

impl Asset {
    fn handle_register(&self, cmd: &RegisterAsset) -> Result<Vec<AssetEvent>, DomainError> {
        if self.created {
            return Err(DomainError::already_exists("asset already registered"));
        }

        if cmd.asset_type.trim().is_empty() {
            return Err(DomainError::validation("asset type cannot be empty"));
        }

        Ok(vec![AssetEvent::Registered {
            asset_id: cmd.asset_id,
            asset_type: cmd.asset_type.clone(),
            owner_id: cmd.owner_id,
            properties: cmd.properties.clone(),
            quantity: cmd.quantity,
            established_by: cmd.established_by,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_transfer(&self, cmd: &TransferOwnership) -> Result<Vec<AssetEvent>, DomainError> {
        self.ensure_live()?;

        if self.owner_id == Some(cmd.new_owner) {
            return Err(DomainError::invariant("entity already owns this asset"));
        }

        Ok(vec![AssetEvent::OwnershipTransferred {
            asset_id: cmd.asset_id,
            previous_owner: self.owner_id,
            new_owner: cmd.new_owner,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_update(&self, cmd: &UpdateProperties) -> Result<Vec<AssetEvent>, DomainError> {
        self.ensure_live()?;

        Ok(vec![AssetEvent::PropertiesUpdated {
            asset_id: cmd.asset_id,
            properties: cmd.properties.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_retire(&self, cmd: &RetireAsset) -> Result<Vec<AssetEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }

        // Retiring twice is a no-op.
        if self.status == AssetStatus::Retired {
            return Ok(vec![]);
        }

        Ok(vec![AssetEvent::Retired {
            asset_id: cmd.asset_id,
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
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn registered_asset() -> Asset {
        let id = AssetId::new();
        let mut asset = Asset::empty(id);
        let cmd = AssetCommand::Register(RegisterAsset {
            asset_id: id,
            asset_type: "credits".to_string(),
            owner_id: Some(EntityId::new()),
            properties: json!({"unit": "point"}),
            quantity: Some(100),
            established_by: Some(AgreementId::new()),
            occurred_at: now(),
        });
        for event in asset.handle(&cmd).unwrap() {
            asset.apply(&event);
        }
        asset
    }

    #[test]
    fn register_success() {
        let asset = registered_asset();
        assert!(asset.created);
        assert_eq!(asset.quantity, Some(100));
        assert_eq!(asset.version, 1);
    }

    #[test]
    fn register_twice_rejected() {
        let asset = registered_asset();
        let cmd = AssetCommand::Register(RegisterAsset {
            asset_id: asset.id,
            asset_type: "credits".to_string(),
            owner_id: None,
            properties: JsonValue::Null,
            quantity: None,
            established_by: None,
            occurred_at: now(),
        });
        assert!(matches!(
            asset.handle(&cmd),
            Err(DomainError::AlreadyExists(_))
        ));
    }

    #[test]
    fn ownership_transfer_records_previous_owner() {
        let mut asset = registered_asset();
        let previous = asset.owner_id;
        let new_owner = EntityId::new();

        let cmd = AssetCommand::TransferOwnership(TransferOwnership {
            asset_id: asset.id,
            new_owner,
            occurred_at: now(),
        });
        let events = asset.handle(&cmd).unwrap();
        let AssetEvent::OwnershipTransferred {
            previous_owner, ..
        } = &events[0]
        else {
            panic!("expected OwnershipTransferred");
        };
        assert_eq!(*previous_owner, previous);

        for event in events {
            asset.apply(&event);
        }
        assert_eq!(asset.owner_id, Some(new_owner));
    }

    #[test]
    fn retired_assets_reject_transitions() {
        let mut asset = registered_asset();
        let cmd = AssetCommand::Retire(RetireAsset {
            asset_id: asset.id,
            reason: "depleted".to_string(),
            occurred_at: now(),
        });
        for event in asset.handle(&cmd).unwrap() {
            asset.apply(&event);
        }
        assert_eq!(asset.status, AssetStatus::Retired);

        // Retire again: no-op.
        assert!(asset.handle(&cmd).unwrap().is_empty());

        // Transfers are refused.
        let transfer = AssetCommand::TransferOwnership(TransferOwnership {
            asset_id: asset.id,
            new_owner: EntityId::new(),
            occurred_at: now(),
        });
        assert!(matches!(
            asset.handle(&transfer),
            Err(DomainError::LifecycleInvalid(_))
        ));
    }
}
