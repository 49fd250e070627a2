//! Party aggregate (event-sourced).
//!
//! A party is anything that can act or be party to an agreement: a person,
//! an organization, an autonomous agent, or the system itself. Authority is
//! never stored on the party; it derives from the active agreements naming
//! it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use covenant_core::{Aggregate, AggregateId, AggregateRoot, DomainError, EntityId, RealmId};
use covenant_events::Event;

// ─────────────────────────────────────────────────────────────────────────────
// Party ID
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a party.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(Uuid);

impl PartyId {
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

impl Default for PartyId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PartyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EntityId> for PartyId {
    fn from(value: EntityId) -> Self {
        Self(*value.as_uuid())
    }
}

impl From<PartyId> for EntityId {
    fn from(value: PartyId) -> Self {
        EntityId::from_uuid(value.0)
    }
}

impl From<AggregateId> for PartyId {
    fn from(value: AggregateId) -> Self {
        Self(*value.as_uuid())
    }
}

impl From<PartyId> for AggregateId {
    fn from(value: PartyId) -> Self {
        AggregateId::from_uuid(value.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Kind & identity
// ─────────────────────────────────────────────────────────────────────────────

/// What sort of party this is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyKind {
    Person,
    Organization,
    /// Autonomous software agent acting on someone's behalf.
    Agent,
    /// The platform itself (bootstrap, hooks).
    System,
}

/// Who a party claims to be: display name plus external identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    /// External identifiers (registration numbers, DIDs, handles).
    #[serde(default)]
    pub identifiers: Vec<String>,
    /// Contact points (email addresses, URLs).
    #[serde(default)]
    pub contacts: Vec<String>,
}

impl Identity {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifiers: Vec::new(),
            contacts: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Party aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// Party aggregate.
///
/// # Invariants
/// - `kind` is immutable after creation.
/// - Autonomy levels apply to agents only.
/// - A guardian must be a different entity than the ward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    pub id: PartyId,
    pub kind: PartyKind,
    pub identity: Identity,
    pub realm_id: Option<RealmId>,
    /// Agent substrate: 0 = fully supervised, 100 = fully autonomous.
    pub autonomy: Option<u8>,
    pub guardian: Option<EntityId>,
    pub created_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created: bool,
}

impl Party {
    pub fn empty(id: PartyId) -> Self {
        Self {
            id,
            kind: PartyKind::Person,
            identity: Identity::default(),
            realm_id: None,
            autonomy: None,
            guardian: None,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }
}

impl AggregateRoot for Party {
    type Id = PartyId;

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
pub struct CreateParty {
    pub party_id: PartyId,
    pub kind: PartyKind,
    pub identity: Identity,
    pub realm_id: Option<RealmId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateIdentity {
    pub party_id: PartyId,
    pub identity: Identity,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignGuardian {
    pub party_id: PartyId,
    pub guardian: EntityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAutonomy {
    pub party_id: PartyId,
    pub autonomy: u8,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PartyCommand {
    Create(CreateParty),
    UpdateIdentity(UpdateIdentity),
    AssignGuardian(AssignGuardian),
    SetAutonomy(SetAutonomy),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyCreated {
    pub party_id: PartyId,
    pub kind: PartyKind,
    pub identity: Identity,
    pub realm_id: Option<RealmId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUpdated {
    pub party_id: PartyId,
    pub identity: Identity,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianAssigned {
    pub party_id: PartyId,
    pub guardian: EntityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutonomyChanged {
    pub party_id: PartyId,
    pub autonomy: u8,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyEvent {
    Created(PartyCreated),
    IdentityUpdated(IdentityUpdated),
    GuardianAssigned(GuardianAssigned),
    AutonomyChanged(AutonomyChanged),
}

impl Event for PartyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PartyEvent::Created(_) => "party.created",
            PartyEvent::IdentityUpdated(_) => "party.identity_updated",
            PartyEvent::GuardianAssigned(_) => "party.guardian_assigned",
            PartyEvent::AutonomyChanged(_) => "party.autonomy_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PartyEvent::Created(e) => e.occurred_at,
            PartyEvent::IdentityUpdated(e) => e.occurred_at,
            PartyEvent::GuardianAssigned(e) => e.occurred_at,
            PartyEvent::AutonomyChanged(e) => e.occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for Party {
    type Command = PartyCommand;
    type Event = PartyEvent;
    type Error = DomainError;

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PartyCommand::Create(cmd) => self.handle_create(cmd),
            PartyCommand::UpdateIdentity(cmd) => self.handle_update_identity(cmd),
            PartyCommand::AssignGuardian(cmd) => self.handle_assign_guardian(cmd),
            PartyCommand::SetAutonomy(cmd) => self.handle_set_autonomy(cmd),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PartyEvent::Created(e) => self.apply_created(e),
            PartyEvent::IdentityUpdated(e) => self.apply_identity_updated(e),
            PartyEvent::GuardianAssigned(e) => self.apply_guardian_assigned(e),
            PartyEvent::AutonomyChanged(e) => self.apply_autonomy_changed(e),
        }
        self.version += 1;
    }
}

impl Party {
    // ─────────────────────────────────────────────────────────────────────────
    // Command handlers
    // ─────────────────────────────────────────────────────────────────────────

    fn handle_create(&self, cmd: &CreateParty) -> Result<Vec<PartyEvent>, DomainError> {
        if self.created {
            return Err(DomainError::already_exists("party already registered"));
        }

        if cmd.identity.name.trim().is_empty() {
            return Err(DomainError::validation("party name cannot be empty"));
        }

        Ok(vec![PartyEvent::Created(PartyCreated {
            party_id: cmd.party_id,
            kind: cmd.kind,
            identity: Identity {
                name: cmd.identity.name.trim().to_string(),
                identifiers: cmd.identity.identifiers.clone(),
                contacts: cmd.identity.contacts.clone(),
            },
            realm_id: cmd.realm_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_identity(&self, cmd: &UpdateIdentity) -> Result<Vec<PartyEvent>, DomainError> {
        self.ensure_created()?;

        if cmd.identity.name.trim().is_empty() {
            return Err(DomainError::validation("party name cannot be empty"));
        }

        Ok(vec![PartyEvent::IdentityUpdated(IdentityUpdated {
            party_id: cmd.party_id,
            identity: cmd.identity.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_guardian(
        &self,
        cmd: &AssignGuardian,
    ) -> Result<Vec<PartyEvent>, DomainError> {
        self.ensure_created()?;

        if EntityId::from(self.id) == cmd.guardian {
            return Err(DomainError::invariant("a party cannot be its own guardian"));
        }

        if self.kind == PartyKind::System {
            return Err(DomainError::invariant("system parties have no guardian"));
        }

        Ok(vec![PartyEvent::GuardianAssigned(GuardianAssigned {
            party_id: cmd.party_id,
            guardian: cmd.guardian,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_autonomy(&self, cmd: &SetAutonomy) -> Result<Vec<PartyEvent>, DomainError> {
        self.ensure_created()?;

        if self.kind != PartyKind::Agent {
            return Err(DomainError::invariant(
                "autonomy levels apply to agents only",
            ));
        }

        if cmd.autonomy > 100 {
            return Err(DomainError::validation("autonomy must be within 0..=100"));
        }

        Ok(vec![PartyEvent::AutonomyChanged(AutonomyChanged {
            party_id: cmd.party_id,
            autonomy: cmd.autonomy,
            occurred_at: cmd.occurred_at,
        })])
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event appliers
    // ─────────────────────────────────────────────────────────────────────────

    fn apply_created(&mut self, e: &PartyCreated) {
        self.id = e.party_id;
        self.kind = e.kind;
        self.identity = e.identity.clone();
        self.realm_id = e.realm_id;
        self.created_at = Some(e.occurred_at);
        self.created = true;
    }

    fn apply_identity_updated(&mut self, e: &IdentityUpdated) {
        self.identity = e.identity.clone();
    }

    fn apply_guardian_assigned(&mut self, e: &GuardianAssigned) {
        self.guardian = Some(e.guardian);
    }

    fn apply_autonomy_changed(&mut self, e: &AutonomyChanged) {
        self.autonomy = Some(e.autonomy);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_party(kind: PartyKind) -> Party {
        let id = PartyId::new();
        let mut party = Party::empty(id);
        let cmd = PartyCommand::Create(CreateParty {
            party_id: id,
            kind,
            identity: Identity::named("Ada"),
            realm_id: Some(RealmId::new()),
            occurred_at: now(),
        });
        for event in party.handle(&cmd).unwrap() {
            party.apply(&event);
        }
        party
    }

    #[test]
    fn create_party_success() {
        let id = PartyId::new();
        let party = Party::empty(id);

        let cmd = PartyCommand::Create(CreateParty {
            party_id: id,
            kind: PartyKind::Person,
            identity: Identity::named("  Ada Lovelace  "),
            realm_id: None,
            occurred_at: now(),
        });

        let events = party.handle(&cmd).unwrap();
        assert_eq!(events.len(), 1);

        let PartyEvent::Created(e) = &events[0] else {
            panic!("expected PartyCreated event");
        };
        assert_eq!(e.identity.name, "Ada Lovelace");
    }

    #[test]
    fn create_rejects_empty_name() {
        let id = PartyId::new();
        let party = Party::empty(id);

        let cmd = PartyCommand::Create(CreateParty {
            party_id: id,
            kind: PartyKind::Person,
            identity: Identity::named("   "),
            realm_id: None,
            occurred_at: now(),
        });

        assert!(party.handle(&cmd).is_err());
    }

    #[test]
    fn create_twice_rejected() {
        let party = created_party(PartyKind::Person);
        let cmd = PartyCommand::Create(CreateParty {
            party_id: party.id,
            kind: PartyKind::Person,
            identity: Identity::named("Again"),
            realm_id: None,
            occurred_at: now(),
        });

        let result = party.handle(&cmd);
        assert!(matches!(result, Err(DomainError::AlreadyExists(_))));
    }

    #[test]
    fn autonomy_only_for_agents() {
        let person = created_party(PartyKind::Person);
        let cmd = PartyCommand::SetAutonomy(SetAutonomy {
            party_id: person.id,
            autonomy: 50,
            occurred_at: now(),
        });
        assert!(person.handle(&cmd).is_err());

        let mut agent = created_party(PartyKind::Agent);
        let cmd = PartyCommand::SetAutonomy(SetAutonomy {
            party_id: agent.id,
            autonomy: 50,
            occurred_at: now(),
        });
        for event in agent.handle(&cmd).unwrap() {
            agent.apply(&event);
        }
        assert_eq!(agent.autonomy, Some(50));
    }

    #[test]
    fn guardian_cannot_be_self() {
        let party = created_party(PartyKind::Person);
        let cmd = PartyCommand::AssignGuardian(AssignGuardian {
            party_id: party.id,
            guardian: EntityId::from(party.id),
            occurred_at: now(),
        });
        assert!(party.handle(&cmd).is_err());
    }

    #[test]
    fn version_tracks_applied_events() {
        let mut party = created_party(PartyKind::Person);
        assert_eq!(party.version, 1);

        let cmd = PartyCommand::UpdateIdentity(UpdateIdentity {
            party_id: party.id,
            identity: Identity::named("Renamed"),
            occurred_at: now(),
        });
        for event in party.handle(&cmd).unwrap() {
            party.apply(&event);
        }
        assert_eq!(party.version, 2);
        assert_eq!(party.identity.name, "Renamed");
    }
}
