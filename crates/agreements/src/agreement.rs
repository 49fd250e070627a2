//! Agreement aggregate (event-sourced).
//!
//! Lifecycle:
//!
//! ```text
//! Proposed ──(all required consents)──▶ Active
//! Proposed ──(any party rejects)─────▶ Terminated
//! Active   ──(terminate)─────────────▶ Terminated
//! Active   ──(dispute open)──────────▶ Disputed
//! Disputed ──(dispute resolve)───────▶ Active | Terminated | Resolved
//! ```
//!
//! Terminated and Resolved are terminal. Terminal agreements never grant
//! permissions, regardless of the timestamp asked about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use covenant_core::{Aggregate, AggregateId, AggregateRoot, DomainError, EntityId, RealmId};
use covenant_events::Event;

use crate::registry::ConsentQuorum;

// ─────────────────────────────────────────────────────────────────────────────
// Agreement ID
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for an agreement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgreementId(Uuid);

impl AgreementId {
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

impl Default for AgreementId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for AgreementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<AggregateId> for AgreementId {
    fn from(value: AggregateId) -> Self {
        Self(*value.as_uuid())
    }
}

impl From<AgreementId> for AggregateId {
    fn from(value: AgreementId) -> Self {
        AggregateId::from_uuid(value.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value objects
// ─────────────────────────────────────────────────────────────────────────────

/// How a party expressed (or must express) consent.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentMethod {
    /// Consent assumed from the act of proposing.
    Implicit,
    /// Deliberate consent intent.
    Explicit,
    /// Consent backed by an external signature reference.
    Signature,
}

/// A single recorded consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    pub method: ConsentMethod,
    pub consented_at: DateTime<Utc>,
}

/// A party named on an agreement, with its role and consents so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyRef {
    pub entity_id: EntityId,
    pub role: String,
    #[serde(default)]
    pub consents: Vec<Consent>,
}

impl PartyRef {
    pub fn new(entity_id: EntityId, role: impl Into<String>) -> Self {
        Self {
            entity_id,
            role: role.into(),
            consents: Vec::new(),
        }
    }

    pub fn has_consented(&self) -> bool {
        !self.consents.is_empty()
    }

    pub fn has_deliberate_consent(&self) -> bool {
        self.consents
            .iter()
            .any(|c| matches!(c.method, ConsentMethod::Explicit | ConsentMethod::Signature))
    }
}

/// Validity window. Open ends mean unbounded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Validity {
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_until: Option<DateTime<Utc>>,
}

impl Validity {
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        if let Some(from) = self.effective_from {
            if at < from {
                return false;
            }
        }
        if let Some(until) = self.effective_until {
            if at > until {
                return false;
            }
        }
        true
    }
}

/// Agreement lifecycle status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgreementStatus {
    Proposed,
    Active,
    Terminated,
    Disputed,
    /// Dispute closed with a settlement; terminal like Terminated.
    Resolved,
}

impl AgreementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgreementStatus::Terminated | AgreementStatus::Resolved)
    }
}

/// Outcome of a dispute resolution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeResolution {
    /// The agreement continues as if never disputed.
    Reinstate,
    /// The agreement ends.
    Terminate,
    /// The dispute closes with a settlement; the agreement ends as Resolved.
    Settle,
}

impl DisputeResolution {
    pub fn resulting_status(&self) -> AgreementStatus {
        match self {
            DisputeResolution::Reinstate => AgreementStatus::Active,
            DisputeResolution::Terminate => AgreementStatus::Terminated,
            DisputeResolution::Settle => AgreementStatus::Resolved,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agreement aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// Agreement aggregate.
///
/// # Invariants
/// - Status transitions follow the lifecycle state machine.
/// - Only named parties can consent, reject, or open disputes.
/// - Activation happens exactly when the consent quorum is met.
/// - Terminal statuses accept no further meaningful transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agreement {
    pub id: AgreementId,
    pub agreement_type: String,
    pub parties: Vec<PartyRef>,
    pub terms: JsonValue,
    pub assets: Vec<AggregateId>,
    pub validity: Validity,
    pub status: AgreementStatus,
    pub realm_id: Option<RealmId>,
    pub parent_agreement_id: Option<AgreementId>,
    /// Quorum captured from the type definition at proposal time, so the
    /// fold stays deterministic even if the registry changes later.
    pub quorum: ConsentQuorum,
    pub version: u64,
    pub created: bool,
}

impl Agreement {
    pub fn empty(id: AgreementId) -> Self {
        Self {
            id,
            agreement_type: String::new(),
            parties: Vec::new(),
            terms: JsonValue::Null,
            assets: Vec::new(),
            validity: Validity::default(),
            status: AgreementStatus::Proposed,
            realm_id: None,
            parent_agreement_id: None,
            quorum: ConsentQuorum::AllParties,
            version: 0,
            created: false,
        }
    }

    /// Is this agreement granting authority at `at`?
    pub fn grants_at(&self, at: DateTime<Utc>) -> bool {
        self.created && self.status == AgreementStatus::Active && self.validity.covers(at)
    }

    pub fn party(&self, entity_id: EntityId) -> Option<&PartyRef> {
        self.parties.iter().find(|p| p.entity_id == entity_id)
    }

    pub fn role_of(&self, entity_id: EntityId) -> Option<&str> {
        self.party(entity_id).map(|p| p.role.as_str())
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    fn ensure_party(&self, entity_id: EntityId) -> Result<(), DomainError> {
        if self.party(entity_id).is_none() {
            return Err(DomainError::invariant(
                "entity is not a party to this agreement",
            ));
        }
        Ok(())
    }

    fn quorum_met(parties: &[PartyRef], quorum: ConsentQuorum) -> bool {
        match quorum {
            ConsentQuorum::AllParties => parties.iter().all(PartyRef::has_consented),
            ConsentQuorum::AllPartiesExplicit => {
                parties.iter().all(PartyRef::has_deliberate_consent)
            }
            ConsentQuorum::AtLeast(n) => {
                parties.iter().filter(|p| p.has_consented()).count() as u32 >= n
            }
        }
    }
}

impl AggregateRoot for Agreement {
    type Id = AgreementId;

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
pub struct ProposeAgreement {
    pub agreement_id: AgreementId,
    pub agreement_type: String,
    /// Parties may carry pre-filled consents (e.g. implicit proposer consent
    /// when the agreement type allows it).
    pub parties: Vec<PartyRef>,
    pub terms: JsonValue,
    pub assets: Vec<AggregateId>,
    pub validity: Validity,
    pub realm_id: Option<RealmId>,
    pub parent_agreement_id: Option<AgreementId>,
    pub quorum: ConsentQuorum,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConsent {
    pub agreement_id: AgreementId,
    pub entity_id: EntityId,
    pub method: ConsentMethod,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectProposal {
    pub agreement_id: AgreementId,
    pub entity_id: EntityId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Terminate {
    pub agreement_id: AgreementId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDispute {
    pub agreement_id: AgreementId,
    pub entity_id: EntityId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveDispute {
    pub agreement_id: AgreementId,
    pub resolution: DisputeResolution,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgreementCommand {
    Propose(ProposeAgreement),
    Consent(RecordConsent),
    Reject(RejectProposal),
    Terminate(Terminate),
    OpenDispute(OpenDispute),
    ResolveDispute(ResolveDispute),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgreementEvent {
    Proposed {
        agreement_id: AgreementId,
        agreement_type: String,
        parties: Vec<PartyRef>,
        terms: JsonValue,
        assets: Vec<AggregateId>,
        validity: Validity,
        realm_id: Option<RealmId>,
        parent_agreement_id: Option<AgreementId>,
        quorum: ConsentQuorum,
        occurred_at: DateTime<Utc>,
    },
    PartyConsented {
        agreement_id: AgreementId,
        entity_id: EntityId,
        method: ConsentMethod,
        occurred_at: DateTime<Utc>,
    },
    Activated {
        agreement_id: AgreementId,
        occurred_at: DateTime<Utc>,
    },
    Rejected {
        agreement_id: AgreementId,
        entity_id: EntityId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Terminated {
        agreement_id: AgreementId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    DisputeOpened {
        agreement_id: AgreementId,
        entity_id: EntityId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    DisputeResolved {
        agreement_id: AgreementId,
        resolution: DisputeResolution,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for AgreementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AgreementEvent::Proposed { .. } => "agreement.proposed",
            AgreementEvent::PartyConsented { .. } => "agreement.party_consented",
            AgreementEvent::Activated { .. } => "agreement.activated",
            AgreementEvent::Rejected { .. } => "agreement.rejected",
            AgreementEvent::Terminated { .. } => "agreement.terminated",
            AgreementEvent::DisputeOpened { .. } => "agreement.dispute_opened",
            AgreementEvent::DisputeResolved { .. } => "agreement.dispute_resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AgreementEvent::Proposed { occurred_at, .. }
            | AgreementEvent::PartyConsented { occurred_at, .. }
            | AgreementEvent::Activated { occurred_at, .. }
            | AgreementEvent::Rejected { occurred_at, .. }
            | AgreementEvent::Terminated { occurred_at, .. }
            | AgreementEvent::DisputeOpened { occurred_at, .. }
            | AgreementEvent::DisputeResolved { occurred_at, .. } => *occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for Agreement {
    type Command = AgreementCommand;
    type Event = AgreementEvent;
    type Error = DomainError;

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AgreementCommand::Propose(cmd) => self.handle_propose(cmd),
            AgreementCommand::Consent(cmd) => self.handle_consent(cmd),
            AgreementCommand::Reject(cmd) => self.handle_reject(cmd),
            AgreementCommand::Terminate(cmd) => self.handle_terminate(cmd),
            AgreementCommand::OpenDispute(cmd) => self.handle_open_dispute(cmd),
            AgreementCommand::ResolveDispute(cmd) => self.handle_resolve_dispute(cmd),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AgreementEvent::Proposed {
                agreement_id,
                agreement_type,
                parties,
                terms,
                assets,
                validity,
                realm_id,
                parent_agreement_id,
                quorum,
                ..
            } => {
                self.id = *agreement_id;
                self.agreement_type = agreement_type.clone();
                self.parties = parties.clone();
                self.terms = terms.clone();
                self.assets = assets.clone();
                self.validity = *validity;
                self.realm_id = *realm_id;
                self.parent_agreement_id = *parent_agreement_id;
                self.quorum = *quorum;
                self.status = AgreementStatus::Proposed;
                self.created = true;
            }
            AgreementEvent::PartyConsented {
                entity_id,
                method,
                occurred_at,
                ..
            } => {
                if let Some(party) = self.parties.iter_mut().find(|p| p.entity_id == *entity_id) {
                    party.consents.push(Consent {
                        method: *method,
                        consented_at: *occurred_at,
                    });
                }
            }
            AgreementEvent::Activated { .. } => {
                self.status = AgreementStatus::Active;
            }
            AgreementEvent::Rejected { .. } | AgreementEvent::Terminated { .. } => {
                self.status = AgreementStatus::Terminated;
            }
            AgreementEvent::DisputeOpened { .. } => {
                self.status = AgreementStatus::Disputed;
            }
            AgreementEvent::DisputeResolved { resolution, .. } => {
                self.status = resolution.resulting_status();
            }
        }
        self.version += 1;
    }
}

impl Agreement {
    // ─────────────────────────────────────────────────────────────────────────
    // Command handlers
    // ─────────────────────────────────────────────────────────────────────────

    fn handle_propose(&self, cmd: &ProposeAgreement) -> Result<Vec<AgreementEvent>, DomainError> {
        // Re-proposing is allowed while still Proposed: the new event
        // amends the proposal (terms and parties replaced, consents reset).
        if self.created && self.status != AgreementStatus::Proposed {
            return Err(DomainError::already_exists(format!(
                "agreement already exists with status {:?}",
                self.status
            )));
        }

        if cmd.agreement_type.trim().is_empty() {
            return Err(DomainError::validation("agreement type cannot be empty"));
        }

        if cmd.parties.is_empty() {
            return Err(DomainError::validation(
                "an agreement needs at least one party",
            ));
        }

        let mut seen = Vec::with_capacity(cmd.parties.len());
        for party in &cmd.parties {
            if seen.contains(&party.entity_id) {
                return Err(DomainError::validation(
                    "an entity appears more than once in the party list",
                ));
            }
            seen.push(party.entity_id);
        }

        if let (Some(from), Some(until)) =
            (cmd.validity.effective_from, cmd.validity.effective_until)
        {
            if until <= from {
                return Err(DomainError::validation(
                    "validity window ends before it begins",
                ));
            }
        }

        let mut events = vec![AgreementEvent::Proposed {
            agreement_id: cmd.agreement_id,
            agreement_type: cmd.agreement_type.clone(),
            parties: cmd.parties.clone(),
            terms: cmd.terms.clone(),
            assets: cmd.assets.clone(),
            validity: cmd.validity,
            realm_id: cmd.realm_id,
            parent_agreement_id: cmd.parent_agreement_id,
            quorum: cmd.quorum,
            occurred_at: cmd.occurred_at,
        }];

        // Pre-filled consents may already satisfy the quorum (single-party
        // or fully implicit agreements activate on proposal).
        if Self::quorum_met(&cmd.parties, cmd.quorum) {
            events.push(AgreementEvent::Activated {
                agreement_id: cmd.agreement_id,
                occurred_at: cmd.occurred_at,
            });
        }

        Ok(events)
    }

    fn handle_consent(&self, cmd: &RecordConsent) -> Result<Vec<AgreementEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_party(cmd.entity_id)?;

        if self.status != AgreementStatus::Proposed {
            return Err(DomainError::lifecycle(format!(
                "cannot consent while {:?}",
                self.status
            )));
        }

        let mut events = vec![AgreementEvent::PartyConsented {
            agreement_id: cmd.agreement_id,
            entity_id: cmd.entity_id,
            method: cmd.method,
            occurred_at: cmd.occurred_at,
        }];

        // Would this consent complete the quorum?
        let mut projected = self.parties.clone();
        if let Some(party) = projected.iter_mut().find(|p| p.entity_id == cmd.entity_id) {
            party.consents.push(Consent {
                method: cmd.method,
                consented_at: cmd.occurred_at,
            });
        }
        if Self::quorum_met(&projected, self.quorum) {
            events.push(AgreementEvent::Activated {
                agreement_id: cmd.agreement_id,
                occurred_at: cmd.occurred_at,
            });
        }

        Ok(events)
    }

    fn handle_reject(&self, cmd: &RejectProposal) -> Result<Vec<AgreementEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_party(cmd.entity_id)?;

        if self.status != AgreementStatus::Proposed {
            return Err(DomainError::lifecycle(format!(
                "cannot reject while {:?}",
                self.status
            )));
        }

        Ok(vec![AgreementEvent::Rejected {
            agreement_id: cmd.agreement_id,
            entity_id: cmd.entity_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_terminate(&self, cmd: &Terminate) -> Result<Vec<AgreementEvent>, DomainError> {
        self.ensure_created()?;

        // Terminating an already-terminal agreement is a no-op, not an error.
        if self.status.is_terminal() {
            return Ok(vec![]);
        }

        if self.status != AgreementStatus::Active {
            return Err(DomainError::lifecycle(format!(
                "cannot terminate while {:?}",
                self.status
            )));
        }

        Ok(vec![AgreementEvent::Terminated {
            agreement_id: cmd.agreement_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_open_dispute(&self, cmd: &OpenDispute) -> Result<Vec<AgreementEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_party(cmd.entity_id)?;

        if self.status != AgreementStatus::Active {
            return Err(DomainError::lifecycle(format!(
                "cannot open a dispute while {:?}",
                self.status
            )));
        }

        Ok(vec![AgreementEvent::DisputeOpened {
            agreement_id: cmd.agreement_id,
            entity_id: cmd.entity_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_resolve_dispute(
        &self,
        cmd: &ResolveDispute,
    ) -> Result<Vec<AgreementEvent>, DomainError> {
        self.ensure_created()?;

        if self.status != AgreementStatus::Disputed {
            return Err(DomainError::lifecycle(format!(
                "cannot resolve a dispute while {:?}",
                self.status
            )));
        }

        Ok(vec![AgreementEvent::DisputeResolved {
            agreement_id: cmd.agreement_id,
            resolution: cmd.resolution,
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
    use proptest::prelude::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn two_party_proposal(quorum: ConsentQuorum) -> (Agreement, EntityId, EntityId) {
        let id = AgreementId::new();
        let a = EntityId::new();
        let b = EntityId::new();
        let mut agreement = Agreement::empty(id);

        let cmd = AgreementCommand::Propose(ProposeAgreement {
            agreement_id: id,
            agreement_type: "employment".to_string(),
            parties: vec![PartyRef::new(a, "employer"), PartyRef::new(b, "employee")],
            terms: json!({"salary": 1}),
            assets: vec![],
            validity: Validity::default(),
            realm_id: None,
            parent_agreement_id: None,
            quorum,
            occurred_at: now(),
        });

        for event in agreement.handle(&cmd).unwrap() {
            agreement.apply(&event);
        }
        (agreement, a, b)
    }

    fn consent(agreement: &mut Agreement, entity: EntityId) -> Vec<AgreementEvent> {
        let cmd = AgreementCommand::Consent(RecordConsent {
            agreement_id: agreement.id,
            entity_id: entity,
            method: ConsentMethod::Explicit,
            occurred_at: now(),
        });
        let events = agreement.handle(&cmd).unwrap();
        for event in &events {
            agreement.apply(event);
        }
        events
    }

    #[test]
    fn activates_when_all_parties_consent() {
        let (mut agreement, a, b) = two_party_proposal(ConsentQuorum::AllParties);
        assert_eq!(agreement.status, AgreementStatus::Proposed);

        let events = consent(&mut agreement, a);
        assert_eq!(events.len(), 1);
        assert_eq!(agreement.status, AgreementStatus::Proposed);

        let events = consent(&mut agreement, b);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], AgreementEvent::Activated { .. }));
        assert_eq!(agreement.status, AgreementStatus::Active);
    }

    #[test]
    fn prefilled_consents_can_activate_on_proposal() {
        let id = AgreementId::new();
        let licensor = EntityId::new();
        let mut proposer = PartyRef::new(licensor, "licensor");
        proposer.consents.push(Consent {
            method: ConsentMethod::Implicit,
            consented_at: now(),
        });

        let agreement = Agreement::empty(id);
        let cmd = AgreementCommand::Propose(ProposeAgreement {
            agreement_id: id,
            agreement_type: "tenant-license".to_string(),
            parties: vec![proposer],
            terms: json!({}),
            assets: vec![],
            validity: Validity::default(),
            realm_id: None,
            parent_agreement_id: None,
            quorum: ConsentQuorum::AllParties,
            occurred_at: now(),
        });

        let events = agreement.handle(&cmd).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], AgreementEvent::Activated { .. }));
    }

    #[test]
    fn reproposal_amends_while_proposed_but_not_after() {
        let (mut agreement, a, b) = two_party_proposal(ConsentQuorum::AllParties);

        // Amend: still Proposed, so a fresh proposal replaces the old one.
        let amend = AgreementCommand::Propose(ProposeAgreement {
            agreement_id: agreement.id,
            agreement_type: "employment".to_string(),
            parties: vec![PartyRef::new(a, "employer"), PartyRef::new(b, "employee")],
            terms: json!({"salary": 2}),
            assets: vec![],
            validity: Validity::default(),
            realm_id: None,
            parent_agreement_id: None,
            quorum: ConsentQuorum::AllParties,
            occurred_at: now(),
        });
        for event in agreement.handle(&amend).unwrap() {
            agreement.apply(&event);
        }
        assert_eq!(agreement.terms, json!({"salary": 2}));
        assert_eq!(agreement.version, 2);

        // Once active, re-proposal is refused.
        consent(&mut agreement, a);
        consent(&mut agreement, b);
        assert!(matches!(
            agreement.handle(&amend),
            Err(DomainError::AlreadyExists(_))
        ));
    }

    #[test]
    fn rejection_terminates_a_proposal() {
        let (mut agreement, _a, b) = two_party_proposal(ConsentQuorum::AllParties);

        let cmd = AgreementCommand::Reject(RejectProposal {
            agreement_id: agreement.id,
            entity_id: b,
            reason: "terms unacceptable".to_string(),
            occurred_at: now(),
        });
        for event in agreement.handle(&cmd).unwrap() {
            agreement.apply(&event);
        }
        assert_eq!(agreement.status, AgreementStatus::Terminated);
    }

    #[test]
    fn non_party_cannot_consent() {
        let (agreement, _a, _b) = two_party_proposal(ConsentQuorum::AllParties);
        let cmd = AgreementCommand::Consent(RecordConsent {
            agreement_id: agreement.id,
            entity_id: EntityId::new(),
            method: ConsentMethod::Explicit,
            occurred_at: now(),
        });
        assert!(agreement.handle(&cmd).is_err());
    }

    #[test]
    fn explicit_quorum_ignores_implicit_consents() {
        let (mut agreement, a, b) = two_party_proposal(ConsentQuorum::AllPartiesExplicit);

        let cmd = AgreementCommand::Consent(RecordConsent {
            agreement_id: agreement.id,
            entity_id: a,
            method: ConsentMethod::Implicit,
            occurred_at: now(),
        });
        for event in agreement.handle(&cmd).unwrap() {
            agreement.apply(&event);
        }
        assert_eq!(agreement.status, AgreementStatus::Proposed);

        consent(&mut agreement, b);
        // a's consent was implicit, so explicit quorum still unmet.
        assert_eq!(agreement.status, AgreementStatus::Proposed);

        consent(&mut agreement, a);
        assert_eq!(agreement.status, AgreementStatus::Active);
    }

    #[test]
    fn dispute_cycle_reinstates_or_ends() {
        let (mut agreement, a, b) = two_party_proposal(ConsentQuorum::AllParties);
        consent(&mut agreement, a);
        consent(&mut agreement, b);
        assert_eq!(agreement.status, AgreementStatus::Active);

        let open = AgreementCommand::OpenDispute(OpenDispute {
            agreement_id: agreement.id,
            entity_id: a,
            reason: "delivery missed".to_string(),
            occurred_at: now(),
        });
        for event in agreement.handle(&open).unwrap() {
            agreement.apply(&event);
        }
        assert_eq!(agreement.status, AgreementStatus::Disputed);

        let resolve = AgreementCommand::ResolveDispute(ResolveDispute {
            agreement_id: agreement.id,
            resolution: DisputeResolution::Reinstate,
            occurred_at: now(),
        });
        for event in agreement.handle(&resolve).unwrap() {
            agreement.apply(&event);
        }
        assert_eq!(agreement.status, AgreementStatus::Active);
    }

    #[test]
    fn terminate_is_idempotent_on_terminal_agreements() {
        let (mut agreement, a, b) = two_party_proposal(ConsentQuorum::AllParties);
        consent(&mut agreement, a);
        consent(&mut agreement, b);

        let cmd = AgreementCommand::Terminate(Terminate {
            agreement_id: agreement.id,
            reason: "done".to_string(),
            occurred_at: now(),
        });
        for event in agreement.handle(&cmd).unwrap() {
            agreement.apply(&event);
        }
        assert_eq!(agreement.status, AgreementStatus::Terminated);

        // Second terminate: no events, no error.
        assert!(agreement.handle(&cmd).unwrap().is_empty());
    }

    #[test]
    fn terminated_agreement_grants_nothing() {
        let (mut agreement, a, b) = two_party_proposal(ConsentQuorum::AllParties);
        consent(&mut agreement, a);
        consent(&mut agreement, b);
        assert!(agreement.grants_at(now()));

        let cmd = AgreementCommand::Terminate(Terminate {
            agreement_id: agreement.id,
            reason: "over".to_string(),
            occurred_at: now(),
        });
        for event in agreement.handle(&cmd).unwrap() {
            agreement.apply(&event);
        }
        assert!(!agreement.grants_at(now()));
    }

    // Any interleaving of consents, rejections, disputes and terminations
    // keeps the status inside the lifecycle state machine.
    proptest! {
        #[test]
        fn status_never_leaves_the_state_machine(ops in proptest::collection::vec(0u8..6, 1..40)) {
            let (mut agreement, a, b) = two_party_proposal(ConsentQuorum::AllParties);

            for op in ops {
                let before = agreement.status;
                let cmd = match op {
                    0 => AgreementCommand::Consent(RecordConsent {
                        agreement_id: agreement.id,
                        entity_id: a,
                        method: ConsentMethod::Explicit,
                        occurred_at: now(),
                    }),
                    1 => AgreementCommand::Consent(RecordConsent {
                        agreement_id: agreement.id,
                        entity_id: b,
                        method: ConsentMethod::Explicit,
                        occurred_at: now(),
                    }),
                    2 => AgreementCommand::Reject(RejectProposal {
                        agreement_id: agreement.id,
                        entity_id: b,
                        reason: "no".to_string(),
                        occurred_at: now(),
                    }),
                    3 => AgreementCommand::Terminate(Terminate {
                        agreement_id: agreement.id,
                        reason: "end".to_string(),
                        occurred_at: now(),
                    }),
                    4 => AgreementCommand::OpenDispute(OpenDispute {
                        agreement_id: agreement.id,
                        entity_id: a,
                        reason: "hm".to_string(),
                        occurred_at: now(),
                    }),
                    _ => AgreementCommand::ResolveDispute(ResolveDispute {
                        agreement_id: agreement.id,
                        resolution: DisputeResolution::Reinstate,
                        occurred_at: now(),
                    }),
                };

                if let Ok(events) = agreement.handle(&cmd) {
                    for event in events {
                        agreement.apply(&event);
                        let after = agreement.status;
                        let legal = matches!(
                            (before, after),
                            (AgreementStatus::Proposed, AgreementStatus::Proposed)
                                | (AgreementStatus::Proposed, AgreementStatus::Active)
                                | (AgreementStatus::Proposed, AgreementStatus::Terminated)
                                | (AgreementStatus::Active, AgreementStatus::Terminated)
                                | (AgreementStatus::Active, AgreementStatus::Disputed)
                                | (AgreementStatus::Disputed, AgreementStatus::Active)
                                | (AgreementStatus::Disputed, AgreementStatus::Terminated)
                                | (AgreementStatus::Disputed, AgreementStatus::Resolved)
                                | (AgreementStatus::Active, AgreementStatus::Active)
                        );
                        prop_assert!(legal, "illegal transition {:?} -> {:?}", before, after);
                    }
                }
            }
        }
    }
}
