//! Agreements: the unit of authority.
//!
//! Every relationship in the ledger (employment, a tenant license, service
//! delivery, API access) is an agreement between parties. Permissions are
//! never stored on a party: they derive from the set of active agreements
//! naming it, through the role grants declared by each agreement type.

pub mod agreement;
pub mod registry;

pub use agreement::{
    Agreement, AgreementCommand, AgreementEvent, AgreementId, AgreementStatus, Consent,
    ConsentMethod, DisputeResolution, OpenDispute, PartyRef, ProposeAgreement, RecordConsent,
    RejectProposal, ResolveDispute, Terminate, Validity,
};
pub use registry::{
    AgreementTypeDefinition, AgreementTypeRegistry, ConsentQuorum, HookEmission, LifecycleHook,
    RoleSpec,
};
