//! Parties: people, organizations, agents and system principals.

pub mod party;

pub use party::{
    AssignGuardian, CreateParty, Identity, Party, PartyCommand, PartyCreated, PartyEvent, PartyId,
    PartyKind, SetAutonomy, UpdateIdentity,
};
