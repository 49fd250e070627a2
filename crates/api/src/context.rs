//! Per-request actor context.

use covenant_core::{Actor, EntityId, RealmId};

/// Authenticated caller identity, resolved by the middleware.
///
/// System actors are never minted from the wire; bootstrap paths run
/// in-process only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    pub entity_id: EntityId,
    pub realm_id: RealmId,
    pub scopes: Vec<String>,
}

impl ActorContext {
    pub fn actor(&self) -> Actor {
        Actor::entity(self.entity_id)
    }
}
