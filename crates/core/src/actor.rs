//! The actor recorded on every event.

use serde::{Deserialize, Serialize};

use crate::id::EntityId;

/// Who performed an action. Every appended event carries exactly one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Actor {
    /// A registered entity (person, organization, agent).
    Entity { entity_id: EntityId },
    /// The system itself (bootstrap, hook-originated emissions).
    System { system_id: EntityId },
    /// An unauthenticated caller; `reason` records why this was allowed.
    Anonymous { reason: String },
}

impl Actor {
    pub fn entity(entity_id: EntityId) -> Self {
        Actor::Entity { entity_id }
    }

    pub fn system(system_id: EntityId) -> Self {
        Actor::System { system_id }
    }

    pub fn anonymous(reason: impl Into<String>) -> Self {
        Actor::Anonymous {
            reason: reason.into(),
        }
    }

    /// System actors bypass authorization (bootstrap paths only).
    pub fn is_system(&self) -> bool {
        matches!(self, Actor::System { .. })
    }

    /// The acting entity, when the actor is a registered entity.
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Actor::Entity { entity_id } => Some(*entity_id),
            _ => None,
        }
    }

    /// Stable key for per-actor bookkeeping (idempotency cache, rate buckets).
    pub fn cache_key(&self) -> String {
        match self {
            Actor::Entity { entity_id } => format!("entity:{entity_id}"),
            Actor::System { system_id } => format!("system:{system_id}"),
            Actor::Anonymous { .. } => "anonymous".to_string(),
        }
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Actor::Entity { entity_id } => write!(f, "entity:{entity_id}"),
            Actor::System { system_id } => write!(f, "system:{system_id}"),
            Actor::Anonymous { reason } => write!(f, "anonymous({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_is_tagged() {
        let actor = Actor::entity(EntityId::new());
        let value = serde_json::to_value(&actor).unwrap();
        assert_eq!(value["type"], "Entity");
        assert!(value["entity_id"].is_string());
    }

    #[test]
    fn system_bypass_flag() {
        assert!(Actor::system(EntityId::new()).is_system());
        assert!(!Actor::anonymous("probe").is_system());
    }
}
