//! First-run bootstrap: the primordial realm and its founder.
//!
//! Runs only against an empty log. The founder is a System party with a
//! fixed id; the primordial realm is a Realm container with a fixed id.
//! Both ids come from configuration so every deployment of the same
//! configuration converges on the same aggregates.

use std::str::FromStr;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use covenant_core::{Actor, EntityId, RealmId};

use crate::event_store::EventStore;
use crate::intents::{ErrorCode, IntentDispatcher, IntentError, IntentRequest};

/// Fixed UUIDs by default; override per deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub primordial_realm_id: RealmId,
    pub primordial_system_id: EntityId,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            primordial_realm_id: RealmId::from_uuid(
                Uuid::from_str("00000000-0000-7000-8000-000000000001").expect("constant uuid"),
            ),
            primordial_system_id: EntityId::from_uuid(
                Uuid::from_str("00000000-0000-7000-8000-000000000002").expect("constant uuid"),
            ),
        }
    }
}

/// Create the primordial realm + founder when the log is empty.
/// Returns whether anything was done.
pub async fn bootstrap(
    dispatcher: &IntentDispatcher,
    store: &dyn EventStore,
    config: &BootstrapConfig,
) -> Result<bool, IntentError> {
    if store.current_sequence().await? > 0 {
        return Ok(false);
    }

    let actor = Actor::system(config.primordial_system_id);

    let founder = dispatcher
        .dispatch(
            IntentRequest::new(
                "register",
                actor.clone(),
                json!({
                    "entity_id": config.primordial_system_id,
                    "kind": "System",
                    "name": "Primordial System",
                }),
            )
            .in_realm(config.primordial_realm_id),
        )
        .await;
    if !founder.success {
        return Err(founder
            .errors
            .first()
            .cloned()
            .unwrap_or_else(|| IntentError::new(ErrorCode::StorageError, "founder registration failed")));
    }

    let realm = dispatcher
        .dispatch(
            IntentRequest::new(
                "container:create",
                actor,
                json!({
                    "container_id": config.primordial_realm_id,
                    "realm_id": config.primordial_realm_id,
                    "name": "Primordial Realm",
                    "container_type": "Realm",
                    "owner_id": config.primordial_system_id,
                }),
            )
            .in_realm(config.primordial_realm_id),
        )
        .await;
    if !realm.success {
        return Err(realm
            .errors
            .first()
            .cloned()
            .unwrap_or_else(|| IntentError::new(ErrorCode::StorageError, "primordial realm creation failed")));
    }

    info!(
        realm = %config.primordial_realm_id,
        founder = %config.primordial_system_id,
        "bootstrapped primordial realm"
    );
    Ok(true)
}
