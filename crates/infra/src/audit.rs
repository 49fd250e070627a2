//! Audit logger: one immutable event per authorization decision.
//!
//! Every decision, grant or denial, lands in the log as a `System`
//! aggregate event, indistinguishable from business events, so the audit
//! trail replays and subscribes like everything else. Each decision gets a
//! fresh aggregate id at version 1: decisions are individually addressable
//! facts, not a mutable series.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use covenant_auth::AuthzDecision;
use covenant_core::{Actor, AggregateId, CommandId, EventId, RealmId};
use covenant_events::{AggregateType, CandidateEvent, RecordedEvent};

use crate::event_store::{EventStore, EventStoreError};

pub const AUTHORIZATION_GRANTED: &str = "authorization.granted";
pub const AUTHORIZATION_DENIED: &str = "authorization.denied";

/// Appends authorization decisions to the log.
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn EventStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Record one decision. For grants this MUST succeed before the
    /// handler's business events are appended (the trail proves authority
    /// preceded action); the dispatcher treats a failure here as fatal for
    /// the intent. Denial recording is best-effort.
    pub async fn record(
        &self,
        intent: &str,
        actor: &Actor,
        realm: Option<RealmId>,
        permission: &str,
        decision: &AuthzDecision,
        causation: Option<CommandId>,
        occurred_at: DateTime<Utc>,
    ) -> Result<RecordedEvent, EventStoreError> {
        let event_type = if decision.allowed {
            AUTHORIZATION_GRANTED
        } else {
            AUTHORIZATION_DENIED
        };

        let candidate = CandidateEvent {
            event_id: EventId::new(),
            aggregate_type: AggregateType::System,
            // One aggregate per decision.
            aggregate_id: AggregateId::new(),
            aggregate_version: 1,
            event_type: event_type.to_string(),
            event_schema_version: 1,
            occurred_at,
            actor: actor.clone(),
            payload: json!({
                "intent": intent,
                "permission": permission,
                "allowed": decision.allowed,
                "reason": decision.reason,
                "realm": realm,
                "evaluated_agreements": decision.evaluated_agreements,
                "granted_by": decision.granted_by,
            }),
            causation_command_id: causation,
        };

        self.store.append(candidate).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::EntityId;

    use crate::event_store::InMemoryEventStore;

    #[tokio::test]
    async fn grants_and_denials_land_as_system_events() {
        let store = Arc::new(InMemoryEventStore::new());
        let audit = AuditLogger::new(store.clone());
        let actor = Actor::entity(EntityId::new());

        let denied = AuthzDecision {
            allowed: false,
            reason: "no active agreement grants 'agreement:propose'".to_string(),
            evaluated_agreements: vec![],
            granted_by: vec![],
        };
        let recorded = audit
            .record(
                "agreement:propose",
                &actor,
                None,
                "agreement:propose",
                &denied,
                None,
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(recorded.event_type, AUTHORIZATION_DENIED);
        assert_eq!(recorded.aggregate_type, AggregateType::System);
        assert_eq!(recorded.aggregate_version, 1);
        assert_eq!(recorded.payload["permission"], "agreement:propose");

        let granted = AuthzDecision {
            allowed: true,
            reason: "granted".to_string(),
            evaluated_agreements: vec![],
            granted_by: vec![],
        };
        let recorded = audit
            .record(
                "asset:register",
                &actor,
                None,
                "asset:register",
                &granted,
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(recorded.event_type, AUTHORIZATION_GRANTED);

        // Two decisions, two distinct audit aggregates.
        let log = store.events_from(1, None).await.unwrap();
        assert_ne!(log[0].aggregate_id, log[1].aggregate_id);
    }
}
