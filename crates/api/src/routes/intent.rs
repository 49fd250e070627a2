//! The single write endpoint: `POST /intent`.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use covenant_core::{Actor, EntityId, RealmId};
use covenant_infra::intents::{ErrorCode, IntentRequest, IntentResult};

use crate::app::AppServices;
use crate::context::ActorContext;
use crate::errors::json_error;

/// The wire actor. `System` is deliberately absent: system actors exist
/// only in-process (bootstrap, hooks).
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WireActor {
    Entity { entity_id: EntityId },
    Anonymous { reason: Option<String> },
}

#[derive(Debug, Deserialize)]
pub struct IntentBody {
    pub intent: String,
    pub realm: Option<RealmId>,
    pub actor: Option<WireActor>,
    /// Milliseconds since the epoch (business time).
    pub timestamp: Option<i64>,
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub payload: JsonValue,
}

/// Resolve the effective actor: authenticated context wins; an unverified
/// body claim of an entity identity is refused.
pub fn resolve_actor(
    context: Option<&ActorContext>,
    body_actor: Option<&WireActor>,
) -> Result<Actor, (StatusCode, &'static str)> {
    if let Some(ctx) = context {
        if let Some(WireActor::Entity { entity_id }) = body_actor {
            if *entity_id != ctx.entity_id {
                return Err((
                    StatusCode::FORBIDDEN,
                    "actor does not match the authenticated identity",
                ));
            }
        }
        return Ok(ctx.actor());
    }

    match body_actor {
        Some(WireActor::Entity { .. }) => Err((
            StatusCode::UNAUTHORIZED,
            "entity actors require an api key or bearer token",
        )),
        Some(WireActor::Anonymous { reason }) => Ok(Actor::anonymous(
            reason.clone().unwrap_or_else(|| "unauthenticated".to_string()),
        )),
        None => Ok(Actor::anonymous("unauthenticated")),
    }
}

pub fn build_request(
    body: IntentBody,
    actor: Actor,
    default_realm: Option<RealmId>,
) -> Result<IntentRequest, (StatusCode, String)> {
    let mut request = IntentRequest::new(&body.intent, actor, body.payload);
    request.realm = body.realm.or(default_realm);
    request.idempotency_key = body.idempotency_key;

    if let Some(ms) = body.timestamp {
        let at = DateTime::from_timestamp_millis(ms)
            .ok_or((StatusCode::BAD_REQUEST, format!("invalid timestamp {ms}")))?;
        request.timestamp = Some(at);
    }

    Ok(request)
}

/// 200 for any determined outcome; 5xx only for storage/runtime failures.
pub fn status_for(result: &IntentResult) -> StatusCode {
    match result.first_error_code() {
        Some(ErrorCode::StorageError) | Some(ErrorCode::Timeout) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::OK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ActorContext {
        ActorContext {
            entity_id: EntityId::new(),
            realm_id: RealmId::new(),
            scopes: vec!["*:*".to_string()],
        }
    }

    #[test]
    fn authenticated_context_wins() {
        let ctx = context();
        let actor = resolve_actor(Some(&ctx), None).unwrap();
        assert_eq!(actor, Actor::entity(ctx.entity_id));
    }

    #[test]
    fn body_entity_must_match_credentials() {
        let ctx = context();
        let mismatched = WireActor::Entity {
            entity_id: EntityId::new(),
        };
        let err = resolve_actor(Some(&ctx), Some(&mismatched)).unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        let matching = WireActor::Entity {
            entity_id: ctx.entity_id,
        };
        assert!(resolve_actor(Some(&ctx), Some(&matching)).is_ok());
    }

    #[test]
    fn unauthenticated_entity_claims_are_refused() {
        let claimed = WireActor::Entity {
            entity_id: EntityId::new(),
        };
        let err = resolve_actor(None, Some(&claimed)).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn anonymous_without_credentials_is_allowed() {
        let actor = resolve_actor(None, None).unwrap();
        assert!(matches!(actor, Actor::Anonymous { .. }));
    }

    #[test]
    fn millisecond_timestamps_parse() {
        let body = IntentBody {
            intent: "realm:list".to_string(),
            realm: None,
            actor: None,
            timestamp: Some(1_700_000_000_000),
            idempotency_key: Some("k".to_string()),
            payload: JsonValue::Null,
        };
        let request = build_request(body, Actor::anonymous("t"), None).unwrap();
        assert_eq!(request.timestamp.unwrap().timestamp_millis(), 1_700_000_000_000);
        assert_eq!(request.idempotency_key.as_deref(), Some("k"));
    }

    #[test]
    fn wire_actor_rejects_system() {
        let raw = serde_json::json!({"type": "System", "system_id": uuid::Uuid::now_v7()});
        assert!(serde_json::from_value::<WireActor>(raw).is_err());
    }
}

pub async fn post_intent(
    Extension(services): Extension<Arc<AppServices>>,
    actor_context: Option<Extension<ActorContext>>,
    Json(body): Json<IntentBody>,
) -> axum::response::Response {
    let context = actor_context.as_ref().map(|Extension(ctx)| ctx);

    let actor = match resolve_actor(context, body.actor.as_ref()) {
        Ok(actor) => actor,
        Err((status, message)) => return json_error(status, "ACTOR_REJECTED", message),
    };

    let request = match build_request(body, actor, context.map(|c| c.realm_id)) {
        Ok(request) => request,
        Err((status, message)) => return json_error(status, "MALFORMED_REQUEST", message),
    };

    let result = services.ledger.dispatch(request).await;
    (status_for(&result), Json(result)).into_response()
}
