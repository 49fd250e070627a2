//! The bidirectional stream: subscriptions and intents over one socket.
//!
//! Client → server:
//! - `{"subscribe": {"from_sequence": N}}`: start (or restart) the event
//!   stream from sequence N.
//! - `{"intent": {<intent body>}, "request_id": "..."}`: dispatch an
//!   intent; the response correlates by `request_id`.
//!
//! Server → client:
//! - `{"event": <recorded event>}` in strict sequence order
//! - `{"lagged": true}` when the subscriber fell behind (reconnect with the
//!   last acknowledged sequence)
//! - `{"response": <intent result>, "request_id": "..."}`
//! - periodic keep-alives

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::Extension,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use covenant_infra::subscriptions::{SubscriptionMessage, SubscriptionStream};

use crate::app::AppServices;
use crate::context::ActorContext;
use crate::routes::intent::{build_request, resolve_actor, IntentBody};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SubscribeFrame {
    from_sequence: u64,
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
    subscribe: Option<SubscribeFrame>,
    intent: Option<IntentBody>,
    request_id: Option<String>,
}

pub async fn ws_handler(
    upgrade: WebSocketUpgrade,
    Extension(services): Extension<Arc<AppServices>>,
    actor_context: Option<Extension<ActorContext>>,
) -> impl IntoResponse {
    let context = actor_context.map(|Extension(ctx)| ctx);
    upgrade.on_upgrade(move |socket| handle_socket(socket, services, context))
}

async fn handle_socket(
    mut socket: WebSocket,
    services: Arc<AppServices>,
    context: Option<ActorContext>,
) {
    let mut subscription: Option<SubscriptionStream> = None;
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                if socket
                    .send(Message::Text(json!({"keepalive": true}).to_string()))
                    .await
                    .is_err()
                {
                    break;
                }
            }

            event = next_event(&mut subscription) => {
                match event {
                    Some(SubscriptionMessage::Event(event)) => {
                        let frame = json!({"event": event}).to_string();
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Some(SubscriptionMessage::Lagged) => {
                        let _ = socket
                            .send(Message::Text(json!({"lagged": true}).to_string()))
                            .await;
                        subscription = None;
                    }
                    None => {
                        subscription = None;
                    }
                }
            }

            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else {
                    break;
                };
                let Message::Text(text) = message else {
                    continue;
                };

                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = socket
                            .send(Message::Text(
                                json!({"error": {"code": "MALFORMED_FRAME", "message": e.to_string()}})
                                    .to_string(),
                            ))
                            .await;
                        continue;
                    }
                };

                if let Some(subscribe) = frame.subscribe {
                    match services.ledger.subscribe(subscribe.from_sequence).await {
                        Ok(stream) => {
                            debug!(from = subscribe.from_sequence, "ws subscription started");
                            subscription = Some(stream);
                        }
                        Err(e) => {
                            let _ = socket
                                .send(Message::Text(
                                    json!({"error": {"code": "SUBSCRIBE_FAILED", "message": e.to_string()}})
                                        .to_string(),
                                ))
                                .await;
                        }
                    }
                }

                if let Some(body) = frame.intent {
                    let response = run_intent(&services, context.as_ref(), body).await;
                    let frame = json!({
                        "response": response,
                        "request_id": frame.request_id,
                    });
                    if socket.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Pending-subscription-aware next event; never resolves with no stream.
async fn next_event(subscription: &mut Option<SubscriptionStream>) -> Option<SubscriptionMessage> {
    match subscription {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn run_intent(
    services: &AppServices,
    context: Option<&ActorContext>,
    body: IntentBody,
) -> serde_json::Value {
    let actor = match resolve_actor(context, body.actor.as_ref()) {
        Ok(actor) => actor,
        Err((_, message)) => {
            return json!({"error": {"code": "ACTOR_REJECTED", "message": message}});
        }
    };

    match build_request(body, actor, context.map(|c| c.realm_id)) {
        Ok(request) => {
            let result = services.ledger.dispatch(request).await;
            serde_json::to_value(result).unwrap_or_else(
                |e| json!({"error": {"code": "SERIALIZATION", "message": e.to_string()}}),
            )
        }
        Err((_, message)) => json!({"error": {"code": "MALFORMED_REQUEST", "message": message}}),
    }
}
