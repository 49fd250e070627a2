//! The intent dispatcher: the sole write path.
//!
//! Pipeline per call: resolve → validate → authorize (one audit event per
//! permission checked) → execute, with bounded retry on concurrency
//! conflicts and a per-intent deadline. Results are uniform for success and
//! failure; repeated idempotency keys replay the stored result without
//! re-executing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use covenant_agreements::AgreementTypeRegistry;
use covenant_auth::{AuthorizationEngine, AuthzRequest};
use covenant_core::{Actor, CommandId, MonotonicClock, RealmId};

use crate::audit::AuditLogger;
use crate::event_store::EventStore;
use crate::projections::ReadModels;
use crate::repository::Repository;
use crate::workflow::WorkflowEngine;

use super::context::HandlerContext;
use super::registry::IntentRegistry;
use super::result::{
    Affordance, ErrorCode, IntentError, IntentMeta, IntentOutcome, IntentResult,
};

/// How many times a handler is re-run after a concurrency conflict before
/// the conflict surfaces to the caller.
const CONCURRENCY_RETRIES: usize = 3;

/// Stored idempotent results are kept at least this long.
fn idempotency_retention() -> chrono::Duration {
    chrono::Duration::hours(24)
}

/// Default per-intent deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// One client call, as it enters the pipeline.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub intent: String,
    pub realm: Option<RealmId>,
    pub actor: Actor,
    pub timestamp: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    /// Set on nested dispatches so all events share the outer command id.
    pub causation: Option<CommandId>,
    pub payload: JsonValue,
}

impl IntentRequest {
    pub fn new(intent: &str, actor: Actor, payload: JsonValue) -> Self {
        Self {
            intent: intent.to_string(),
            realm: None,
            actor,
            timestamp: None,
            idempotency_key: None,
            causation: None,
            payload,
        }
    }

    pub fn in_realm(mut self, realm: RealmId) -> Self {
        self.realm = Some(realm);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn idempotent(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

struct CachedResult {
    result: IntentResult,
    stored_at: DateTime<Utc>,
}

pub struct IntentDispatcher {
    registry: Arc<IntentRegistry>,
    store: Arc<dyn EventStore>,
    repository: Repository,
    agreement_types: Arc<AgreementTypeRegistry>,
    workflow: Arc<WorkflowEngine>,
    authz: Arc<AuthorizationEngine>,
    audit: AuditLogger,
    read_models: Arc<ReadModels>,
    clock: Arc<MonotonicClock>,
    system_actor: Actor,
    deadline: Duration,
    idempotency: Mutex<HashMap<(String, String), CachedResult>>,
    self_ref: Mutex<Weak<IntentDispatcher>>,
}

impl IntentDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<IntentRegistry>,
        store: Arc<dyn EventStore>,
        agreement_types: Arc<AgreementTypeRegistry>,
        workflow: Arc<WorkflowEngine>,
        authz: Arc<AuthorizationEngine>,
        read_models: Arc<ReadModels>,
        clock: Arc<MonotonicClock>,
        system_actor: Actor,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            registry,
            repository: Repository::new(store.clone()),
            audit: AuditLogger::new(store.clone()),
            store,
            agreement_types,
            workflow,
            authz,
            read_models,
            clock,
            system_actor,
            deadline: DEFAULT_DEADLINE,
            idempotency: Mutex::new(HashMap::new()),
            self_ref: Mutex::new(Weak::new()),
        });
        *dispatcher.self_ref.lock().unwrap_or_else(|e| e.into_inner()) =
            Arc::downgrade(&dispatcher);
        dispatcher
    }

    pub fn registry(&self) -> &Arc<IntentRegistry> {
        &self.registry
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    fn context(&self, causation: CommandId) -> HandlerContext {
        HandlerContext {
            store: self.store.clone(),
            repository: self.repository.clone(),
            agreement_types: self.agreement_types.clone(),
            intent_catalog: self.registry.clone(),
            workflow: self.workflow.clone(),
            authz: self.authz.clone(),
            read_models: self.read_models.clone(),
            clock: self.clock.clone(),
            system_actor: self.system_actor.clone(),
            causation,
            dispatcher: self.self_ref.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }

    /// Run one intent through the full pipeline.
    pub async fn dispatch(&self, request: IntentRequest) -> IntentResult {
        let started = Instant::now();
        let processed_at = self.clock.now();
        let meta = |started: Instant, key: Option<String>| IntentMeta {
            processed_at,
            processing_time_ms: started.elapsed().as_millis() as u64,
            idempotency_key: key,
        };

        // Idempotency replay: a repeated key returns the stored result
        // without re-executing anything.
        if let Some(key) = &request.idempotency_key {
            if let Some(stored) = self.replay(&request.actor, key) {
                info!(intent = %request.intent, key = %key, "idempotent replay");
                return stored;
            }
        }

        // Resolve.
        let Some(definition) = self.registry.get(&request.intent).cloned() else {
            return IntentResult::failure(
                IntentError::new(
                    ErrorCode::IntentNotFound,
                    format!("unknown intent '{}'", request.intent),
                ),
                meta(started, request.idempotency_key.clone()),
            );
        };

        // Validate.
        if let Err(error) = definition.schema.validate(&request.payload) {
            return IntentResult::failure(error, meta(started, request.idempotency_key.clone()));
        }

        // Authorize: one audit event per permission checked, short-circuit
        // on the first denial. System actors skip (bootstrap paths only).
        if !definition.required_permissions.is_empty() && !request.actor.is_system() {
            let at = request.timestamp.unwrap_or(processed_at);
            for permission in &definition.required_permissions {
                let decision = self
                    .authz
                    .authorize(&AuthzRequest {
                        actor: request.actor.clone(),
                        permission: permission.clone(),
                        realm: request.realm,
                        timestamp: at,
                    })
                    .await;

                let audit = self
                    .audit
                    .record(
                        &definition.name,
                        &request.actor,
                        request.realm,
                        permission.as_str(),
                        &decision,
                        request.causation,
                        at,
                    )
                    .await;

                if !decision.allowed {
                    // Best-effort on the denial record: the denial itself
                    // must still reach the caller.
                    if let Err(e) = audit {
                        warn!(error = %e, "failed to record authorization denial");
                    }
                    return IntentResult::failure(
                        IntentError::new(ErrorCode::Forbidden, decision.reason),
                        meta(started, request.idempotency_key.clone()),
                    );
                }

                // A grant without its audit record would break the
                // authority-precedes-action invariant; fail closed.
                if let Err(e) = audit {
                    return IntentResult::failure(
                        IntentError::new(
                            ErrorCode::StorageError,
                            format!("audit append failed: {e}"),
                        ),
                        meta(started, request.idempotency_key.clone()),
                    );
                }
            }
        }

        // Execute, retrying on concurrency conflicts (the handler
        // re-derives versions by rehydrating on every attempt).
        let causation = request.causation.unwrap_or_default();
        let ctx = self.context(causation);
        let mut attempts = 0;
        let output = loop {
            match tokio::time::timeout(self.deadline, definition.handler.execute(&ctx, &request))
                .await
            {
                Err(_) => {
                    return IntentResult::failure(
                        IntentError::new(
                            ErrorCode::Timeout,
                            format!("intent '{}' exceeded its deadline", definition.name),
                        ),
                        meta(started, request.idempotency_key.clone()),
                    );
                }
                Ok(Ok(output)) => break output,
                Ok(Err(error)) if error.is_retryable_concurrency() && attempts < CONCURRENCY_RETRIES => {
                    attempts += 1;
                    warn!(
                        intent = %definition.name,
                        attempt = attempts,
                        "concurrency conflict; rehydrating and retrying"
                    );
                }
                Ok(Err(error)) => {
                    return IntentResult::failure(
                        error,
                        meta(started, request.idempotency_key.clone()),
                    );
                }
            }
        };

        let affordances = if output.affordances.is_empty() {
            default_affordances(&definition.name)
        } else {
            output.affordances
        };

        let result = IntentResult {
            success: true,
            outcome: output.outcome.unwrap_or(IntentOutcome::Nothing),
            data: output.data,
            events: output.events,
            affordances,
            errors: Vec::new(),
            meta: meta(started, request.idempotency_key.clone()),
        };

        if let Some(key) = &request.idempotency_key {
            self.remember(&request.actor, key, &result);
        }

        result
    }

    fn replay(&self, actor: &Actor, key: &str) -> Option<IntentResult> {
        let mut cache = self.idempotency.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        cache.retain(|_, entry| now - entry.stored_at < idempotency_retention());
        cache
            .get(&(actor.cache_key(), key.to_string()))
            .map(|entry| entry.result.clone())
    }

    fn remember(&self, actor: &Actor, key: &str, result: &IntentResult) {
        let mut cache = self.idempotency.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            (actor.cache_key(), key.to_string()),
            CachedResult {
                result: result.clone(),
                stored_at: Utc::now(),
            },
        );
    }
}

/// Fallback affordances when a handler declares none.
fn default_affordances(intent: &str) -> Vec<Affordance> {
    match intent {
        "register" => vec![
            Affordance::new("agreement:propose", "Propose an agreement", &["agreement:propose"]),
            Affordance::new("realm:list", "List visible realms", &[]),
        ],
        "agreement:propose" => vec![
            Affordance::new("agreement:consent", "Consent to the proposal", &[]),
            Affordance::new("agreement:reject", "Reject the proposal", &[]),
        ],
        "agreement:consent" => vec![Affordance::new(
            "agreement:terminate",
            "Terminate the agreement",
            &["agreement:terminate"],
        )],
        "container:create" => vec![
            Affordance::new("container:deposit", "Deposit an item", &["container:deposit"]),
            Affordance::new("container:transfer", "Transfer items", &["container:transfer"]),
        ],
        _ => vec![Affordance::new("intent:list", "Discover available intents", &[])],
    }
}
