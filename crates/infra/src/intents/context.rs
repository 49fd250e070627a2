//! The capability surface handed to every intent handler.
//!
//! Handlers own business sequencing; everything they may touch (store,
//! rehydration, registries, engines, nested dispatch) arrives through this
//! struct. No other IO is available from a handler.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;

use covenant_agreements::AgreementTypeRegistry;
use covenant_auth::AuthorizationEngine;
use covenant_core::{Actor, AggregateId, CommandId, MonotonicClock};
use covenant_events::{AggregateType, CandidateEvent, Event, RecordedEvent};

use crate::event_store::EventStore;
use crate::projections::ReadModels;
use crate::repository::Repository;
use crate::workflow::WorkflowEngine;

use super::dispatcher::{IntentDispatcher, IntentRequest};
use super::registry::IntentRegistry;
use super::result::{ErrorCode, IntentError, IntentResult};

pub struct HandlerContext {
    pub store: Arc<dyn EventStore>,
    pub repository: Repository,
    pub agreement_types: Arc<AgreementTypeRegistry>,
    /// The catalog itself, for discovery intents.
    pub intent_catalog: Arc<IntentRegistry>,
    pub workflow: Arc<WorkflowEngine>,
    pub authz: Arc<AuthorizationEngine>,
    pub read_models: Arc<ReadModels>,
    pub clock: Arc<MonotonicClock>,
    /// The actor used for hook-originated and bootstrap emissions.
    pub system_actor: Actor,
    /// Links every event this dispatch appends (including nested ones).
    pub causation: CommandId,
    pub(crate) dispatcher: Weak<IntentDispatcher>,
}

impl HandlerContext {
    /// Business time for this request: caller-set, or the process clock.
    pub fn occurred_at(&self, request: &IntentRequest) -> DateTime<Utc> {
        request.timestamp.unwrap_or_else(|| self.clock.now())
    }

    /// Append one typed domain event, deriving the next aggregate version
    /// by rehydration and stamping this dispatch's causation id.
    pub async fn append_typed<E>(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        actor: &Actor,
        event: &E,
    ) -> Result<RecordedEvent, IntentError>
    where
        E: Event + Serialize,
    {
        let version = self
            .repository
            .next_version(aggregate_type, aggregate_id)
            .await?;

        let candidate = CandidateEvent::from_typed(
            aggregate_type,
            aggregate_id,
            version,
            actor.clone(),
            Some(self.causation),
            event,
        )
        .map_err(|e| IntentError::new(ErrorCode::StorageError, e.to_string()))?;

        Ok(self.store.append(candidate).await?)
    }

    /// Run another intent inside this one. The nested call re-enters the
    /// full pipeline (authorization included) and shares this dispatch's
    /// causation id; its events belong in the outer result.
    pub async fn dispatch_nested(&self, mut request: IntentRequest) -> Result<IntentResult, IntentError> {
        let dispatcher = self.dispatcher.upgrade().ok_or_else(|| {
            IntentError::new(ErrorCode::StorageError, "dispatcher is shutting down")
        })?;

        request.causation = Some(self.causation);
        Ok(dispatcher.dispatch(request).await)
    }

    /// Like [`Self::dispatch_nested`], but failing the outer intent when the
    /// nested one fails.
    pub async fn dispatch_nested_ok(
        &self,
        request: IntentRequest,
    ) -> Result<IntentResult, IntentError> {
        let intent = request.intent.clone();
        let result = self.dispatch_nested(request).await?;
        if !result.success {
            let inner = result
                .errors
                .first()
                .cloned()
                .unwrap_or_else(|| IntentError::new(ErrorCode::StorageError, "nested intent failed"));
            return Err(IntentError::new(
                inner.code,
                format!("nested intent '{intent}' failed: {}", inner.message),
            ));
        }
        Ok(result)
    }
}
