//! The uniform result every intent returns, success or failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use covenant_core::{DomainError, EventId};
use covenant_events::RecordedEvent;

use crate::event_store::EventStoreError;
use crate::workflow::WorkflowError;

/// What kind of thing the intent did.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentOutcome {
    Created,
    Updated,
    Transitioned,
    Transferred,
    Consented,
    Fulfilled,
    Queried,
    Nothing,
}

/// Stable machine-readable error codes surfaced to clients.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    IntentNotFound,
    ValidationFailed,
    Forbidden,
    ConcurrencyConflict,
    NotFound,
    AlreadyExists,
    PhysicsViolation,
    AgreementLifecycleInvalid,
    WorkflowTransitionInvalid,
    Timeout,
    StorageError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Whether the dispatcher may re-run the handler for this error.
    /// Concurrency conflicts default to retryable; a handler can mark one
    /// terminal when re-running would change its meaning.
    #[serde(skip, default = "default_retryable")]
    pub retryable: bool,
}

fn default_retryable() -> bool {
    true
}

impl IntentError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            retryable: true,
        }
    }

    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        Self {
            code: ErrorCode::ValidationFailed,
            message: message.into(),
            field: field.map(str::to_string),
            retryable: true,
        }
    }

    pub fn is_concurrency(&self) -> bool {
        self.code == ErrorCode::ConcurrencyConflict
    }

    /// Concurrency conflicts the dispatcher should transparently retry.
    pub fn is_retryable_concurrency(&self) -> bool {
        self.is_concurrency() && self.retryable
    }
}

impl From<DomainError> for IntentError {
    fn from(value: DomainError) -> Self {
        let code = match &value {
            DomainError::Validation(_) | DomainError::InvalidId(_) => ErrorCode::ValidationFailed,
            DomainError::InvariantViolation(_) => ErrorCode::ValidationFailed,
            DomainError::NotFound => ErrorCode::NotFound,
            DomainError::Conflict(_) => ErrorCode::ConcurrencyConflict,
            DomainError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            DomainError::PhysicsViolation(_) => ErrorCode::PhysicsViolation,
            DomainError::LifecycleInvalid(_) => ErrorCode::AgreementLifecycleInvalid,
            DomainError::Unauthorized => ErrorCode::Forbidden,
        };
        IntentError::new(code, value.to_string())
    }
}

impl From<EventStoreError> for IntentError {
    fn from(value: EventStoreError) -> Self {
        let code = match &value {
            EventStoreError::Concurrency(_) => ErrorCode::ConcurrencyConflict,
            EventStoreError::InvalidAppend(_) => ErrorCode::ValidationFailed,
            EventStoreError::Storage(_) => ErrorCode::StorageError,
        };
        IntentError::new(code, value.to_string())
    }
}

impl From<WorkflowError> for IntentError {
    fn from(value: WorkflowError) -> Self {
        IntentError::new(ErrorCode::WorkflowTransitionInvalid, value.to_string())
    }
}

impl From<crate::repository::RepositoryError> for IntentError {
    fn from(value: crate::repository::RepositoryError) -> Self {
        match value {
            crate::repository::RepositoryError::Store(e) => e.into(),
        }
    }
}

/// Compact view of an appended event for responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub sequence: u64,
}

impl From<&RecordedEvent> for EventSummary {
    fn from(event: &RecordedEvent) -> Self {
        Self {
            id: event.event_id,
            event_type: event.event_type.clone(),
            sequence: event.sequence,
        }
    }
}

/// A contextual hint at a next possible intent. Never an authorization:
/// the pipeline re-checks permissions on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affordance {
    pub intent: String,
    pub description: String,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Affordance {
    pub fn new(intent: &str, description: &str, required: &[&str]) -> Self {
        Self {
            intent: intent.to_string(),
            description: description.to_string(),
            required: required.iter().map(|r| r.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMeta {
    pub processed_at: DateTime<Utc>,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// What a handler hands back to the dispatcher on success.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutput {
    pub outcome: Option<IntentOutcome>,
    pub data: JsonValue,
    pub events: Vec<EventSummary>,
    pub affordances: Vec<Affordance>,
}

impl HandlerOutput {
    pub fn with_outcome(outcome: IntentOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            ..Default::default()
        }
    }

    pub fn data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    pub fn event(mut self, event: &RecordedEvent) -> Self {
        self.events.push(EventSummary::from(event));
        self
    }

    pub fn record(&mut self, event: &RecordedEvent) {
        self.events.push(EventSummary::from(event));
    }

    /// Fold a nested intent's events into this output.
    pub fn merge_events(&mut self, nested: &IntentResult) {
        self.events.extend(nested.events.iter().cloned());
    }

    pub fn affordance(mut self, affordance: Affordance) -> Self {
        self.affordances.push(affordance);
        self
    }
}

/// The uniform response shape (spec wire contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub success: bool,
    pub outcome: IntentOutcome,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub data: JsonValue,
    #[serde(default)]
    pub events: Vec<EventSummary>,
    #[serde(default)]
    pub affordances: Vec<Affordance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<IntentError>,
    pub meta: IntentMeta,
}

impl IntentResult {
    pub fn failure(error: IntentError, meta: IntentMeta) -> Self {
        Self {
            success: false,
            outcome: IntentOutcome::Nothing,
            data: JsonValue::Null,
            events: Vec::new(),
            affordances: Vec::new(),
            errors: vec![error],
            meta,
        }
    }

    pub fn first_error_code(&self) -> Option<ErrorCode> {
        self.errors.first().map(|e| e.code)
    }
}
