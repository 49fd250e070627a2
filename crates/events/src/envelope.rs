use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use covenant_core::{Actor, AggregateId, CommandId, EventId};

use crate::aggregate_type::AggregateType;
use crate::event::Event;

/// An event ready to be appended, not yet assigned a global sequence.
///
/// The writer derives `aggregate_version` by rehydrating the target
/// aggregate; the store enforces it optimistically (`current + 1`, or 1 for
/// a new stream) and assigns `sequence` at append time.
///
/// Envelopes separate infrastructure metadata (identity, ordering,
/// causation, actor) from the domain payload. Domain crates build
/// candidates from their typed events via [`CandidateEvent::from_typed`];
/// infrastructure never inspects payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub event_id: EventId,
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,

    /// Strictly increasing position in the aggregate stream, starting at 1.
    pub aggregate_version: u64,

    pub event_type: String,
    pub event_schema_version: u32,
    pub occurred_at: DateTime<Utc>,

    /// Who performed the action. Always present.
    pub actor: Actor,

    pub payload: JsonValue,

    /// Links every event emitted to satisfy a single intent.
    pub causation_command_id: Option<CommandId>,
}

/// A committed event: candidate plus its global sequence and optional chain hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub event_id: EventId,
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub aggregate_version: u64,

    /// Global, gapless, monotonic position in the log, starting at 1.
    pub sequence: u64,

    pub event_type: String,
    pub event_schema_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub actor: Actor,
    pub payload: JsonValue,
    pub causation_command_id: Option<CommandId>,

    /// SHA-256 over the previous event's hash and this event's canonical
    /// form. Populated only when the store runs with chaining enabled.
    pub hash_chain: Option<String>,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload serialization failed: {0}")]
    Serialize(String),
}

impl CandidateEvent {
    /// Build a candidate from a typed domain event.
    ///
    /// Captures the event's type tag and schema version so historical
    /// payloads can be deserialized later.
    pub fn from_typed<E>(
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        aggregate_version: u64,
        actor: Actor,
        causation_command_id: Option<CommandId>,
        event: &E,
    ) -> Result<Self, EnvelopeError>
    where
        E: Event + Serialize,
    {
        let payload =
            serde_json::to_value(event).map_err(|e| EnvelopeError::Serialize(e.to_string()))?;

        Ok(Self {
            event_id: EventId::new(),
            aggregate_type,
            aggregate_id,
            aggregate_version,
            event_type: event.event_type().to_string(),
            event_schema_version: event.version(),
            occurred_at: event.occurred_at(),
            actor,
            payload,
            causation_command_id,
        })
    }

    /// Promote to a recorded event once the store has assigned a sequence.
    pub fn into_recorded(self, sequence: u64, hash_chain: Option<String>) -> RecordedEvent {
        RecordedEvent {
            event_id: self.event_id,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            aggregate_version: self.aggregate_version,
            sequence,
            event_type: self.event_type,
            event_schema_version: self.event_schema_version,
            occurred_at: self.occurred_at,
            actor: self.actor,
            payload: self.payload,
            causation_command_id: self.causation_command_id,
            hash_chain,
        }
    }
}

impl RecordedEvent {
    /// Deserialize the payload back into a typed domain event.
    pub fn typed<E: DeserializeOwned>(&self) -> Result<E, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
