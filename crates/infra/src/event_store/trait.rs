use async_trait::async_trait;
use thiserror::Error;

use covenant_core::AggregateId;
use covenant_events::{AggregateType, CandidateEvent, RecordedEvent};

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Optimistic concurrency check failed (stale aggregate version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// The append was malformed (bad version, serialization failure).
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// The backing storage failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Notified after every committed append. Implemented by the subscription
/// hub; the call happens outside the store's write path so readers and
/// writers never wait on subscribers.
#[async_trait]
pub trait AppendObserver: Send + Sync {
    async fn notify(&self, event: &RecordedEvent);
}

/// Append-only event store.
///
/// Guarantees, regardless of backend:
/// - `sequence` is a gapless run of positive integers in append order.
/// - `aggregate_version` is contiguous per `(aggregate_type, aggregate_id)`
///   stream; an append whose version is not `current + 1` fails with
///   [`EventStoreError::Concurrency`], so exactly one of two racing writers
///   wins.
/// - Appends are atomic per event; partial appends never occur.
/// - Reads return a snapshot: appends after the call are not visible to it.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Validate the candidate's version, assign the next global sequence,
    /// persist, and notify the observer.
    async fn append(&self, candidate: CandidateEvent) -> Result<RecordedEvent, EventStoreError>;

    /// All events of one aggregate, in version order.
    async fn events_for_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
    ) -> Result<Vec<RecordedEvent>, EventStoreError>;

    /// Events in `[from_sequence, to_sequence]` in sequence order
    /// (`to_sequence = None` means the current head at call time).
    async fn events_from(
        &self,
        from_sequence: u64,
        to_sequence: Option<u64>,
    ) -> Result<Vec<RecordedEvent>, EventStoreError>;

    /// The latest event of one aggregate, if any.
    async fn latest_for_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
    ) -> Result<Option<RecordedEvent>, EventStoreError>;

    /// The highest assigned sequence (0 when the log is empty).
    async fn current_sequence(&self) -> Result<u64, EventStoreError>;
}
