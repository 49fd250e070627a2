//! Postgres-backed event store implementation.
//!
//! Events persist in a single `events` table with a unique, monotonic
//! `sequence` column and a unique `(aggregate_type, aggregate_id,
//! aggregate_version)` stream key. Optimistic concurrency and the gapless
//! sequence are both enforced by those indexes.
//!
//! ## Error mapping
//!
//! | SQLx error | PostgreSQL code | EventStoreError | Scenario |
//! |------------|-----------------|-----------------|----------|
//! | Database (unique violation on stream key) | `23505` | `Concurrency` | Two writers raced the same aggregate version |
//! | Database (unique violation on sequence) | `23505` | retried internally | Two writers raced the global head |
//! | Database (check constraint) | `23514` | `InvalidAppend` | Invalid data (e.g. version <= 0) |
//! | Database (other) | any | `Storage` | Other database errors |
//! | PoolClosed / network | n/a | `Storage` | Connection failures |
//!
//! ## Thread safety
//!
//! `PostgresEventStore` is `Send + Sync`; the SQLx pool handles connection
//! management. Appends run in a transaction and are atomic per event.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use covenant_core::{Actor, AggregateId, CommandId, EventId};
use covenant_events::{chain_hash, AggregateType, CandidateEvent, RecordedEvent};

use super::store_trait::{AppendObserver, EventStore, EventStoreError};

/// How many times an append retries when it loses only the race for the
/// global sequence head (not the aggregate version).
const SEQUENCE_RACE_RETRIES: usize = 8;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id              UUID PRIMARY KEY,
    sequence              BIGINT NOT NULL,
    aggregate_type        TEXT NOT NULL,
    aggregate_id          UUID NOT NULL,
    aggregate_version     BIGINT NOT NULL CHECK (aggregate_version > 0),
    event_type            TEXT NOT NULL,
    event_schema_version  INT NOT NULL DEFAULT 1,
    occurred_at           TIMESTAMPTZ NOT NULL,
    actor                 JSONB NOT NULL,
    payload               JSONB NOT NULL,
    causation_command_id  UUID,
    hash_chain            TEXT,
    created_at            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT events_sequence_key UNIQUE (sequence),
    CONSTRAINT events_stream_key UNIQUE (aggregate_type, aggregate_id, aggregate_version)
);
CREATE INDEX IF NOT EXISTS events_stream_idx ON events (aggregate_type, aggregate_id, aggregate_version);
"#;

/// Postgres-backed append-only event store.
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    observer: RwLock<Option<Arc<dyn AppendObserver>>>,
    chaining: bool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            observer: RwLock::new(None),
            chaining: false,
        }
    }

    pub fn with_hash_chain(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            observer: RwLock::new(None),
            chaining: true,
        }
    }

    /// Create the `events` table and indexes when they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    pub fn set_observer(&self, observer: Arc<dyn AppendObserver>) {
        *self
            .observer
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }

    fn observer(&self) -> Option<Arc<dyn AppendObserver>> {
        self.observer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn try_append_once(
        &self,
        candidate: &CandidateEvent,
    ) -> Result<RecordedEvent, AppendAttemptError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppendAttemptError::Fatal(map_sqlx_error("begin", e)))?;

        let head = sqlx::query("SELECT COALESCE(MAX(sequence), 0) AS head FROM events")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppendAttemptError::Fatal(map_sqlx_error("read_head", e)))?;
        let head: i64 = head
            .try_get("head")
            .map_err(|e| AppendAttemptError::Fatal(storage(format!("read head: {e}"))))?;
        let sequence = head as u64 + 1;

        let hash = if self.chaining {
            let previous: Option<String> = sqlx::query(
                "SELECT hash_chain FROM events WHERE sequence = $1",
            )
            .bind(head)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppendAttemptError::Fatal(map_sqlx_error("read_prev_hash", e)))?
            .and_then(|row| row.try_get("hash_chain").ok());
            Some(chain_hash(previous.as_deref(), candidate, sequence))
        } else {
            None
        };

        let actor = serde_json::to_value(&candidate.actor)
            .map_err(|e| AppendAttemptError::Fatal(storage(format!("serialize actor: {e}"))))?;

        let insert = sqlx::query(
            r#"
            INSERT INTO events (
                event_id,
                sequence,
                aggregate_type,
                aggregate_id,
                aggregate_version,
                event_type,
                event_schema_version,
                occurred_at,
                actor,
                payload,
                causation_command_id,
                hash_chain
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(candidate.event_id.as_uuid())
        .bind(sequence as i64)
        .bind(candidate.aggregate_type.as_str())
        .bind(candidate.aggregate_id.as_uuid())
        .bind(candidate.aggregate_version as i64)
        .bind(&candidate.event_type)
        .bind(candidate.event_schema_version as i32)
        .bind(candidate.occurred_at)
        .bind(&actor)
        .bind(&candidate.payload)
        .bind(candidate.causation_command_id.map(|c| *c.as_uuid()))
        .bind(&hash)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            return Err(match violated_constraint(&e) {
                Some(name) if name.contains("stream") => AppendAttemptError::Fatal(
                    EventStoreError::Concurrency(format!(
                        "aggregate {}/{} already has version {}",
                        candidate.aggregate_type,
                        candidate.aggregate_id,
                        candidate.aggregate_version
                    )),
                ),
                Some(name) if name.contains("sequence") => AppendAttemptError::SequenceRace,
                _ => AppendAttemptError::Fatal(map_sqlx_error("insert_event", e)),
            });
        }

        tx.commit()
            .await
            .map_err(|e| AppendAttemptError::Fatal(map_sqlx_error("commit", e)))?;

        Ok(candidate.clone().into_recorded(sequence, hash))
    }
}

enum AppendAttemptError {
    /// Lost the race for the next global sequence; safe to retry.
    SequenceRace,
    Fatal(EventStoreError),
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self, candidate),
        fields(
            aggregate_type = %candidate.aggregate_type,
            aggregate_id = %candidate.aggregate_id,
            aggregate_version = candidate.aggregate_version,
            event_type = %candidate.event_type,
        ),
        err
    )]
    async fn append(&self, candidate: CandidateEvent) -> Result<RecordedEvent, EventStoreError> {
        if candidate.aggregate_version == 0 {
            return Err(EventStoreError::InvalidAppend(
                "aggregate_version must start at 1".to_string(),
            ));
        }

        let mut attempts = 0;
        let recorded = loop {
            match self.try_append_once(&candidate).await {
                Ok(recorded) => break recorded,
                Err(AppendAttemptError::SequenceRace) => {
                    attempts += 1;
                    if attempts > SEQUENCE_RACE_RETRIES {
                        return Err(EventStoreError::Storage(
                            "exhausted retries racing the sequence head".to_string(),
                        ));
                    }
                }
                Err(AppendAttemptError::Fatal(e)) => return Err(e),
            }
        };

        if let Some(observer) = self.observer() {
            observer.notify(&recorded).await;
        }

        Ok(recorded)
    }

    #[instrument(skip(self), fields(aggregate_type = %aggregate_type, aggregate_id = %aggregate_id), err)]
    async fn events_for_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, sequence, aggregate_type, aggregate_id, aggregate_version,
                   event_type, event_schema_version, occurred_at, actor, payload,
                   causation_command_id, hash_chain
            FROM events
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY aggregate_version ASC
            "#,
        )
        .bind(aggregate_type.as_str())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("events_for_aggregate", e))?;

        rows.iter().map(row_to_event).collect()
    }

    #[instrument(skip(self), err)]
    async fn events_from(
        &self,
        from_sequence: u64,
        to_sequence: Option<u64>,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, sequence, aggregate_type, aggregate_id, aggregate_version,
                   event_type, event_schema_version, occurred_at, actor, payload,
                   causation_command_id, hash_chain
            FROM events
            WHERE sequence >= $1 AND ($2::bigint IS NULL OR sequence <= $2)
            ORDER BY sequence ASC
            "#,
        )
        .bind(from_sequence as i64)
        .bind(to_sequence.map(|s| s as i64))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("events_from", e))?;

        rows.iter().map(row_to_event).collect()
    }

    #[instrument(skip(self), fields(aggregate_type = %aggregate_type, aggregate_id = %aggregate_id), err)]
    async fn latest_for_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
    ) -> Result<Option<RecordedEvent>, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT event_id, sequence, aggregate_type, aggregate_id, aggregate_version,
                   event_type, event_schema_version, occurred_at, actor, payload,
                   causation_command_id, hash_chain
            FROM events
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY aggregate_version DESC
            LIMIT 1
            "#,
        )
        .bind(aggregate_type.as_str())
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_for_aggregate", e))?;

        row.as_ref().map(row_to_event).transpose()
    }

    async fn current_sequence(&self) -> Result<u64, EventStoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(sequence), 0) AS head FROM events")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_sequence", e))?;
        let head: i64 = row
            .try_get("head")
            .map_err(|e| storage(format!("read head: {e}")))?;
        Ok(head as u64)
    }
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<RecordedEvent, EventStoreError> {
    let aggregate_type: String = row
        .try_get("aggregate_type")
        .map_err(|e| storage(format!("read aggregate_type: {e}")))?;
    let aggregate_type: AggregateType = aggregate_type
        .parse()
        .map_err(|e: String| storage(format!("decode aggregate_type: {e}")))?;

    let actor: serde_json::Value = row
        .try_get("actor")
        .map_err(|e| storage(format!("read actor: {e}")))?;
    let actor: Actor =
        serde_json::from_value(actor).map_err(|e| storage(format!("decode actor: {e}")))?;

    let event_id: uuid::Uuid = row
        .try_get("event_id")
        .map_err(|e| storage(format!("read event_id: {e}")))?;
    let aggregate_id: uuid::Uuid = row
        .try_get("aggregate_id")
        .map_err(|e| storage(format!("read aggregate_id: {e}")))?;
    let sequence: i64 = row
        .try_get("sequence")
        .map_err(|e| storage(format!("read sequence: {e}")))?;
    let aggregate_version: i64 = row
        .try_get("aggregate_version")
        .map_err(|e| storage(format!("read aggregate_version: {e}")))?;
    let event_schema_version: i32 = row
        .try_get("event_schema_version")
        .map_err(|e| storage(format!("read event_schema_version: {e}")))?;
    let occurred_at: DateTime<Utc> = row
        .try_get("occurred_at")
        .map_err(|e| storage(format!("read occurred_at: {e}")))?;
    let causation: Option<uuid::Uuid> = row
        .try_get("causation_command_id")
        .map_err(|e| storage(format!("read causation_command_id: {e}")))?;

    Ok(RecordedEvent {
        event_id: EventId::from_uuid(event_id),
        aggregate_type,
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_version: aggregate_version as u64,
        sequence: sequence as u64,
        event_type: row
            .try_get("event_type")
            .map_err(|e| storage(format!("read event_type: {e}")))?,
        event_schema_version: event_schema_version as u32,
        occurred_at,
        actor,
        payload: row
            .try_get("payload")
            .map_err(|e| storage(format!("read payload: {e}")))?,
        causation_command_id: causation.map(CommandId::from_uuid),
        hash_chain: row
            .try_get("hash_chain")
            .map_err(|e| storage(format!("read hash_chain: {e}")))?,
    })
}

fn storage(msg: String) -> EventStoreError {
    EventStoreError::Storage(msg)
}

/// The violated constraint's name, when the error is a unique violation.
fn violated_constraint(err: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return db_err.constraint().map(str::to_string);
        }
    }
    None
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
