//! Projection cursor (watermark) persistence.
//!
//! Cursors track the last sequence each projection has committed. They are
//! what makes apply at-least-once safe: after a crash the worker resumes
//! from the committed watermark, re-applies whatever was in flight, and the
//! runner's sequence guard drops the duplicates.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::event_store::EventStoreError;

#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last committed sequence for a projection, if any.
    async fn get(&self, projection: &str) -> Result<Option<u64>, EventStoreError>;

    /// Commit a new watermark.
    async fn set(&self, projection: &str, sequence: u64) -> Result<(), EventStoreError>;

    /// Forget a projection's watermark (rebuild support).
    async fn clear(&self, projection: &str) -> Result<(), EventStoreError>;
}

/// In-memory cursor store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<String, u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(&self, projection: &str) -> Result<Option<u64>, EventStoreError> {
        Ok(self
            .cursors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(projection)
            .copied())
    }

    async fn set(&self, projection: &str, sequence: u64) -> Result<(), EventStoreError> {
        self.cursors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(projection.to_string(), sequence);
        Ok(())
    }

    async fn clear(&self, projection: &str) -> Result<(), EventStoreError> {
        self.cursors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(projection);
        Ok(())
    }
}

/// Postgres-backed cursor store.
pub struct PostgresCursorStore {
    pool: Arc<PgPool>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projection_offsets (
    projection_name  TEXT PRIMARY KEY,
    last_sequence    BIGINT NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| EventStoreError::Storage(format!("ensure cursor schema: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for PostgresCursorStore {
    async fn get(&self, projection: &str) -> Result<Option<u64>, EventStoreError> {
        let row = sqlx::query(
            "SELECT last_sequence FROM projection_offsets WHERE projection_name = $1",
        )
        .bind(projection)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| EventStoreError::Storage(format!("read cursor: {e}")))?;

        row.map(|r| {
            r.try_get::<i64, _>("last_sequence")
                .map(|s| s as u64)
                .map_err(|e| EventStoreError::Storage(format!("decode cursor: {e}")))
        })
        .transpose()
    }

    async fn set(&self, projection: &str, sequence: u64) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            INSERT INTO projection_offsets (projection_name, last_sequence)
            VALUES ($1, $2)
            ON CONFLICT (projection_name)
            DO UPDATE SET last_sequence = EXCLUDED.last_sequence, updated_at = NOW()
            "#,
        )
        .bind(projection)
        .bind(sequence as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| EventStoreError::Storage(format!("commit cursor: {e}")))?;
        Ok(())
    }

    async fn clear(&self, projection: &str) -> Result<(), EventStoreError> {
        sqlx::query("DELETE FROM projection_offsets WHERE projection_name = $1")
            .bind(projection)
            .execute(&*self.pool)
            .await
            .map_err(|e| EventStoreError::Storage(format!("clear cursor: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip() {
        let store = InMemoryCursorStore::new();
        assert_eq!(store.get("realms").await.unwrap(), None);

        store.set("realms", 10).await.unwrap();
        assert_eq!(store.get("realms").await.unwrap(), Some(10));

        store.clear("realms").await.unwrap();
        assert_eq!(store.get("realms").await.unwrap(), None);
    }
}
