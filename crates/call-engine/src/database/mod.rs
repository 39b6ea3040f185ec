//! Session Record Persistence
//!
//! The `SessionRecordStore` port plus the two shipped implementations: an
//! in-memory store for tests and embedded use, and a SQLite store on an
//! async sqlx pool. Both are idempotent upserts keyed by session id, so a
//! retried finalize can never produce a second billing record.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use consult_session_core::SessionId;

use crate::error::PersistenceError;
use crate::orchestrator::types::SessionRecord;

/// Port to the external persistence collaborator.
#[async_trait]
pub trait SessionRecordStore: Send + Sync {
    /// Write a finalized record, overwriting any previous write for the
    /// same session id.
    async fn upsert_session_record(
        &self,
        record: &SessionRecord,
    ) -> std::result::Result<(), PersistenceError>;

    /// Read a record back by session id.
    async fn get_session_record(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<Option<SessionRecord>, PersistenceError>;
}

/// In-memory record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<SessionId, SessionRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl SessionRecordStore for MemoryRecordStore {
    async fn upsert_session_record(
        &self,
        record: &SessionRecord,
    ) -> std::result::Result<(), PersistenceError> {
        self.records
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn get_session_record(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<Option<SessionRecord>, PersistenceError> {
        Ok(self.records.get(session_id).map(|r| r.clone()))
    }
}

/// SQLite-backed record store on an async sqlx pool.
///
/// A few columns are broken out for operational queries; the full record
/// rides along as JSON and is what reads reconstruct.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Connect and ensure the schema. `sqlite::memory:` works for tests.
    pub async fn new(database_url: &str) -> std::result::Result<Self, PersistenceError> {
        // An in-memory database exists per connection, so the pool must
        // stay at one connection or writes and reads can land in
        // different databases.
        let in_memory =
            database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect(database_url)
            .await
            .map_err(|e| PersistenceError(format!("connect: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_records (
                session_id TEXT PRIMARY KEY,
                provider   TEXT NOT NULL,
                state      TEXT NOT NULL,
                final_cost INTEGER NOT NULL,
                currency   TEXT NOT NULL,
                ended_at   TEXT,
                record     TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| PersistenceError(format!("migrate: {e}")))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionRecordStore for SqliteRecordStore {
    async fn upsert_session_record(
        &self,
        record: &SessionRecord,
    ) -> std::result::Result<(), PersistenceError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| PersistenceError(format!("serialize: {e}")))?;

        sqlx::query(
            "INSERT INTO session_records
                 (session_id, provider, state, final_cost, currency, ended_at, record)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                 provider   = excluded.provider,
                 state      = excluded.state,
                 final_cost = excluded.final_cost,
                 currency   = excluded.currency,
                 ended_at   = excluded.ended_at,
                 record     = excluded.record",
        )
        .bind(&record.session_id.0)
        .bind(&record.provider.0)
        .bind(record.state.to_string())
        .bind(record.final_cost)
        .bind(&record.currency)
        .bind(record.ended_at.map(|t| t.to_rfc3339()))
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError(format!("upsert: {e}")))?;

        tracing::debug!("Persisted record for session {}", record.session_id);
        Ok(())
    }

    async fn get_session_record(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<Option<SessionRecord>, PersistenceError> {
        let row = sqlx::query("SELECT record FROM session_records WHERE session_id = ?")
            .bind(&session_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError(format!("query: {e}")))?;

        row.map(|row| {
            let payload: String = row
                .try_get("record")
                .map_err(|e| PersistenceError(format!("column: {e}")))?;
            serde_json::from_str(&payload)
                .map_err(|e| PersistenceError(format!("deserialize: {e}")))
        })
        .transpose()
    }
}
