//! Sqlite message store backed by sqlx
//!
//! Messages live in a single `messages` table whose columns map 1:1 to the
//! envelope fields, with the payload serialized as a JSON text blob by the
//! envelope codec. The database runs in WAL journal mode so history reads
//! never block appends.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS messages (
//!   id           TEXT PRIMARY KEY,
//!   kind         TEXT NOT NULL,
//!   room         TEXT,
//!   type         TEXT NOT NULL,
//!   ts           TEXT NOT NULL,
//!   payload_json TEXT NOT NULL
//! );
//! ```
//!
//! `id` is the zero-padded microsecond id from [`IdGenerator`], so
//! `ORDER BY id` is acceptance order.

use super::{normalize_for_append, IdGenerator, MessageStore};
use crate::core::envelope::{Envelope, Kind, Payload};
use crate::core::error::StoreError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS messages (\
     id TEXT PRIMARY KEY, \
     kind TEXT NOT NULL, \
     room TEXT, \
     type TEXT NOT NULL, \
     ts TEXT NOT NULL, \
     payload_json TEXT NOT NULL)";

const SELECT_COLUMNS: &str = "SELECT id, kind, room, type, ts, payload_json FROM messages";

/// Durable message store on a sqlite database file.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
    ids: std::sync::Arc<IdGenerator>,
}

impl SqliteMessageStore {
    /// Open (creating if missing) the database at `path`, switch it to WAL
    /// mode, and ensure the schema exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Open {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        sqlx::query(CREATE_TABLE_SQL)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Open {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        tracing::info!(path = %path.display(), "message store opened");

        Ok(Self {
            pool,
            ids: std::sync::Arc::new(IdGenerator::new()),
        })
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_envelope(row: &SqliteRow) -> Envelope {
    let payload_json: String = row.get("payload_json");
    // An unreadable payload degrades to an empty one rather than dropping
    // the whole row.
    let payload = serde_json::from_str::<serde_json::Value>(&payload_json)
        .map(|json| Payload::from_json_value(&json))
        .unwrap_or_default();

    let kind: String = row.get("kind");
    let room: Option<String> = row.get("room");

    Envelope {
        id: row.get("id"),
        kind: Kind::parse(&kind),
        ts: row.get("ts"),
        room: room.unwrap_or_default(),
        message_type: row.get("type"),
        payload,
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, envelope: Envelope) -> Result<Envelope, StoreError> {
        let envelope = normalize_for_append(envelope, &self.ids);

        let payload_json = serde_json::to_string(&envelope.payload.to_json_object())
            .map_err(|e| StoreError::Unavailable {
                message: e.to_string(),
            })?;
        let room = (!envelope.room.is_empty()).then_some(envelope.room.as_str());

        sqlx::query(
            "INSERT OR REPLACE INTO messages (id, kind, room, type, ts, payload_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&envelope.id)
        .bind(envelope.kind.as_str())
        .bind(room)
        .bind(&envelope.message_type)
        .bind(&envelope.ts)
        .bind(&payload_json)
        .execute(&self.pool)
        .await?;

        Ok(envelope)
    }

    async fn list_by_room(
        &self,
        room: &str,
        limit: usize,
        before_id: Option<&str>,
    ) -> Result<Vec<Envelope>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = match before_id {
            Some(before) => {
                let sql =
                    format!("{SELECT_COLUMNS} WHERE room = ?1 AND id < ?2 ORDER BY id DESC LIMIT ?3");
                sqlx::query(&sql)
                    .bind(room)
                    .bind(before)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("{SELECT_COLUMNS} WHERE room = ?1 ORDER BY id DESC LIMIT ?2");
                sqlx::query(&sql)
                    .bind(room)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.iter().map(row_to_envelope).collect())
    }

    async fn replay_from(&self, start_id: &str, limit: usize) -> Result<Vec<Envelope>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!("{SELECT_COLUMNS} WHERE id > ?1 ORDER BY id ASC LIMIT ?2");
        let rows = sqlx::query(&sql)
            .bind(start_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_envelope).collect())
    }
}
