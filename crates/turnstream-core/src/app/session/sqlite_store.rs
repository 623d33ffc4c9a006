use async_trait::async_trait;
use sqlx::{
    Row,
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
    },
};
use std::path::Path;
use std::str::FromStr;

use super::store::{SessionStore, StoreError};
use crate::app::domain::message::{GlobalSessionState, LocalSessionState, Message};
use crate::app::domain::types::{AppId, EventId, MessageId, SessionId};

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub async fn new(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::connection(format!("Failed to create directory: {e}")))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| StoreError::connection(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        Self::connect(options).await
    }

    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::connection(format!("Invalid SQLite path: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::connection(format!("Failed to connect to SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    data TEXT NOT NULL
                )
                "#,
            ),
            (
                "messages index",
                r#"
                CREATE INDEX IF NOT EXISTS idx_messages_session_ts
                ON messages(session_id, timestamp)
                "#,
            ),
            (
                "local state table",
                r#"
                CREATE TABLE IF NOT EXISTS local_session_state (
                    session_id TEXT NOT NULL,
                    event_id TEXT NOT NULL,
                    patch TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (session_id, event_id)
                )
                "#,
            ),
            (
                "global state table",
                r#"
                CREATE TABLE IF NOT EXISTS global_session_state (
                    app_id TEXT NOT NULL,
                    event_id TEXT NOT NULL,
                    patch TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (app_id, event_id)
                )
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Migration {
                    message: format!("Failed to create {what}: {e}"),
                })?;
        }

        Ok(())
    }

    fn decode_message(data: &str) -> Result<Message, StoreError> {
        serde_json::from_str(data)
            .map_err(|e| StoreError::serialization(format!("Invalid message data: {e}")))
    }

    fn decode_patch(data: &str) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
        serde_json::from_str(data)
            .map_err(|e| StoreError::serialization(format!("Invalid state patch: {e}")))
    }

    fn encode_patch(patch: &serde_json::Map<String, serde_json::Value>) -> Result<String, StoreError> {
        serde_json::to_string(patch)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize patch: {e}")))
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn put_message(&self, message: &Message) -> Result<(), StoreError> {
        let data = serde_json::to_string(message)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize message: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, timestamp, data)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                session_id = excluded.session_id,
                timestamp = excluded.timestamp,
                data = excluded.data
            "#,
        )
        .bind(message.id.as_str())
        .bind(message.session_id.as_str())
        .bind(message.timestamp as i64)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("Failed to upsert message: {e}")))?;

        Ok(())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query("SELECT data FROM messages WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database(format!("Failed to load message: {e}")))?;

        row.map(|r| {
            let data: String = r.get("data");
            Self::decode_message(&data)
        })
        .transpose()
    }

    async fn query_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT data
            FROM messages
            WHERE session_id = ?1
            ORDER BY timestamp ASC, rowid ASC
            "#,
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("Failed to query messages: {e}")))?;

        rows.iter()
            .map(|row| {
                let data: String = row.get("data");
                Self::decode_message(&data)
            })
            .collect()
    }

    async fn put_local_state(&self, state: &LocalSessionState) -> Result<(), StoreError> {
        let patch = Self::encode_patch(&state.patch)?;
        sqlx::query(
            r#"
            INSERT INTO local_session_state (session_id, event_id, patch)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(session_id, event_id) DO UPDATE SET
                patch = excluded.patch,
                updated_at = datetime('now')
            "#,
        )
        .bind(state.session_id.as_str())
        .bind(state.event_id.as_str())
        .bind(&patch)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("Failed to upsert local state: {e}")))?;

        Ok(())
    }

    async fn put_global_state(&self, state: &GlobalSessionState) -> Result<(), StoreError> {
        let patch = Self::encode_patch(&state.patch)?;
        sqlx::query(
            r#"
            INSERT INTO global_session_state (app_id, event_id, patch)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(app_id, event_id) DO UPDATE SET
                patch = excluded.patch,
                updated_at = datetime('now')
            "#,
        )
        .bind(state.app_id.as_str())
        .bind(state.event_id.as_str())
        .bind(&patch)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("Failed to upsert global state: {e}")))?;

        Ok(())
    }

    async fn load_local_state(
        &self,
        session_id: &SessionId,
        event_id: &EventId,
    ) -> Result<Option<LocalSessionState>, StoreError> {
        let row = sqlx::query(
            "SELECT patch FROM local_session_state WHERE session_id = ?1 AND event_id = ?2",
        )
        .bind(session_id.as_str())
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("Failed to load local state: {e}")))?;

        row.map(|r| {
            let patch: String = r.get("patch");
            Ok(LocalSessionState {
                session_id: session_id.clone(),
                event_id: event_id.clone(),
                patch: Self::decode_patch(&patch)?,
            })
        })
        .transpose()
    }

    async fn load_global_state(
        &self,
        app_id: &AppId,
        event_id: &EventId,
    ) -> Result<Option<GlobalSessionState>, StoreError> {
        let row = sqlx::query(
            "SELECT patch FROM global_session_state WHERE app_id = ?1 AND event_id = ?2",
        )
        .bind(app_id.as_str())
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("Failed to load global state: {e}")))?;

        row.map(|r| {
            let patch: String = r.get("patch");
            Ok(GlobalSessionState {
                app_id: app_id.clone(),
                event_id: event_id.clone(),
                patch: Self::decode_patch(&patch)?,
            })
        })
        .transpose()
    }
}
