use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mirgpt_core::ConversationSession;
use parking_lot::RwLock;
use sqlx::{Row, SqlitePool};

pub trait TranscriptRepository: Send + Sync {
    async fn load_session(&self, session_id: &str) -> Result<Option<ConversationSession>>;
    async fn upsert_session(&self, session: &ConversationSession) -> Result<()>;
    async fn delete_session(&self, session_id: &str) -> Result<bool>;
    async fn list_session_ids(&self) -> Result<Vec<String>>;
    /// Removes sessions idle since before `cutoff`.
    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<String, ConversationSession>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TranscriptRepository for MemoryStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<ConversationSession>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn upsert_session(&self, session: &ConversationSession) -> Result<()> {
        self.sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.write().remove(session_id).is_some())
    }

    async fn list_session_ids(&self) -> Result<Vec<String>> {
        let mut ids = self.sessions.read().keys().cloned().collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0_u64;
        self.sessions.write().retain(|_, value| {
            let keep = value.updated_at >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });

        Ok(removed)
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transcripts (
              session_id TEXT PRIMARY KEY,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              messages_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl TranscriptRepository for SqliteStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<ConversationSession>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, created_at, updated_at, messages_json
            FROM transcripts
            WHERE session_id = ?1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let messages_json: String = row.get("messages_json");
        let messages = serde_json::from_str(&messages_json)
            .with_context(|| format!("corrupt transcript for session {}", session_id))?;

        let session = ConversationSession {
            session_id: row.get("session_id"),
            messages,
            created_at: row
                .get::<String, _>("created_at")
                .parse()
                .unwrap_or_else(|_| Utc::now()),
            updated_at: row
                .get::<String, _>("updated_at")
                .parse()
                .unwrap_or_else(|_| Utc::now()),
        };

        Ok(Some(session))
    }

    async fn upsert_session(&self, session: &ConversationSession) -> Result<()> {
        let messages_json = serde_json::to_string(&session.messages)?;

        sqlx::query(
            r#"
            INSERT INTO transcripts (session_id, created_at, updated_at, messages_json)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(session_id) DO UPDATE SET
              updated_at=excluded.updated_at,
              messages_json=excluded.messages_json
            "#,
        )
        .bind(&session.session_id)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(messages_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM transcripts WHERE session_id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_session_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT session_id FROM transcripts ORDER BY session_id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get("session_id")).collect())
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM transcripts WHERE updated_at < ?1")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Sqlite(_) => "sqlite",
        }
    }
}

impl TranscriptRepository for Store {
    async fn load_session(&self, session_id: &str) -> Result<Option<ConversationSession>> {
        match self {
            Store::Memory(store) => store.load_session(session_id).await,
            Store::Sqlite(store) => store.load_session(session_id).await,
        }
    }

    async fn upsert_session(&self, session: &ConversationSession) -> Result<()> {
        match self {
            Store::Memory(store) => store.upsert_session(session).await,
            Store::Sqlite(store) => store.upsert_session(session).await,
        }
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        match self {
            Store::Memory(store) => store.delete_session(session_id).await,
            Store::Sqlite(store) => store.delete_session(session_id).await,
        }
    }

    async fn list_session_ids(&self) -> Result<Vec<String>> {
        match self {
            Store::Memory(store) => store.list_session_ids().await,
            Store::Sqlite(store) => store.list_session_ids().await,
        }
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        match self {
            Store::Memory(store) => store.purge_idle(cutoff).await,
            Store::Sqlite(store) => store.purge_idle(cutoff).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use mirgpt_core::ChatMessage;

    use super::*;

    async fn exercise(store: Store) {
        let mut session = ConversationSession::with_id("session-a");
        session.append(ChatMessage::user("What is the attendance rule?"));
        session.append(ChatMessage::assistant("Attendance must be 80 percent."));
        store.upsert_session(&session).await.unwrap();

        let loaded = store.load_session("session-a").await.unwrap().unwrap();
        assert_eq!(loaded.messages, session.messages);
        assert_eq!(store.list_session_ids().await.unwrap(), vec!["session-a".to_string()]);

        session.clear();
        store.upsert_session(&session).await.unwrap();
        let loaded = store.load_session("session-a").await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);

        assert!(store.load_session("missing").await.unwrap().is_none());
        assert!(store.delete_session("session-a").await.unwrap());
        assert!(!store.delete_session("session-a").await.unwrap());
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        exercise(Store::memory()).await;
    }

    #[tokio::test]
    async fn sqlite_store_round_trip() {
        let store = Store::sqlite("sqlite::memory:").await.unwrap();
        assert_eq!(store.backend_name(), "sqlite");
        exercise(store).await;
    }

    #[tokio::test]
    async fn purges_idle_sessions() {
        let store = MemoryStore::new();
        let mut stale = ConversationSession::with_id("stale");
        stale.updated_at = Utc::now() - Duration::hours(48);
        store.upsert_session(&stale).await.unwrap();
        store
            .upsert_session(&ConversationSession::with_id("fresh"))
            .await
            .unwrap();

        let removed = store.purge_idle(Utc::now() - Duration::hours(24)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.list_session_ids().await.unwrap(), vec!["fresh".to_string()]);
    }
}
