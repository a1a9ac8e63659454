//! SQLite 会话存储
//!
//! 会话与断点整记录 JSON 序列化入库，服务重启后可恢复。
//! 过期语义与内存实现一致：读到过期记录按 NotFound 处理并删除。

#![cfg(feature = "persist")]

use std::path::Path;

use async_trait::async_trait;
use sqlx::Row;

use super::{SessionPatch, SessionStore};
use crate::error::StoreError;
use crate::model::Session;
use crate::workflow::Checkpoint;

pub struct SqliteSessionStore {
    pool: sqlx::sqlite::SqlitePool,
    ttl: chrono::Duration,
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn ser_err(e: serde_json::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

impl SqliteSessionStore {
    pub async fn new(db_path: impl AsRef<Path>, ttl: chrono::Duration) -> Result<Self, sqlx::Error> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool, ttl };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                body TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT NOT NULL,
                checkpoint_id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (session_id, checkpoint_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions(expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        let body = serde_json::to_string(session).map_err(ser_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO sessions (session_id, user_id, body, expires_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&session.session_id)
        .bind(&session.user_id)
        .bind(&body)
        .bind(session.expires_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT body FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                let session: Session = serde_json::from_str(&body).map_err(ser_err)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, session_id: &str, user_id: &str) -> Result<Session, StoreError> {
        let session = Session::new(session_id.to_string(), user_id.to_string(), self.ttl);
        self.put(&session).await?;
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Session, StoreError> {
        match self.fetch(session_id).await? {
            Some(session) if session.is_expired() => {
                self.delete(session_id).await?;
                Err(StoreError::NotFound(session_id.to_string()))
            }
            Some(session) => Ok(session),
            None => Err(StoreError::NotFound(session_id.to_string())),
        }
    }

    async fn update(&self, session_id: &str, patch: SessionPatch) -> Result<Session, StoreError> {
        let mut session = self.get(session_id).await?;
        patch.apply(&mut session);
        self.put(&session).await?;
        Ok(session)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM checkpoints WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn increment_clarification_count(&self, session_id: &str) -> Result<u32, StoreError> {
        let mut session = self.get(session_id).await?;
        session.clarification_count += 1;
        session.updated_at = chrono::Utc::now();
        self.put(&session).await?;
        Ok(session.clarification_count)
    }

    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let body = serde_json::to_string(&checkpoint).map_err(ser_err)?;
        // 每会话只保留最近断点
        sqlx::query("DELETE FROM checkpoints WHERE session_id = ?")
            .bind(&checkpoint.session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query(
            "INSERT INTO checkpoints (session_id, checkpoint_id, body, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&checkpoint.session_id)
        .bind(&checkpoint.checkpoint_id)
        .bind(&body)
        .bind(checkpoint.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_checkpoint(&self, session_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query(
            "SELECT body FROM checkpoints WHERE session_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                let checkpoint: Checkpoint = serde_json::from_str(&body).map_err(ser_err)?;
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    async fn clear_checkpoints(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM checkpoints WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn cleanup_expired(&self) -> usize {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "DELETE FROM checkpoints WHERE session_id IN
             (SELECT session_id FROM sessions WHERE expires_at <= ?)",
        )
        .bind(now)
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            tracing::warn!("Checkpoint cleanup failed: {}", e);
        }

        match sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
        {
            Ok(r) => r.rows_affected() as usize,
            Err(e) => {
                tracing::warn!("Session cleanup failed: {}", e);
                0
            }
        }
    }
}
