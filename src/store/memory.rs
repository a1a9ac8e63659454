//! 内存会话存储
//!
//! 进程内 RwLock<HashMap> 实现。过期记录在读取路径上惰性删除，
//! 另有 cleanup_expired 供周期清扫调用。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{SessionPatch, SessionStore};
use crate::error::StoreError;
use crate::model::Session;
use crate::workflow::Checkpoint;

pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    /// 每会话保留最近断点（checkpoint_id 仅作追溯）
    checkpoints: RwLock<HashMap<String, Vec<Checkpoint>>>,
    ttl: chrono::Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            checkpoints: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// 读取时剔除过期记录
    async fn evict_if_expired(&self, session_id: &str) -> bool {
        let expired = {
            let sessions = self.sessions.read().await;
            sessions
                .get(session_id)
                .map(|s| s.is_expired())
                .unwrap_or(false)
        };
        if expired {
            self.sessions.write().await.remove(session_id);
            self.checkpoints.write().await.remove(session_id);
        }
        expired
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session_id: &str, user_id: &str) -> Result<Session, StoreError> {
        let session = Session::new(session_id.to_string(), user_id.to_string(), self.ttl);
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Session, StoreError> {
        if self.evict_if_expired(session_id).await {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn update(&self, session_id: &str, patch: SessionPatch) -> Result<Session, StoreError> {
        if self.evict_if_expired(session_id).await {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        patch.apply(session);
        Ok(session.clone())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(session_id);
        self.checkpoints.write().await.remove(session_id);
        Ok(())
    }

    async fn increment_clarification_count(&self, session_id: &str) -> Result<u32, StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        session.clarification_count += 1;
        session.updated_at = chrono::Utc::now();
        Ok(session.clarification_count)
    }

    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.write().await;
        let entry = checkpoints
            .entry(checkpoint.session_id.clone())
            .or_default();
        entry.push(checkpoint);
        // 只保留恢复所需的最近一个
        if entry.len() > 1 {
            entry.drain(..entry.len() - 1);
        }
        Ok(())
    }

    async fn load_checkpoint(&self, session_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        if self.evict_if_expired(session_id).await {
            return Ok(None);
        }
        Ok(self
            .checkpoints
            .read()
            .await
            .get(session_id)
            .and_then(|v| v.last().cloned()))
    }

    async fn clear_checkpoints(&self, session_id: &str) -> Result<(), StoreError> {
        self.checkpoints.write().await.remove(session_id);
        Ok(())
    }

    async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut checkpoints = self.checkpoints.write().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
            checkpoints.remove(id);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkflowStage;

    fn short_ttl_store() -> MemorySessionStore {
        MemorySessionStore::new(chrono::Duration::milliseconds(50))
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = MemorySessionStore::new(chrono::Duration::hours(24));
        store.create("s1", "u1").await.unwrap();
        let session = store.get("s1").await.unwrap();
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.stage, WorkflowStage::Initial);
    }

    #[tokio::test]
    async fn get_after_ttl_is_not_found() {
        let store = short_ttl_store();
        store.create("s1", "u1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(matches!(
            store.get("s1").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_patch_applies_and_bumps_updated_at() {
        let store = MemorySessionStore::new(chrono::Duration::hours(24));
        let created = store.create("s1", "u1").await.unwrap();

        let patch = SessionPatch {
            stage: Some(WorkflowStage::Searching),
            last_message: Some("laptop under $1000".to_string()),
            ..SessionPatch::default()
        };
        let updated = store.update("s1", patch).await.unwrap();

        assert_eq!(updated.stage, WorkflowStage::Searching);
        assert_eq!(updated.last_message.as_deref(), Some("laptop under $1000"));
        assert!(updated.updated_at >= created.updated_at);
        // 过期时间不顺延
        assert_eq!(updated.expires_at, created.expires_at);
    }

    #[tokio::test]
    async fn clarification_count_increments() {
        let store = MemorySessionStore::new(chrono::Duration::hours(24));
        store.create("s1", "u1").await.unwrap();
        assert_eq!(store.increment_clarification_count("s1").await.unwrap(), 1);
        assert_eq!(store.increment_clarification_count("s1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cleanup_removes_expired_sessions() {
        let store = short_ttl_store();
        store.create("s1", "u1").await.unwrap();
        store.create("s2", "u2").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert_eq!(store.cleanup_expired().await, 2);
    }
}
