//! 会话存储抽象层
//!
//! 定义统一的会话与断点存取接口，支持内存和 SQLite 两种实现。
//! 所有记录带绝对过期时间，读到过期记录一律视为 NotFound。

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{ImageAttributes, RequirementSpec, SearchResults, Session, WorkflowStage};
use crate::workflow::Checkpoint;

mod memory;
#[cfg(feature = "persist")]
mod sqlite;

pub use memory::MemorySessionStore;
#[cfg(feature = "persist")]
pub use sqlite::SqliteSessionStore;

/// 会话部分更新
///
/// `update` 是整记录 upsert：仅 Some 字段被写入，`updated_at` 总是刷新，
/// `expires_at` 不顺延。`requirement_spec` 置入时同时追加到历史。
#[derive(Debug, Default, Clone)]
pub struct SessionPatch {
    pub stage: Option<WorkflowStage>,
    pub requirement_spec: Option<RequirementSpec>,
    pub last_message: Option<String>,
    pub transcript: Option<String>,
    pub image_attributes: Option<ImageAttributes>,
    pub search_results: Option<SearchResults>,
    pub final_response: Option<String>,
    pub error: Option<String>,
}

impl SessionPatch {
    pub fn stage(stage: WorkflowStage) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, session: &mut Session) {
        if let Some(stage) = self.stage {
            session.stage = stage;
        }
        if let Some(spec) = self.requirement_spec {
            session.requirement_history.push(spec.clone());
            session.requirement_spec = Some(spec);
        }
        if let Some(msg) = self.last_message {
            session.last_message = Some(msg);
        }
        if let Some(t) = self.transcript {
            session.transcript = Some(t);
        }
        if let Some(attrs) = self.image_attributes {
            session.image_attributes = Some(attrs);
        }
        if let Some(results) = self.search_results {
            session.search_results = Some(results);
        }
        if let Some(resp) = self.final_response {
            session.final_response = Some(resp);
        }
        if let Some(err) = self.error {
            session.error = Some(err);
        }
        session.updated_at = chrono::Utc::now();
    }
}

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 创建会话（同键覆盖）
    async fn create(&self, session_id: &str, user_id: &str) -> Result<Session, StoreError>;

    /// 读取会话，过期记录返回 NotFound
    async fn get(&self, session_id: &str) -> Result<Session, StoreError>;

    /// 部分更新，返回更新后的完整记录
    async fn update(&self, session_id: &str, patch: SessionPatch) -> Result<Session, StoreError>;

    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// 澄清计数 +1，返回新值
    async fn increment_clarification_count(&self, session_id: &str) -> Result<u32, StoreError>;

    /// 写入断点（每个节点执行后调用）
    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError>;

    /// 读取该会话最近一个断点
    async fn load_checkpoint(&self, session_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// 运行完成或失败后清除断点
    async fn clear_checkpoints(&self, session_id: &str) -> Result<(), StoreError>;

    /// 清理过期会话，返回清理条数
    async fn cleanup_expired(&self) -> usize;
}

/// 创建会话存储
///
/// 提供 db_path 且启用 persist feature 时用 SQLite，否则用内存实现。
pub async fn create_session_store(
    db_path: Option<&std::path::Path>,
    ttl: chrono::Duration,
) -> Arc<dyn SessionStore> {
    #[cfg(feature = "persist")]
    if let Some(path) = db_path {
        match SqliteSessionStore::new(path, ttl).await {
            Ok(store) => {
                tracing::info!("Using SQLite session store: {:?}", path);
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Failed to open SQLite store, falling back to memory: {}", e);
            }
        }
    }

    #[cfg(not(feature = "persist"))]
    if db_path.is_some() {
        tracing::warn!("Persistent store requested but persist feature not enabled, using memory store");
    }

    tracing::info!("Using in-memory session store");
    Arc::new(MemorySessionStore::new(ttl))
}
