//! 会话记录
//!
//! 会话是持久化的对话线程，由 Session Store 以 session_id 为键整记录
//! 读写，带 24 小时绝对过期时间。同一会话同一时刻至多一个工作流运行
//! 在写（单写者约束由引擎的会话级锁保证）。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::media::ImageAttributes;
use super::product::SearchResults;
use super::requirement::RequirementSpec;

/// 工作流阶段（持久化在会话上，供查询面与断点恢复使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Initial,
    MediaProcessing,
    RequirementBuilding,
    Clarifying,
    Searching,
    Ranking,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStage::Initial => "initial",
            WorkflowStage::MediaProcessing => "media_processing",
            WorkflowStage::RequirementBuilding => "requirement_building",
            WorkflowStage::Clarifying => "clarifying",
            WorkflowStage::Searching => "searching",
            WorkflowStage::Ranking => "ranking",
            WorkflowStage::Completed => "completed",
            WorkflowStage::Failed => "failed",
            WorkflowStage::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// 一条会话记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub stage: WorkflowStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_spec: Option<RequirementSpec>,
    /// 历史版本，增量细化时追加
    #[serde(default)]
    pub requirement_history: Vec<RequirementSpec>,
    #[serde(default)]
    pub clarification_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_attributes: Option<ImageAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_results: Option<SearchResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 绝对过期时间，创建时一次性设定，更新不顺延
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: String, user_id: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            stage: WorkflowStage::Initial,
            requirement_spec: None,
            requirement_history: Vec::new(),
            clarification_count: 0,
            last_message: None,
            transcript: None,
            image_attributes: None,
            search_results: None,
            final_response: None,
            error: None,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn summary(&self, connected: bool) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            stage: self.stage,
            clarification_count: self.clarification_count,
            has_requirement_spec: self.requirement_spec.is_some(),
            result_count: self
                .search_results
                .as_ref()
                .map(|r| r.products.len())
                .unwrap_or(0),
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
            connected,
        }
    }
}

/// 只读查询面返回的会话摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub stage: WorkflowStage,
    pub clarification_count: u32,
    pub has_requirement_spec: bool,
    pub result_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// 当前是否有在线连接
    pub connected: bool,
}
