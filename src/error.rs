//! 编排器错误类型
//!
//! 分层错误：存储 / 协作服务 / LLM 决策 / 校验，各自独立 enum，
//! 引擎层用 OrchestratorError 汇总。非致命错误在节点内吸收并记日志，
//! 致命错误把会话置为 failed 并向客户端发一条 error 事件。

use thiserror::Error;

/// 会话存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    /// 瞬时失败，调用方可重试
    #[error("Session store unavailable: {0}")]
    Unavailable(String),

    /// 记录不存在或已过期
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session store serialization error: {0}")]
    Serialization(String),
}

/// 协作服务（媒体处理 / 商品检索）调用错误
#[derive(Error, Debug)]
pub enum CollabError {
    /// 重试耗尽后仍不可用（超时 / 连接重置 / 5xx）
    #[error("{service} unavailable after {attempts} attempts: {reason}")]
    Unavailable {
        service: &'static str,
        attempts: u32,
        reason: String,
    },

    /// 4xx 类校验失败，不重试
    #[error("{service} rejected request: {reason}")]
    Rejected {
        service: &'static str,
        reason: String,
    },

    #[error("{service} returned malformed response: {reason}")]
    BadResponse {
        service: &'static str,
        reason: String,
    },
}

/// LLM 决策端口错误
#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("LLM request failed: {0}")]
    Request(String),

    /// 纠偏重试后输出仍不符合约定 schema
    #[error("LLM returned unparseable output: {0}")]
    Unparseable(String),
}

/// 引擎层错误汇总（§错误分级：致命路径才会出现在这里）
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Collaborator(#[from] CollabError),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    /// 入站消息不合法，立即拒绝，不重试
    #[error("Validation error: {0}")]
    Validation(String),
}

impl OrchestratorError {
    /// 对客户端呈现的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Store(StoreError::NotFound(_)) => "session_not_found",
            OrchestratorError::Store(_) => "store_unavailable",
            OrchestratorError::Collaborator(_) => "collaborator_unavailable",
            OrchestratorError::Decision(_) => "decision_unavailable",
            OrchestratorError::Validation(_) => "validation_error",
        }
    }

    /// 用户换一条消息重试是否有意义
    pub fn recoverable(&self) -> bool {
        !matches!(self, OrchestratorError::Validation(_))
    }
}
