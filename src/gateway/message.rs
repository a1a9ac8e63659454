//! 网关消息协议定义
//!
//! 客户端到服务端四种消息：message（用户轮次）、answer（澄清回答，
//! 结构与 message 相同）、pong（心跳应答）、disconnect。服务端事件
//! 统一走信封格式，每条携带 session_id 与毫秒时间戳。

use serde::{Deserialize, Serialize};

use crate::model::{MediaReference, ProductResult, RequirementSpec};

/// 客户端 → 服务端
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 用户轮次：文本 + 可选媒体引用
    Message {
        text: String,
        #[serde(default)]
        media: Vec<MediaReference>,
    },
    /// 对挂起澄清问题的回答
    Answer {
        text: String,
        #[serde(default)]
        media: Vec<MediaReference>,
    },
    /// 心跳应答
    Pong {
        #[serde(default)]
        timestamp: u64,
    },
    /// 客户端主动断开
    Disconnect,
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// 服务端事件体
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// 连接建立，回传已解析的会话 ID
    Connected { message: String },

    /// 节点进度
    Progress { step: String, message: String },

    Thinking { message: String },

    /// 流式生成片段
    Token { content: String },

    /// 澄清问题
    Clarification {
        question: String,
        suggestions: Vec<String>,
        context: Option<String>,
    },

    /// 最终结果：商品列表 + 实际使用的需求
    Results {
        products: Vec<ProductResult>,
        requirement_spec: Option<RequirementSpec>,
        summary: String,
    },

    Error {
        code: String,
        message: String,
        severity: ErrorSeverity,
        recoverable: bool,
    },

    Done { message: String },

    /// 心跳
    Ping { timestamp: u64 },
}

/// 出站事件信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEvent {
    /// 事件 ID
    pub id: String,
    pub session_id: String,
    /// 毫秒时间戳
    pub timestamp: u64,
    pub event: EventKind,
}

impl ServerEvent {
    pub fn new(session_id: &str, event: EventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            timestamp: now_millis(),
            event,
        }
    }

    pub fn ping(session_id: &str) -> Self {
        Self::new(
            session_id,
            EventKind::Ping {
                timestamp: now_millis(),
            },
        )
    }

    pub fn error(session_id: &str, code: &str, message: &str, recoverable: bool) -> Self {
        Self::new(
            session_id,
            EventKind::Error {
                code: code.to_string(),
                message: message.to_string(),
                severity: if recoverable {
                    ErrorSeverity::Medium
                } else {
                    ErrorSeverity::High
                },
                recoverable,
            },
        )
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_parses_user_turn() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type": "message", "text": "laptop under $1000"}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::Message { ref text, ref media }
            if text == "laptop under $1000" && media.is_empty()));
    }

    #[test]
    fn answer_shares_message_shape() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "answer", "text": "under $800"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Answer { .. }));
    }

    #[test]
    fn server_event_envelope_carries_session_and_timestamp() {
        let ev = ServerEvent::new(
            "sess_1",
            EventKind::Progress {
                step: "parse_input".to_string(),
                message: "Executing: parse_input".to_string(),
            },
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["session_id"], "sess_1");
        assert_eq!(json["event"]["type"], "progress");
        assert!(json["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let parsed: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type": "auth", "token": "x"}"#);
        assert!(parsed.is_err());
    }
}
