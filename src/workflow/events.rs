//! 引擎进度事件
//!
//! 引擎通过 mpsc 通道向连接层推送进度，"引擎推进" 与 "套接字写出"
//! 解耦：慢客户端不会拖慢节点执行，客户端掉线时发送端静默丢弃。

use tokio::sync::mpsc;

use crate::model::{ProductResult, RequirementSpec};
use crate::workflow::state::Node;

/// 一次运行期间可能产生的事件
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// 节点开始执行
    Progress { node: Node, message: String },
    Thinking { message: String },
    /// 流式生成片段
    Token { content: String },
    /// 澄清问题（运行随即暂停）
    Clarification {
        question: String,
        suggestions: Vec<String>,
        context: Option<String>,
    },
    /// 最终结果
    Results {
        products: Vec<ProductResult>,
        requirement_spec: Option<RequirementSpec>,
        summary: String,
    },
    /// 致命失败（每次运行至多一条）
    Failed {
        code: &'static str,
        message: String,
        recoverable: bool,
    },
    Done { message: String },
}

pub type EventSink = mpsc::UnboundedSender<WorkflowEvent>;

/// 发送事件，接收端已关闭时丢弃
pub(crate) fn emit(events: &EventSink, event: WorkflowEvent) {
    let _ = events.send(event);
}
