//! 买方会话工作流
//!
//! 固定十节点状态机：输入解析 → 媒体判定 →（转写 / 图像抽取）→
//! 需求构建 → 澄清判定 →（澄清暂停 | 检索）→ 排序 → 完成。
//! 每个节点执行后写断点并更新会话，澄清即运行终止（非阻塞挂起），
//! 下一轮输入从断点处重入。

pub mod decisions;
pub mod engine;
pub mod events;
mod nodes;
pub mod prompts;
pub mod state;

pub use decisions::{ClarifyDecision, ClarifyingQuestion, MediaOpsDecision};
pub use engine::{EngineConfig, FlowEngine, RunOutcome};
pub use events::{EventSink, WorkflowEvent};
pub use state::{Checkpoint, Node, TurnInput, WorkflowState};
