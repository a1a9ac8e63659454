//! 判定节点的结构化输出
//!
//! 每个 LLM 判定节点的结果收敛为封闭类型，进入状态机前先经过
//! schema 校验，路由永不依赖未经解析的模型原文。

use schemars::JsonSchema;
use serde::Deserialize;

/// NeedMediaOps 的判定结果
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MediaOpsDecision {
    pub need_stt: bool,
    pub need_vision: bool,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// NeedClarify 的判定结果
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ClarifyDecision {
    pub needs_clarification: bool,
    #[serde(default)]
    pub reason: String,
    /// 判定置信度（0-1）
    #[serde(default)]
    pub confidence: f64,
}

/// AskClarifyingQ 生成的澄清问题
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ClarifyingQuestion {
    pub question: String,
    /// 候选答案气泡，客户端可直接点选
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub context: Option<String>,
}
