//! LLM 决策端口抽象
//!
//! 所有后端实现 DecisionClient：complete（非流式）、complete_stream
//! （流式 Token）。判定节点通过 invoke_structured 获得约束到固定
//! schema 的结构化结果；格式不符时纠偏重试一次，仍失败按
//! DecisionUnavailable 处理，绝不把解析错误直接抛给状态机。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::error::DecisionError;

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, DecisionError>> + Send>>;

/// 一次决策调用的输入
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl DecisionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: 0.1,
            max_tokens: 1000,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait DecisionClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, request: &DecisionRequest) -> Result<String, DecisionError>;

    /// 流式完成，返回 Token 流
    async fn complete_stream(&self, request: &DecisionRequest) -> Result<TokenStream, DecisionError>;
}

/// 结构化调用：解析失败时追加纠偏提示重试一次
pub async fn invoke_structured<T: DeserializeOwned>(
    client: &dyn DecisionClient,
    request: &DecisionRequest,
) -> Result<T, DecisionError> {
    let raw = client.complete(request).await?;
    match parse_json_payload::<T>(&raw) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            tracing::warn!(error = %first_err, "Structured output parse failed, re-prompting");
            let corrective = DecisionRequest {
                system: request.system.clone(),
                prompt: format!(
                    "{}\n\nYour previous reply was not valid JSON ({}). \
                     Respond again with ONLY the JSON object, no prose and no code fences.",
                    request.prompt, first_err
                ),
                temperature: 0.0,
                max_tokens: request.max_tokens,
            };
            let retry = client.complete(&corrective).await?;
            parse_json_payload::<T>(&retry).map_err(DecisionError::Unparseable)
        }
    }
}

/// 收集整条 Token 流为完整文本，同时把每个 Token 交给回调
pub async fn drain_stream(
    mut stream: TokenStream,
    mut on_token: impl FnMut(&str),
) -> Result<String, DecisionError> {
    let mut full = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        on_token(&chunk);
        full.push_str(&chunk);
    }
    Ok(full)
}

/// 从模型输出中取出 JSON：剥掉 Markdown 代码栅栏与围绕的叙述文字
pub(crate) fn parse_json_payload<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let text = extract_json_block(raw);
    serde_json::from_str(text).map_err(|e| e.to_string())
}

fn extract_json_block(raw: &str) -> &str {
    let trimmed = raw.trim();
    // ```json ... ``` 围栏
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
    }
    // 正文夹杂 JSON 时取最外层花括号
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, PartialEq, Debug)]
    struct Flags {
        need_stt: bool,
        need_vision: bool,
    }

    #[test]
    fn parses_plain_json() {
        let flags: Flags =
            parse_json_payload(r#"{"need_stt": true, "need_vision": false}"#).unwrap();
        assert!(flags.need_stt);
    }

    #[test]
    fn strips_code_fences() {
        let raw = "```json\n{\"need_stt\": false, \"need_vision\": true}\n```";
        let flags: Flags = parse_json_payload(raw).unwrap();
        assert!(flags.need_vision);
    }

    #[test]
    fn extracts_json_from_prose() {
        let raw = "Sure, here is the result: {\"need_stt\": false, \"need_vision\": false} hope it helps";
        let flags: Flags = parse_json_payload(raw).unwrap();
        assert!(!flags.need_stt);
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_json_payload::<Flags>("definitely not json").is_err());
    }
}
