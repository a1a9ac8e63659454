//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本顺序出队预置回复，一个判定节点消费一条；流式变体把回复
//! 按词切成 Token。脚本耗尽或显式注入失败时返回错误，便于验证
//! 各节点的 fail-open / 致命分级。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use super::traits::{DecisionClient, DecisionRequest, TokenStream};
use crate::error::DecisionError;

enum Scripted {
    Reply(String),
    Failure(String),
}

/// 脚本化 Mock 客户端
#[derive(Default)]
pub struct MockDecisionClient {
    script: Mutex<VecDeque<Scripted>>,
}

impl MockDecisionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条成功回复
    pub fn push_reply(&self, reply: impl Into<String>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Reply(reply.into()));
        self
    }

    /// 追加一次失败
    pub fn push_failure(&self, reason: impl Into<String>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Failure(reason.into()));
        self
    }

    fn next(&self) -> Result<String, DecisionError> {
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Reply(r)) => Ok(r),
            Some(Scripted::Failure(reason)) => Err(DecisionError::Request(reason)),
            None => Err(DecisionError::Request("mock script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl DecisionClient for MockDecisionClient {
    async fn complete(&self, _request: &DecisionRequest) -> Result<String, DecisionError> {
        self.next()
    }

    async fn complete_stream(&self, _request: &DecisionRequest) -> Result<TokenStream, DecisionError> {
        let content = self.next()?;
        let tokens: Vec<Result<String, DecisionError>> = content
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(tokens)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::traits::drain_stream;

    #[tokio::test]
    async fn replies_in_script_order() {
        let mock = MockDecisionClient::new();
        mock.push_reply("first").push_reply("second");

        let req = DecisionRequest::new("ignored");
        assert_eq!(mock.complete(&req).await.unwrap(), "first");
        assert_eq!(mock.complete(&req).await.unwrap(), "second");
        assert!(mock.complete(&req).await.is_err());
    }

    #[tokio::test]
    async fn stream_reassembles_to_full_reply() {
        let mock = MockDecisionClient::new();
        mock.push_reply("What is your budget?");

        let stream = mock
            .complete_stream(&DecisionRequest::new("ignored"))
            .await
            .unwrap();
        let mut seen = 0usize;
        let full = drain_stream(stream, |_| seen += 1).await.unwrap();
        assert_eq!(full, "What is your budget?");
        assert!(seen > 1);
    }
}
