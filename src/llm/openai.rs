//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url），
//! 托管模型的具体选择由配置决定。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::stream;

use super::traits::{DecisionClient, DecisionRequest, TokenStream};
use crate::error::DecisionError;

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiDecisionClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiDecisionClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn to_openai_messages(&self, request: &DecisionRequest) -> Vec<ChatCompletionRequestMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.clone())
                    .build()
                    .unwrap(),
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt.clone())
                .build()
                .unwrap(),
        ));
        messages
    }
}

#[async_trait]
impl DecisionClient for OpenAiDecisionClient {
    async fn complete(&self, request: &DecisionRequest) -> Result<String, DecisionError> {
        let api_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .messages(self.to_openai_messages(request))
            .build()
            .map_err(|e| DecisionError::Request(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(api_request)
            .await
            .map_err(|e| DecisionError::Request(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }

    async fn complete_stream(&self, request: &DecisionRequest) -> Result<TokenStream, DecisionError> {
        let content = self.complete(request).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}
