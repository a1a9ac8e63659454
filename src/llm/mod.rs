//! LLM 决策端口：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockDecisionClient;
pub use openai::OpenAiDecisionClient;
pub use traits::{invoke_structured, DecisionClient, DecisionRequest, TokenStream};
