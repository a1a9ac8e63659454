//! TalkShop - Rust 实时导购对话编排服务
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **observability**: tracing 初始化
//! - **error**: 分层错误类型
//! - **model**: 会话、需求、商品、媒体数据模型
//! - **store**: 会话与断点存储（内存 / SQLite）
//! - **llm**: LLM 决策端口（OpenAI 兼容 / Mock）
//! - **collab**: 媒体与检索协作服务的带重试客户端
//! - **workflow**: 十节点买方流程引擎（断点、暂停、恢复）
//! - **gateway**: WebSocket 网关（连接管理 + 协议路由）
//! - **inspect**: 只读 HTTP 检查面

pub mod collab;
pub mod config;
pub mod error;
pub mod gateway;
pub mod inspect;
pub mod llm;
pub mod model;
pub mod observability;
pub mod store;
pub mod workflow;
