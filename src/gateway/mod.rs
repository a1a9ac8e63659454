//! WebSocket 网关
//!
//! - **message**: 双向线缆协议（入站消息 / 出站事件信封）
//! - **hub**: 连接管理——注册表、连接上限、心跳、过期清扫、停机
//! - **router**: 协议路由——入站消息映射为引擎调用，引擎事件映射为
//!   出站事件
//!
//! 注册表只是活动套接字的本地缓存，会话状态的唯一事实源是
//! Session Store；水平扩容时各实例共享存储、各管各的套接字。

mod hub;
mod message;
mod router;

pub use hub::{ConnectionRegistry, Hub, HubConfig};
pub use message::{ClientMessage, ErrorSeverity, EventKind, ServerEvent};
