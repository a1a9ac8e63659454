//! 领域数据模型
//!
//! - **requirement**: 结构化购买需求（RequirementSpec）与价格约束
//! - **product**: 商品结果与聚合检索结果
//! - **media**: 媒体引用与媒体处理结果
//! - **session**: 会话记录与工作流阶段

pub mod media;
pub mod product;
pub mod requirement;
pub mod session;

pub use media::{ImageAttributes, MediaKind, MediaReference, TranscriptionResult};
pub use product::{ProductResult, SearchResults};
pub use requirement::{Marketplace, PriceFilter, ProductCondition, RequirementSpec};
pub use session::{Session, SessionSummary, WorkflowStage};
