//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TALKSHOP__*` 覆盖
//! （双下划线表示嵌套，如 `TALKSHOP__SERVER__WS_BIND=0.0.0.0:9000`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub collaborators: CollaboratorsSection,
}

/// [server] 段：监听地址、连接上限、心跳
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_ws_bind")]
    pub ws_bind: String,
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// 心跳间隔（秒）
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_ws_bind() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_http_bind() -> String {
    "127.0.0.1:9100".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_heartbeat_interval() -> u64 {
    30
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            ws_bind: default_ws_bind(),
            http_bind: default_http_bind(),
            max_connections: default_max_connections(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

/// [session] 段：过期时间与持久化路径
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// 会话绝对过期时间（小时）
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
    /// SQLite 路径，未设置时用内存存储
    pub db_path: Option<PathBuf>,
}

fn default_ttl_hours() -> i64 {
    24
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            db_path: None,
        }
    }
}

/// [llm] 段：OpenAI 兼容端点与模型
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// 兼容端点，如自建代理；未设置时走官方端点
    pub base_url: Option<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
        }
    }
}

/// [collaborators] 段：协作服务地址与重试参数
#[derive(Debug, Clone, Deserialize)]
pub struct CollaboratorsSection {
    #[serde(default = "default_media_url")]
    pub media_url: String,
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_collab_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_media_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_catalog_url() -> String {
    "http://127.0.0.1:8002".to_string()
}

fn default_collab_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for CollaboratorsSection {
    fn default() -> Self {
        Self {
            media_url: default_media_url(),
            catalog_url: default_catalog_url(),
            timeout_secs: default_collab_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            session: SessionSection::default(),
            llm: LlmSection::default(),
            collaborators: CollaboratorsSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TALKSHOP__* 可覆盖
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TALKSHOP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.max_connections, 1000);
        assert_eq!(cfg.server.heartbeat_interval_secs, 30);
        assert_eq!(cfg.session.ttl_hours, 24);
        assert_eq!(cfg.collaborators.max_attempts, 3);
    }
}
