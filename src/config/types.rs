//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;

use crate::application::retry::RetryPolicy;

/// 本地开发环境名称，只有该环境下 Session Cookie 不设置 `secure`
pub const DEVELOPMENT_ENV: &str = "development";

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,

    /// Session Cookie 配置
    #[serde(default)]
    pub session: SessionConfig,

    /// 发布/订阅 Backbone 配置
    #[serde(default)]
    pub backbone: BackboneConfig,

    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,

    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,

    /// 部署环境（development / staging / production ...）
    #[serde(default = "default_environment")]
    pub environment: String,

    /// 允许跨域访问的客户端 Origin
    #[serde(default = "default_client_url")]
    pub client_url: String,

    /// 请求体大小上限（字节）
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_environment() -> String {
    DEVELOPMENT_ENV.to_string()
}

fn default_client_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_body_limit() -> usize {
    50 * 1024 * 1024 // 50 MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            client_url: default_client_url(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl ServerConfig {
    /// 获取服务器地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment == DEVELOPMENT_ENV
    }
}

/// Session Cookie 配置
#[derive(Clone, Deserialize)]
pub struct SessionConfig {
    /// Cookie 名称
    #[serde(default = "default_session_name")]
    pub name: String,

    /// 当前签名密钥
    #[serde(default)]
    pub current_key: String,

    /// 上一把签名密钥（轮换期间仍然接受）
    #[serde(default)]
    pub previous_key: String,

    /// 最大有效期（毫秒）
    #[serde(default = "default_session_max_age")]
    pub max_age_ms: i64,
}

fn default_session_name() -> String {
    "session".to_string()
}

fn default_session_max_age() -> i64 {
    24 * 7 * 3_600_000 // 7 天
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            current_key: String::new(),
            previous_key: String::new(),
            max_age_ms: default_session_max_age(),
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("name", &self.name)
            .field("current_key", &"<redacted>")
            .field("previous_key", &"<redacted>")
            .field("max_age_ms", &self.max_age_ms)
            .finish()
    }
}

/// Backbone 配置
#[derive(Debug, Clone, Deserialize)]
pub struct BackboneConfig {
    /// Redis 连接 URL
    #[serde(default = "default_backbone_url")]
    pub url: String,

    /// 广播使用的 channel
    #[serde(default = "default_backbone_channel")]
    pub channel: String,

    /// 启动时的连接重试策略
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_backbone_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_backbone_channel() -> String {
    "chatty#fanout".to_string()
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            url: default_backbone_url(),
            channel: default_backbone_channel(),
            retry: RetryPolicy::default(),
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库 URL
    #[serde(default = "default_db_url")]
    pub url: String,

    /// 最大连接数
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// 连接与重连的重试策略
    #[serde(default)]
    pub retry: RetryPolicy,

    /// 健康检查间隔（秒）
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

fn default_db_url() -> String {
    "sqlite:data/chatty.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_health_check_interval() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            max_connections: default_max_connections(),
            retry: RetryPolicy::default(),
            health_check_interval_secs: default_health_check_interval(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否启用 JSON 格式
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.session.name, "session");
        assert_eq!(config.session.max_age_ms, 604_800_000);
        assert_eq!(config.backbone.url, "redis://127.0.0.1:6379");
    }

    #[test]
    fn test_server_addr() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), "0.0.0.0:5000");
    }

    #[test]
    fn test_development_switch() {
        let mut config = ServerConfig::default();
        assert!(config.is_development());
        config.environment = "production".to_string();
        assert!(!config.is_development());
    }

    #[test]
    fn test_session_keys_are_redacted() {
        let config = SessionConfig {
            current_key: "top-secret".to_string(),
            ..SessionConfig::default()
        };
        assert!(!format!("{:?}", config).contains("top-secret"));
    }
}
