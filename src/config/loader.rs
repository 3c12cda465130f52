//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::AppConfig;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// 按优先级从高到低合并配置：
/// 1. 环境变量（前缀 `CHATTY_`，层级分隔符 `__`）
/// 2. 配置文件（config.toml 或 config.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `CHATTY_SERVER__PORT=5000`
/// - `CHATTY_SERVER__CLIENT_URL=https://chat.example.com`
/// - `CHATTY_SESSION__CURRENT_KEY=...`
/// - `CHATTY_BACKBONE__URL=redis://redis:6379`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 首先设置默认值（最低优先级）
    builder = builder
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 5000)?
        .set_default("server.environment", "development")?
        .set_default("server.client_url", "http://localhost:3000")?
        .set_default("session.name", "session")?
        .set_default("session.max_age_ms", 24_i64 * 7 * 3_600_000)?
        .set_default("backbone.url", "redis://127.0.0.1:6379")?
        .set_default("backbone.channel", "chatty#fanout")?
        .set_default("database.url", "sqlite:data/chatty.db?mode=rwc")?
        .set_default("database.max_connections", 5)?
        .set_default("log.level", "info")?
        .set_default("log.json", false)?;

    // 2. 添加配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 添加环境变量（最高优先级）
    // 例如: CHATTY_BACKBONE__URL=redis://redis:6379
    builder = builder.add_source(
        Environment::with_prefix("CHATTY")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ConfigError::ParseError(format!("Failed to deserialize config: {}", e))
    })?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "Server port cannot be 0".to_string(),
        ));
    }

    if config.server.client_url.is_empty() {
        return Err(ConfigError::ValidationError(
            "Client URL cannot be empty".to_string(),
        ));
    }

    // 两把密钥都必须配置，且不能相同
    if config.session.current_key.is_empty() || config.session.previous_key.is_empty() {
        return Err(ConfigError::ValidationError(
            "Both session keys must be set".to_string(),
        ));
    }
    if config.session.current_key == config.session.previous_key {
        return Err(ConfigError::ValidationError(
            "Session keys must differ".to_string(),
        ));
    }

    if config.session.max_age_ms <= 0 {
        return Err(ConfigError::ValidationError(
            "Session max age must be positive".to_string(),
        ));
    }

    if config.backbone.url.is_empty() || config.backbone.channel.is_empty() {
        return Err(ConfigError::ValidationError(
            "Backbone URL and channel cannot be empty".to_string(),
        ));
    }

    if config.backbone.retry.max_attempts == 0 || config.database.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "Retry budgets must allow at least one attempt".to_string(),
        ));
    }

    if config.database.url.is_empty() {
        return Err(ConfigError::ValidationError(
            "Database URL cannot be empty".to_string(),
        ));
    }

    if config.database.health_check_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "Database health check interval cannot be 0".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("Client URL: {}", config.server.client_url);
    tracing::info!("Session Cookie: {} (max age {}ms)", config.session.name, config.session.max_age_ms);
    tracing::info!("Backbone: {} (channel {})", config.backbone.url, config.backbone.channel);
    tracing::info!("Backbone Retry: {:?}", config.backbone.retry);
    tracing::info!("Database: {}", config.database.url);
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}
