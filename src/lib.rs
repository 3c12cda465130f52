//! Chatty - 多实例实时连接网关
//!
//! 应用层 (application/):
//! - Error: 错误分类体系
//! - Gateway: 长连接、topic 成员关系、消息路由
//! - Session: 签名 Cookie 与双密钥轮换
//! - Ports: Backbone 发布/订阅端口
//!
//! 基础设施层 (infrastructure/):
//! - Backbone: Redis pub/sub 与进程内总线
//! - HTTP: 安全中间件链、REST、WebSocket
//! - Persistence: 数据库连接与健康监督
//!
//! 启动 (bootstrap): 固定顺序组装并监听

pub mod application;
pub mod bootstrap;
pub mod config;
pub mod infrastructure;

pub use bootstrap::{BackboneSource, Bootstrap, BootstrapError, Stage};
pub use config::{load_config, AppConfig};
