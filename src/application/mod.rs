//! 应用层 - 核心逻辑
//!
//! 包含：
//! - error: 错误分类体系
//! - gateway: 长连接管理、topic 成员关系、消息路由
//! - ports: Backbone 发布/订阅端口
//! - session: Session Cookie 签名与校验
//! - health / retry: 依赖健康状态与有界重试

pub mod error;
pub mod gateway;
pub mod health;
pub mod ports;
pub mod retry;
pub mod session;

pub use error::{ClassifiedError, ErrorKind, ErrorRecord};
pub use gateway::{Connection, ConnectionId, Delivery, Gateway, GatewayError, GatewayOptions};
pub use health::{HealthMonitor, HealthState};
pub use ports::{BackboneError, BackbonePublisher, BackboneSubscriber, Envelope, MessageHandler};
pub use retry::RetryPolicy;
pub use session::{SessionData, SessionError, SessionKeys, VerifiedSession};
