//! Backbone Port - 跨实例发布/订阅
//!
//! 一个进程只打开一次 (Publisher, Subscriber)，由进程内所有 Gateway 共享。
//! 发送到任一 Publisher 的消息会投递到同一 Backbone 上所有进程的 Subscriber，
//! 包括发送者自己所在的进程。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::application::error::ClassifiedError;

/// Backbone 错误
#[derive(Debug, Error)]
pub enum BackboneError {
    #[error("Backbone unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to publish envelope: {0}")]
    Publish(String),

    #[error("Invalid envelope: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<BackboneError> for ClassifiedError {
    fn from(e: BackboneError) -> Self {
        ClassifiedError::service_unavailable(e.to_string())
    }
}

/// Backbone 上传输的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// 发布消息的 Gateway 实例
    pub origin: Uuid,
    /// 发布消息的连接
    pub publisher: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn encode(&self) -> Result<String, BackboneError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, BackboneError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// 消息处理器
///
/// 可能在任意 worker 上被调用，实现必须可重入且不能阻塞。
pub trait MessageHandler: Send + Sync {
    fn handle(&self, envelope: &Envelope);

    /// 订阅端与 Backbone 断开，之后不会再收到消息
    fn on_detached(&self) {}
}

/// 发布端
#[async_trait]
pub trait BackbonePublisher: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> Result<(), BackboneError>;
}

/// 订阅端
pub trait BackboneSubscriber: Send + Sync {
    /// 注册处理器，之后收到的每条消息都会按顺序交给它
    fn on_message(&self, handler: Arc<dyn MessageHandler>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_format() {
        let envelope = Envelope {
            origin: Uuid::nil(),
            publisher: Uuid::nil(),
            topic: "room1".to_string(),
            payload: serde_json::json!({"text": "hi"}),
        };

        let raw = envelope.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["topic"], "room1");
        assert_eq!(value["payload"]["text"], "hi");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Envelope::decode("not json"),
            Err(BackboneError::Codec(_))
        ));
    }

    #[test]
    fn test_backbone_error_is_service_unavailable() {
        let err: ClassifiedError = BackboneError::Unavailable("redis down".into()).into();
        assert_eq!(err.status_code().as_u16(), 503);
    }
}
