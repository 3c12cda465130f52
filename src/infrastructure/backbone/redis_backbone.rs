//! Redis Backbone
//!
//! 发布端使用 multiplexed 连接执行 PUBLISH，订阅端使用独立的 pub/sub 连接
//! SUBSCRIBE 同一个 channel。两个连接都在启动时建立，进程生命周期内不重连。

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::AsyncCommands;
use std::sync::Arc;

use super::HandlerRegistry;
use crate::application::health::HealthMonitor;
use crate::application::ports::{
    BackboneError, BackbonePublisher, BackboneSubscriber, Envelope, MessageHandler,
};
use crate::config::BackboneConfig;

/// 打开 Redis 发布/订阅句柄
///
/// 在重试预算内失败则返回 `BackboneError::Unavailable`
pub async fn open_redis(
    config: &BackboneConfig,
    health: HealthMonitor,
) -> Result<(Arc<RedisPublisher>, Arc<RedisSubscriber>), BackboneError> {
    let (connection, pubsub) = config
        .retry
        .run("backbone.open", |_| connect(config))
        .await
        .map_err(|e| BackboneError::Unavailable(e.to_string()))?;

    tracing::info!(channel = %config.channel, "Redis backbone connected");

    let registry = HandlerRegistry::default();
    tokio::spawn(run_subscriber(
        pubsub,
        registry.clone(),
        health.clone(),
        config.channel.clone(),
    ));

    Ok((
        Arc::new(RedisPublisher {
            connection,
            channel: config.channel.clone(),
            health,
        }),
        Arc::new(RedisSubscriber { registry }),
    ))
}

async fn connect(config: &BackboneConfig) -> Result<(MultiplexedConnection, PubSub), redis::RedisError> {
    let client = redis::Client::open(config.url.as_str())?;
    let connection = client.get_multiplexed_async_connection().await?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(&config.channel).await?;
    Ok((connection, pubsub))
}

async fn run_subscriber(pubsub: PubSub, registry: HandlerRegistry, health: HealthMonitor, channel: String) {
    let mut messages = pubsub.into_on_message();

    while let Some(msg) = messages.next().await {
        let raw: String = match msg.get_payload() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Dropping non-text backbone message");
                continue;
            }
        };

        match Envelope::decode(&raw) {
            Ok(envelope) => registry.dispatch(&envelope),
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Dropping malformed backbone message");
            }
        }
    }

    health.report_degraded(format!("subscription to '{}' closed", channel));
    registry.detach();
}

/// Redis 发布端
pub struct RedisPublisher {
    connection: MultiplexedConnection,
    channel: String,
    health: HealthMonitor,
}

#[async_trait]
impl BackbonePublisher for RedisPublisher {
    async fn send(&self, envelope: &Envelope) -> Result<(), BackboneError> {
        let raw = envelope.encode()?;
        let mut connection = self.connection.clone();

        let result: redis::RedisResult<i64> = connection.publish(&self.channel, raw).await;
        match result {
            Ok(receivers) => {
                tracing::trace!(topic = %envelope.topic, receivers, "Envelope published");
                Ok(())
            }
            Err(e) => {
                self.health.report_degraded(format!("publish failed: {}", e));
                Err(BackboneError::Publish(e.to_string()))
            }
        }
    }
}

/// Redis 订阅端
pub struct RedisSubscriber {
    registry: HandlerRegistry,
}

impl BackboneSubscriber for RedisSubscriber {
    fn on_message(&self, handler: Arc<dyn MessageHandler>) {
        self.registry.register(handler);
    }
}
