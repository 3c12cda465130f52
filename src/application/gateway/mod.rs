//! Connection Gateway - 长连接管理与消息路由
//!
//! - 接入：校验 Origin 和 Session Cookie 后创建 `Connection`
//! - 路由：publish 一律经过 Backbone，Backbone 回调时按 topic 成员表投递
//! - 一致性：成员表由单个读写锁保护，leave/disconnect 与投递互斥
//! - 背压：每个连接的投递队列有界，写满的慢消费者被驱逐
//!
//! Backbone 降级时（发布失败或订阅端断开），消息直接投递给本地成员，尽力而为。
//! 订阅仍在且发布再次成功时，健康状态恢复。

mod connection;
mod topic;

pub use connection::{Connection, Delivery};
pub use topic::{validate_topic, MAX_TOPIC_LEN};

use dashmap::DashMap;
use http::header::ORIGIN;
use http::HeaderMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::application::error::ClassifiedError;
use crate::application::health::HealthMonitor;
use crate::application::ports::{BackbonePublisher, BackboneSubscriber, Envelope, MessageHandler};
use crate::application::session::SessionKeys;

use connection::{Outbound, Queued};

pub type ConnectionId = Uuid;

/// 单个连接的投递队列容量，写满即驱逐该连接
pub const DELIVERY_QUEUE_CAPACITY: usize = 256;

/// 发往 Backbone 的发布队列容量，写满时 publish 等待
pub const OUTBOX_CAPACITY: usize = 1024;

/// Gateway 错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Connection rejected: {0}")]
    ConnectionRejected(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(ConnectionId),

    #[error("Backbone unavailable")]
    BackboneUnavailable,
}

impl From<GatewayError> for ClassifiedError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::ConnectionRejected(_) => ClassifiedError::not_authorized(e.to_string()),
            GatewayError::InvalidTopic(_) => ClassifiedError::validation(e.to_string()),
            GatewayError::ConnectionClosed(_) => ClassifiedError::bad_request(e.to_string()),
            GatewayError::BackboneUnavailable => {
                ClassifiedError::service_unavailable(e.to_string())
            }
        }
    }
}

/// Gateway 配置
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// 允许的客户端 Origin，与 HTTP CORS 白名单一致
    pub allowed_origin: String,
}

/// topic 成员
struct Member {
    epoch: u64,
    outbound: Outbound,
}

type TopicTable = HashMap<String, HashMap<ConnectionId, Member>>;

struct Inner {
    instance_id: Uuid,
    options: GatewayOptions,
    keys: Arc<SessionKeys>,
    /// connection_id -> principal
    connections: DashMap<ConnectionId, Option<String>>,
    topics: RwLock<TopicTable>,
    next_epoch: AtomicU64,
    outbox: mpsc::Sender<Envelope>,
    subscribed: AtomicBool,
    health: HealthMonitor,
}

impl Inner {
    fn read_topics(&self) -> RwLockReadGuard<'_, TopicTable> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_topics(&self) -> RwLockWriteGuard<'_, TopicTable> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 按成员表投递给本实例的连接
    fn route(&self, envelope: &Envelope) {
        let topics = self.read_topics();
        let Some(members) = topics.get(&envelope.topic) else {
            return;
        };

        let envelope = Arc::new(envelope.clone());
        for (connection_id, member) in members {
            let queued = Queued {
                epoch: member.epoch,
                envelope: envelope.clone(),
            };
            member.outbound.deliver(*connection_id, queued);
        }
    }
}

/// Backbone 回调，只持有弱引用，Gateway 释放后自动失效
struct BackboneRoute {
    inner: Weak<Inner>,
}

impl MessageHandler for BackboneRoute {
    fn handle(&self, envelope: &Envelope) {
        if let Some(inner) = self.inner.upgrade() {
            inner.route(envelope);
        }
    }

    fn on_detached(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscribed.store(false, Ordering::SeqCst);
            tracing::error!(
                instance_id = %inner.instance_id,
                "Backbone subscription lost, falling back to local delivery"
            );
        }
    }
}

/// Connection Gateway
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    /// 创建 Gateway 并挂到 Backbone 上
    ///
    /// 返回前订阅已注册，因此之后接入的连接不会漏掉任何消息
    pub fn new(
        options: GatewayOptions,
        keys: Arc<SessionKeys>,
        publisher: Arc<dyn BackbonePublisher>,
        subscriber: &dyn BackboneSubscriber,
        health: HealthMonitor,
    ) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let inner = Arc::new(Inner {
            instance_id: Uuid::new_v4(),
            options,
            keys,
            connections: DashMap::new(),
            topics: RwLock::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
            outbox: outbox_tx,
            subscribed: AtomicBool::new(true),
            health,
        });

        subscriber.on_message(Arc::new(BackboneRoute {
            inner: Arc::downgrade(&inner),
        }));
        tokio::spawn(run_outbox(Arc::downgrade(&inner), publisher, outbox_rx));

        tracing::info!(instance_id = %inner.instance_id, "Gateway attached to backbone");

        Self { inner }
    }

    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// 当前实例上某个 topic 的成员数
    pub fn topic_size(&self, topic: &str) -> usize {
        self.inner
            .read_topics()
            .get(topic)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.inner.health
    }

    /// 接入升级请求
    ///
    /// Origin 不在白名单或 Session Cookie 无效时拒绝；没有 Cookie 时作为匿名连接接入
    pub fn accept(&self, headers: &HeaderMap) -> Result<Connection, GatewayError> {
        if let Some(origin) = headers.get(ORIGIN) {
            let allowed = origin
                .to_str()
                .map(|o| o == self.inner.options.allowed_origin)
                .unwrap_or(false);
            if !allowed {
                tracing::warn!(origin = ?origin, "Upgrade rejected: origin not allowed");
                return Err(GatewayError::ConnectionRejected(
                    "origin not allowed".to_string(),
                ));
            }
        }

        let session = self.inner.keys.from_headers(headers).map_err(|e| {
            tracing::warn!(error = %e, "Upgrade rejected: invalid session");
            GatewayError::ConnectionRejected(e.to_string())
        })?;
        let principal = session.and_then(|s| s.data.user_id);

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(DELIVERY_QUEUE_CAPACITY);
        self.inner.connections.insert(id, principal.clone());

        tracing::info!(
            connection_id = %id,
            principal = ?principal,
            connections = self.inner.connections.len(),
            "Connection accepted"
        );

        Ok(Connection::new(
            id,
            principal,
            self.clone(),
            Outbound::new(tx),
            rx,
        ))
    }

    async fn enqueue(&self, envelope: Envelope) -> Result<(), GatewayError> {
        self.inner
            .outbox
            .send(envelope)
            .await
            .map_err(|_| GatewayError::BackboneUnavailable)
    }
}

/// 发布队列：单个任务按入队顺序发送，保证同一发布者同一 topic 的顺序
async fn run_outbox(
    inner: Weak<Inner>,
    publisher: Arc<dyn BackbonePublisher>,
    mut outbox: mpsc::Receiver<Envelope>,
) {
    while let Some(envelope) = outbox.recv().await {
        let sent = publisher.send(&envelope).await;

        let Some(inner) = inner.upgrade() else {
            break;
        };

        match sent {
            // 订阅仍在时发布成功即说明 Backbone 已恢复
            Ok(()) if inner.subscribed.load(Ordering::SeqCst) => inner.health.report_healthy(),
            Ok(()) => inner.route(&envelope),
            Err(e) => {
                inner.health.report_degraded(e.to_string());
                tracing::warn!(
                    topic = %envelope.topic,
                    error = %e,
                    "Backbone publish failed, delivering locally"
                );
                inner.route(&envelope);
            }
        }
    }
}

#[cfg(test)]
mod tests;
