//! Connection - 单个客户端会话
//!
//! 同一连接上的 join/leave/disconnect 通过连接级互斥锁串行执行。

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};

use super::{validate_topic, ConnectionId, Gateway, GatewayError, Member};
use crate::application::ports::Envelope;

/// 投递到连接的消息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delivery {
    pub topic: String,
    /// 发布者连接 ID
    pub from: ConnectionId,
    pub payload: serde_json::Value,
}

/// 入队的投递，epoch 是入队时该连接在 topic 上的成员代次
pub(super) struct Queued {
    pub(super) epoch: u64,
    pub(super) envelope: Arc<Envelope>,
}

/// 连接的投递端：有界队列加驱逐信号
///
/// 队列满说明消费者跟不上，连接被标记为驱逐，之后由连接自己释放
#[derive(Clone)]
pub(super) struct Outbound {
    queue: mpsc::Sender<Queued>,
    eviction: Arc<watch::Sender<bool>>,
}

impl Outbound {
    pub(super) fn new(queue: mpsc::Sender<Queued>) -> Self {
        Self {
            queue,
            eviction: Arc::new(watch::Sender::new(false)),
        }
    }

    /// 非阻塞投递，不会拖慢同一 topic 上的其他成员
    pub(super) fn deliver(&self, connection_id: ConnectionId, queued: Queued) {
        match self.queue.try_send(queued) {
            Ok(()) => {}
            Err(TrySendError::Full(queued)) => {
                let first = self
                    .eviction
                    .send_if_modified(|evicted| !std::mem::replace(evicted, true));
                if first {
                    tracing::warn!(
                        connection_id = %connection_id,
                        topic = %queued.envelope.topic,
                        capacity = self.queue.max_capacity(),
                        "Delivery queue full, evicting slow connection"
                    );
                }
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %connection_id, "Dropping delivery to closed connection");
            }
        }
    }
}

struct ConnectionState {
    /// topic -> 加入时分配的 epoch
    memberships: HashMap<String, u64>,
    /// 断开后置为 None
    outbound: Option<Outbound>,
}

impl ConnectionState {
    fn new(outbound: Outbound) -> Self {
        Self {
            memberships: HashMap::new(),
            outbound: Some(outbound),
        }
    }
}

/// 已接入的连接
pub struct Connection {
    id: ConnectionId,
    principal: Option<String>,
    gateway: Gateway,
    state: Mutex<ConnectionState>,
    inbox: Mutex<mpsc::Receiver<Queued>>,
    eviction: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("evicted", &self.is_evicted())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(super) fn new(
        id: ConnectionId,
        principal: Option<String>,
        gateway: Gateway,
        outbound: Outbound,
        inbox: mpsc::Receiver<Queued>,
    ) -> Self {
        Self {
            id,
            principal,
            gateway,
            eviction: outbound.eviction.clone(),
            state: Mutex::new(ConnectionState::new(outbound)),
            inbox: Mutex::new(inbox),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub async fn is_closed(&self) -> bool {
        self.is_evicted() || self.state.lock().await.outbound.is_none()
    }

    /// 投递队列曾经写满，连接已被驱逐
    pub fn is_evicted(&self) -> bool {
        *self.eviction.borrow()
    }

    /// 等到连接被驱逐为止
    pub async fn evicted(&self) {
        let mut eviction = self.eviction.subscribe();
        let _ = eviction.wait_for(|evicted| *evicted).await;
    }

    /// 当前加入的 topic
    pub async fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.state.lock().await.memberships.keys().cloned().collect();
        topics.sort();
        topics
    }

    fn check_topic(topic: &str) -> Result<(), GatewayError> {
        match validate_topic(topic) {
            Some(reason) => Err(GatewayError::InvalidTopic(reason)),
            None => Ok(()),
        }
    }

    /// 加入 topic，重复加入是 no-op
    pub async fn join(&self, topic: &str) -> Result<(), GatewayError> {
        Self::check_topic(topic)?;

        let mut state = self.state.lock().await;
        let outbound = state
            .outbound
            .clone()
            .filter(|_| !self.is_evicted())
            .ok_or(GatewayError::ConnectionClosed(self.id))?;
        if state.memberships.contains_key(topic) {
            return Ok(());
        }

        let inner = &self.gateway.inner;
        let epoch = inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        inner
            .write_topics()
            .entry(topic.to_string())
            .or_default()
            .insert(self.id, Member { epoch, outbound });
        state.memberships.insert(topic.to_string(), epoch);

        tracing::debug!(connection_id = %self.id, topic = %topic, "Joined topic");
        Ok(())
    }

    /// 离开 topic
    ///
    /// 返回后该连接不会再收到这个 topic 的消息，包括已入队但尚未读取的
    pub async fn leave(&self, topic: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        if state.outbound.is_none() {
            return Err(GatewayError::ConnectionClosed(self.id));
        }
        if state.memberships.remove(topic).is_none() {
            return Ok(());
        }

        let mut topics = self.gateway.inner.write_topics();
        if let Some(members) = topics.get_mut(topic) {
            members.remove(&self.id);
            if members.is_empty() {
                topics.remove(topic);
            }
        }

        tracing::debug!(connection_id = %self.id, topic = %topic, "Left topic");
        Ok(())
    }

    /// 发布消息到 topic（所有实例上的成员）
    ///
    /// 立即返回，不等待 Backbone 传播
    pub async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), GatewayError> {
        Self::check_topic(topic)?;

        if self.is_closed().await {
            return Err(GatewayError::ConnectionClosed(self.id));
        }

        self.gateway
            .enqueue(Envelope {
                origin: self.gateway.instance_id(),
                publisher: self.id,
                topic: topic.to_string(),
                payload,
            })
            .await
    }

    /// 接收下一条消息，连接断开或被驱逐后返回 `None`
    ///
    /// 被驱逐的连接在这里释放全部成员关系
    pub async fn recv(&self) -> Option<Delivery> {
        let mut inbox = self.inbox.lock().await;

        loop {
            let queued = inbox.recv().await?;
            let mut state = self.state.lock().await;
            if self.is_evicted() {
                self.release(&mut state);
                return None;
            }
            state.outbound.as_ref()?;

            // leave 之前入队的消息，或重新 join 之前的旧消息
            if state.memberships.get(&queued.envelope.topic) != Some(&queued.epoch) {
                continue;
            }

            return Some(Delivery {
                topic: queued.envelope.topic.clone(),
                from: queued.envelope.publisher,
                payload: queued.envelope.payload.clone(),
            });
        }
    }

    /// 断开连接，原子地移除所有 topic 成员关系
    ///
    /// 幂等：重复调用不报错也没有副作用
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        self.release(&mut state);
    }

    fn release(&self, state: &mut ConnectionState) {
        if state.outbound.take().is_none() {
            return;
        }

        let memberships = std::mem::take(&mut state.memberships);
        {
            let mut topics = self.gateway.inner.write_topics();
            for topic in memberships.keys() {
                if let Some(members) = topics.get_mut(topic) {
                    members.remove(&self.id);
                    if members.is_empty() {
                        topics.remove(topic);
                    }
                }
            }
        }
        self.gateway.inner.connections.remove(&self.id);

        tracing::info!(
            connection_id = %self.id,
            topics = memberships.len(),
            "Connection closed"
        );
    }
}

// 升级失败等路径上未显式 disconnect 的连接
impl Drop for Connection {
    fn drop(&mut self) {
        let mut state = std::mem::replace(
            self.state.get_mut(),
            ConnectionState {
                memberships: HashMap::new(),
                outbound: None,
            },
        );
        self.release(&mut state);
    }
}
