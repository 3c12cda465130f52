//! In-Memory Backbone
//!
//! 进程内总线。每次 `open()` 得到的 (Publisher, Subscriber) 相当于挂在
//! 同一 Backbone 上的一个独立进程，用于单实例部署和多实例测试。

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::HandlerRegistry;
use crate::application::health::HealthMonitor;
use crate::application::ports::{
    BackboneError, BackbonePublisher, BackboneSubscriber, Envelope, MessageHandler,
};

struct BusInner {
    subscribers: DashMap<Uuid, mpsc::UnboundedSender<Envelope>>,
    available: AtomicBool,
}

/// 进程内总线
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// 模拟 Backbone 不可达：`open()` 和 `send()` 都会失败
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// 断开所有订阅端
    pub fn detach_subscribers(&self) {
        self.inner.subscribers.clear();
    }

    /// 打开一对发布/订阅句柄
    pub async fn open(
        &self,
        health: HealthMonitor,
    ) -> Result<(Arc<MemoryPublisher>, Arc<MemorySubscriber>), BackboneError> {
        if !self.is_available() {
            return Err(BackboneError::Unavailable("memory bus offline".to_string()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let subscriber_id = Uuid::new_v4();
        self.inner.subscribers.insert(subscriber_id, tx);

        let registry = HandlerRegistry::default();
        let dispatch = registry.clone();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                dispatch.dispatch(&envelope);
            }
            health.report_degraded("memory bus subscriber detached");
            dispatch.detach();
        });

        tracing::debug!(subscriber_id = %subscriber_id, "Memory backbone opened");

        Ok((
            Arc::new(MemoryPublisher {
                bus: self.clone(),
            }),
            Arc::new(MemorySubscriber { registry }),
        ))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// 进程内发布端
pub struct MemoryPublisher {
    bus: MemoryBus,
}

#[async_trait]
impl BackbonePublisher for MemoryPublisher {
    async fn send(&self, envelope: &Envelope) -> Result<(), BackboneError> {
        if !self.bus.is_available() {
            return Err(BackboneError::Publish("memory bus offline".to_string()));
        }

        // 接收任务已经退出的订阅端顺带移除
        self.bus.inner.subscribers.retain(|subscriber_id, tx| {
            let alive = tx.send(envelope.clone()).is_ok();
            if !alive {
                tracing::debug!(subscriber_id = %subscriber_id, "Pruning closed memory subscriber");
            }
            alive
        });
        Ok(())
    }
}

/// 进程内订阅端
pub struct MemorySubscriber {
    registry: HandlerRegistry,
}

impl MemorySubscriber {
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }
}

impl BackboneSubscriber for MemorySubscriber {
    fn on_message(&self, handler: Arc<dyn MessageHandler>) {
        self.registry.register(handler);
    }
}
