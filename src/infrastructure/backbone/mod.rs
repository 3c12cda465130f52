//! Backbone Implementations - 跨实例发布/订阅
//!
//! - redis_backbone: 生产环境，Redis PUBLISH/SUBSCRIBE
//! - memory: 进程内总线，用于测试和单实例部署

mod memory;
mod redis_backbone;

pub use self::memory::{MemoryBus, MemoryPublisher, MemorySubscriber};
pub use self::redis_backbone::{open_redis, RedisPublisher, RedisSubscriber};

use std::sync::{Arc, PoisonError, RwLock};

use crate::application::ports::{Envelope, MessageHandler};

/// 已注册的消息处理器，按注册顺序依次调用
#[derive(Clone, Default)]
pub(crate) struct HandlerRegistry {
    handlers: Arc<RwLock<Vec<Arc<dyn MessageHandler>>>>,
}

impl HandlerRegistry {
    pub(crate) fn register(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub(crate) fn dispatch(&self, envelope: &Envelope) {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter() {
            handler.handle(envelope);
        }
    }

    pub(crate) fn detach(&self) {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter() {
            handler.on_detached();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
