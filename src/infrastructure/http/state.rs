//! Application State

use crate::application::{Gateway, HealthMonitor};

/// 应用状态
///
/// Gateway 与 Backbone 在进程内只创建一次，由 Bootstrap 注入
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub backbone_health: HealthMonitor,
    /// 未配置数据库时为 None
    pub database_health: Option<HealthMonitor>,
}

impl AppState {
    pub fn new(gateway: Gateway, backbone_health: HealthMonitor) -> Self {
        Self {
            gateway,
            backbone_health,
            database_health: None,
        }
    }

    pub fn with_database_health(mut self, health: HealthMonitor) -> Self {
        self.database_health = Some(health);
        self
    }
}
