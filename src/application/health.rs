//! 依赖健康状态
//!
//! 每个外部依赖（Backbone、数据库）持有一个 `HealthMonitor`，
//! 状态变化会记录日志，并可通过 watch channel 观察。

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// 健康状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded { reason: String },
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }
}

/// 健康状态监视器
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    component: &'static str,
    tx: Arc<watch::Sender<HealthState>>,
}

impl HealthMonitor {
    pub fn new(component: &'static str) -> Self {
        let (tx, _) = watch::channel(HealthState::Healthy);
        Self {
            component,
            tx: Arc::new(tx),
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn current(&self) -> HealthState {
        self.tx.borrow().clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.tx.borrow().is_healthy()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.tx.subscribe()
    }

    pub fn report_healthy(&self) {
        let changed = self.tx.send_if_modified(|state| {
            if state.is_healthy() {
                return false;
            }
            *state = HealthState::Healthy;
            true
        });
        if changed {
            tracing::info!(component = self.component, "Dependency recovered");
        }
    }

    /// 标记为降级状态；只有首次进入降级时记录 error 日志
    pub fn report_degraded(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let was_healthy = self.is_healthy();
        self.tx.send_replace(HealthState::Degraded {
            reason: reason.clone(),
        });
        if was_healthy {
            tracing::error!(component = self.component, reason = %reason, "Dependency degraded");
        } else {
            tracing::debug!(component = self.component, reason = %reason, "Dependency still degraded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let monitor = HealthMonitor::new("backbone");
        assert!(monitor.is_healthy());

        monitor.report_degraded("connection reset");
        assert_eq!(
            monitor.current(),
            HealthState::Degraded {
                reason: "connection reset".to_string()
            }
        );

        monitor.report_healthy();
        assert!(monitor.is_healthy());
    }

    #[tokio::test]
    async fn test_subscribers_observe_degradation() {
        let monitor = HealthMonitor::new("database");
        let mut rx = monitor.subscribe();

        monitor.report_degraded("probe failed");
        rx.changed().await.unwrap();
        assert!(!rx.borrow().is_healthy());
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(HealthState::Degraded {
            reason: "x".to_string(),
        })
        .unwrap();
        assert_eq!(json["state"], "degraded");
        assert_eq!(json["reason"], "x");
    }
}
