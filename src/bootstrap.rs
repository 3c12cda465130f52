//! Bootstrap - 启动顺序
//!
//! `Init -> SecurityWired -> MiddlewareWired -> RoutesWired -> ErrorHandlersWired
//!  -> BackboneOpened -> Listening -> Running`
//!
//! 线性执行，任一阶段失败即终止（`Failed`），错误中带上已到达的阶段。
//! Gateway 在 Backbone 打开后创建并完成订阅，之后才绑定端口，
//! 因此不会有连接在订阅之前接入。

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::application::{
    BackboneError, BackbonePublisher, BackboneSubscriber, ClassifiedError, Gateway,
    GatewayOptions, HealthMonitor, SessionKeys,
};
use crate::config::AppConfig;
use crate::infrastructure::backbone::{open_redis, MemoryBus};
use crate::infrastructure::http::{AppState, HttpServer, PipelineBuilder};

/// 启动阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    SecurityWired,
    MiddlewareWired,
    RoutesWired,
    ErrorHandlersWired,
    BackboneOpened,
    Listening,
    Running,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::SecurityWired => "security_wired",
            Stage::MiddlewareWired => "middleware_wired",
            Stage::RoutesWired => "routes_wired",
            Stage::ErrorHandlersWired => "error_handlers_wired",
            Stage::BackboneOpened => "backbone_opened",
            Stage::Listening => "listening",
            Stage::Running => "running",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 启动失败原因
#[derive(Debug, Error)]
pub enum BootstrapFailure {
    #[error("pipeline: {0}")]
    Pipeline(#[from] ClassifiedError),

    #[error("backbone: {0}")]
    Backbone(#[from] BackboneError),

    #[error("listener: {0}")]
    Io(#[from] std::io::Error),
}

/// 启动错误，`stage` 为失败前最后到达的阶段
#[derive(Debug, Error)]
#[error("Bootstrap failed after stage `{stage}`: {source}")]
pub struct BootstrapError {
    pub stage: Stage,
    #[source]
    pub source: BootstrapFailure,
}

impl From<BootstrapError> for ClassifiedError {
    fn from(e: BootstrapError) -> Self {
        match e.source {
            BootstrapFailure::Pipeline(inner) => inner,
            BootstrapFailure::Backbone(inner) => inner.into(),
            BootstrapFailure::Io(inner) => ClassifiedError::service_unavailable(inner.to_string()),
        }
    }
}

/// Backbone 来源
#[derive(Clone)]
pub enum BackboneSource {
    /// 按 `config.backbone` 连接 Redis
    Redis,
    /// 进程内总线（单实例部署与测试）
    Memory(MemoryBus),
}

/// 启动器
///
/// 所有单例资源（配置、Backbone 来源、数据库健康状态）显式注入
pub struct Bootstrap {
    config: AppConfig,
    backbone: BackboneSource,
    database_health: Option<HealthMonitor>,
    stage: Stage,
}

impl Bootstrap {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            backbone: BackboneSource::Redis,
            database_health: None,
            stage: Stage::Init,
        }
    }

    pub fn with_backbone(mut self, backbone: BackboneSource) -> Self {
        self.backbone = backbone;
        self
    }

    pub fn with_database_health(mut self, health: HealthMonitor) -> Self {
        self.database_health = Some(health);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, next: Stage) {
        tracing::info!(from = %self.stage, stage = %next, "Bootstrap stage reached");
        self.stage = next;
    }

    fn fail(&mut self, source: impl Into<BootstrapFailure>) -> BootstrapError {
        let error = BootstrapError {
            stage: self.stage,
            source: source.into(),
        };
        tracing::error!(stage = %self.stage, error = %error.source, "Bootstrap failed");
        self.stage = Stage::Failed;
        error
    }

    /// 执行到 `Listening`：端口已绑定，Gateway 已订阅 Backbone
    pub async fn launch(mut self) -> Result<Launched, BootstrapError> {
        let server_config = self.config.server.clone();
        let secure = !server_config.is_development();
        let keys = Arc::new(SessionKeys::new(&self.config.session, secure));

        let pipeline = match PipelineBuilder::new().security(keys.clone(), &server_config.client_url) {
            Ok(pipeline) => pipeline,
            Err(e) => return Err(self.fail(e)),
        };
        self.advance(Stage::SecurityWired);

        let pipeline = pipeline.middleware(server_config.body_limit_bytes);
        self.advance(Stage::MiddlewareWired);

        let pipeline = pipeline.routes();
        self.advance(Stage::RoutesWired);

        let pipeline = pipeline.error_handlers();
        self.advance(Stage::ErrorHandlersWired);

        let backbone_health = HealthMonitor::new("backbone");
        let (publisher, subscriber) = match self.open_backbone(backbone_health.clone()).await {
            Ok(pair) => pair,
            Err(e) => return Err(self.fail(e)),
        };
        let gateway = Gateway::new(
            GatewayOptions {
                allowed_origin: server_config.client_url.clone(),
            },
            keys,
            publisher,
            subscriber.as_ref(),
            backbone_health.clone(),
        );
        self.advance(Stage::BackboneOpened);

        let mut state = AppState::new(gateway.clone(), backbone_health.clone());
        if let Some(health) = self.database_health.clone() {
            state = state.with_database_health(health);
        }
        let router = match pipeline.build(state) {
            Ok(router) => router,
            Err(e) => return Err(self.fail(e)),
        };

        let server = match HttpServer::bind(&server_config.addr(), router).await {
            Ok(server) => server,
            Err(e) => return Err(self.fail(e)),
        };
        let local_addr = match server.local_addr() {
            Ok(addr) => addr,
            Err(e) => return Err(self.fail(e)),
        };
        self.advance(Stage::Listening);
        tracing::info!(addr = %local_addr, "Listening");

        Ok(Launched {
            server,
            gateway,
            backbone_health,
            local_addr,
            stage: self.stage,
        })
    }

    /// 完整启动并运行直到 `shutdown` 完成
    pub async fn run<F>(self, shutdown: F) -> Result<(), BootstrapError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.launch().await?.serve(shutdown).await
    }

    async fn open_backbone(
        &self,
        health: HealthMonitor,
    ) -> Result<(Arc<dyn BackbonePublisher>, Arc<dyn BackboneSubscriber>), BackboneError> {
        match &self.backbone {
            BackboneSource::Redis => {
                let (publisher, subscriber) = open_redis(&self.config.backbone, health).await?;
                let publisher: Arc<dyn BackbonePublisher> = publisher;
                let subscriber: Arc<dyn BackboneSubscriber> = subscriber;
                Ok((publisher, subscriber))
            }
            BackboneSource::Memory(bus) => {
                let (publisher, subscriber) = self
                    .config
                    .backbone
                    .retry
                    .run("backbone.open", |_| {
                        let bus = bus.clone();
                        let health = health.clone();
                        async move { bus.open(health).await }
                    })
                    .await?;
                let publisher: Arc<dyn BackbonePublisher> = publisher;
                let subscriber: Arc<dyn BackboneSubscriber> = subscriber;
                Ok((publisher, subscriber))
            }
        }
    }
}

/// 已绑定端口、尚未开始服务的进程
pub struct Launched {
    server: HttpServer,
    gateway: Gateway,
    backbone_health: HealthMonitor,
    local_addr: SocketAddr,
    stage: Stage,
}

impl Launched {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn backbone_health(&self) -> &HealthMonitor {
        &self.backbone_health
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// 进入 `Running`，直到 `shutdown` 完成
    pub async fn serve<F>(self, shutdown: F) -> Result<(), BootstrapError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(from = %self.stage, stage = %Stage::Running, "Bootstrap stage reached");

        self.server
            .run_with_shutdown(shutdown)
            .await
            .map_err(|e| {
                tracing::error!(stage = %Stage::Running, error = %e, "Server stopped with error");
                BootstrapError {
                    stage: Stage::Running,
                    source: e.into(),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::RetryPolicy;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.session.current_key = "current-secret".to_string();
        config.session.previous_key = "previous-secret".to_string();
        config.backbone.retry = RetryPolicy::new(2, 1, 1);
        config
    }

    #[tokio::test]
    async fn test_launch_reaches_listening() {
        let launched = Bootstrap::new(test_config())
            .with_backbone(BackboneSource::Memory(MemoryBus::new()))
            .launch()
            .await
            .unwrap();

        assert_eq!(launched.stage(), Stage::Listening);
        assert_ne!(launched.local_addr().port(), 0);
        assert!(launched.backbone_health().is_healthy());
        assert_eq!(launched.gateway().connection_count(), 0);
    }

    #[tokio::test]
    async fn test_backbone_failure_is_fatal() {
        let bus = MemoryBus::new();
        bus.set_available(false);

        let error = Bootstrap::new(test_config())
            .with_backbone(BackboneSource::Memory(bus))
            .launch()
            .await
            .err()
            .unwrap();

        assert_eq!(error.stage, Stage::ErrorHandlersWired);
        assert!(matches!(error.source, BootstrapFailure::Backbone(_)));
        assert_eq!(
            ClassifiedError::from(error).kind,
            crate::application::ErrorKind::ServiceUnavailable
        );
    }

    #[tokio::test]
    async fn test_redis_unreachable_is_fatal() {
        let mut config = test_config();
        config.backbone.url = "redis://127.0.0.1:1".to_string();

        let error = Bootstrap::new(config).launch().await.err().unwrap();
        assert_eq!(error.stage, Stage::ErrorHandlersWired);
    }

    #[tokio::test]
    async fn test_invalid_client_origin_fails_before_security() {
        let mut config = test_config();
        config.server.client_url = "http://bad\norigin".to_string();

        let error = Bootstrap::new(config)
            .with_backbone(BackboneSource::Memory(MemoryBus::new()))
            .launch()
            .await
            .err()
            .unwrap();
        assert_eq!(error.stage, Stage::Init);
        assert!(matches!(error.source, BootstrapFailure::Pipeline(_)));
    }

    #[tokio::test]
    async fn test_port_in_use_fails_at_bind() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = test_config();
        config.server.port = occupied.local_addr().unwrap().port();

        let error = Bootstrap::new(config)
            .with_backbone(BackboneSource::Memory(MemoryBus::new()))
            .launch()
            .await
            .err()
            .unwrap();
        assert_eq!(error.stage, Stage::BackboneOpened);
        assert!(matches!(error.source, BootstrapFailure::Io(_)));
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let launched = Bootstrap::new(test_config())
            .with_backbone(BackboneSource::Memory(MemoryBus::new()))
            .launch()
            .await
            .unwrap();

        launched.serve(async {}).await.unwrap();
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::ErrorHandlersWired.to_string(), "error_handlers_wired");
        assert_eq!(Stage::Failed.as_str(), "failed");
    }
}
