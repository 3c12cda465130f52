//! HTTP Server
//!
//! 请求管线按固定顺序组装：
//! 安全中间件 -> 标准中间件 -> 路由 -> 错误处理。
//! 外层到内层依次为：tracing、状态码日志、session、参数污染、安全响应头、
//! Origin 校验、CORS、session 拒绝、压缩、413 规范化、请求体限制、panic 捕获、
//! 路由与 404。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::middleware::{error_logging_middleware, panic_response, payload_limit_middleware};
use super::routes::{create_routes, not_found};
use super::security::{
    cors_layer, origin_guard, parameter_pollution_middleware, session_middleware,
    session_rejection, with_hardening_headers, AllowedOrigin,
};
use super::state::AppState;
use crate::application::{ClassifiedError, SessionKeys};

/// 安全中间件所需的配置
struct SecurityLayers {
    keys: Arc<SessionKeys>,
    origin: AllowedOrigin,
    cors: CorsLayer,
}

/// 请求管线构建器
///
/// 各阶段必须依次调用，`build()` 时缺少任一阶段都会报错
#[derive(Default)]
pub struct PipelineBuilder {
    security: Option<SecurityLayers>,
    body_limit: Option<usize>,
    routes: Option<Router<Arc<AppState>>>,
    error_handlers: bool,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session、参数污染、安全响应头、跨域策略
    pub fn security(
        mut self,
        keys: Arc<SessionKeys>,
        client_origin: &str,
    ) -> Result<Self, ClassifiedError> {
        let origin = AllowedOrigin::new(client_origin);
        let cors = cors_layer(&origin)?;
        self.security = Some(SecurityLayers { keys, origin, cors });
        Ok(self)
    }

    /// 压缩、请求体限制、请求 tracing
    pub fn middleware(mut self, body_limit_bytes: usize) -> Self {
        self.body_limit = Some(body_limit_bytes);
        self
    }

    pub fn routes(mut self) -> Self {
        self.routes = Some(create_routes());
        self
    }

    /// 404 与 panic 处理
    pub fn error_handlers(mut self) -> Self {
        self.error_handlers = true;
        self
    }

    /// 组装最终的 Router
    pub fn build(self, state: AppState) -> Result<Router, ClassifiedError> {
        let SecurityLayers { keys, origin, cors } = self
            .security
            .ok_or_else(|| ClassifiedError::validation("security layers not wired"))?;
        let body_limit = self
            .body_limit
            .ok_or_else(|| ClassifiedError::validation("standard middleware not wired"))?;
        let routes = self
            .routes
            .ok_or_else(|| ClassifiedError::validation("routes not wired"))?;
        if !self.error_handlers {
            return Err(ClassifiedError::validation("error handlers not wired"));
        }

        let router = routes
            .fallback(not_found)
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(middleware::from_fn(payload_limit_middleware))
            .layer(CompressionLayer::new())
            .layer(middleware::from_fn(session_rejection))
            .layer(cors)
            .layer(middleware::from_fn_with_state(origin, origin_guard));

        let router = with_hardening_headers(router)
            .layer(middleware::from_fn(parameter_pollution_middleware))
            .layer(middleware::from_fn_with_state(keys, session_middleware))
            .layer(middleware::from_fn(error_logging_middleware))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(state));

        Ok(router)
    }
}

/// HTTP 服务器（已绑定端口）
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
}

impl HttpServer {
    /// 绑定监听地址，端口 0 时由系统分配
    pub async fn bind(addr: &str, router: Router) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// 启动服务器
    pub async fn run(self) -> Result<(), std::io::Error> {
        info!("Serving HTTP on {:?}", self.listener.local_addr().ok());
        axum::serve(self.listener, self.router).await
    }

    /// 启动服务器（带优雅关闭）
    pub async fn run_with_shutdown<F>(self, shutdown_signal: F) -> Result<(), std::io::Error>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        info!(
            "Serving HTTP on {:?} (with graceful shutdown)",
            self.listener.local_addr().ok()
        );
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal)
            .await
    }
}
