//! HTTP Routes
//!
//! API Endpoints:
//! - /api/ping     GET  存活检查
//! - /api/health   GET  依赖健康状态
//! - /ws           WS   Gateway 长连接
//!
//! 未匹配的路径返回 404 `{message: "<path> not found"}`

use axum::{
    http::{StatusCode, Uri},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use super::dto::NotFoundResponse;
use super::handlers;
use super::state::AppState;

/// 创建所有路由
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api", api_routes())
        .route("/ws", get(handlers::websocket_handler))
}

/// API 路由
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/health", get(handlers::health))
}

/// 未匹配路由
pub async fn not_found(uri: Uri) -> (StatusCode, Json<NotFoundResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(NotFoundResponse {
            message: format!("{} not found", uri.path()),
        }),
    )
}
