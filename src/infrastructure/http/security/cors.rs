//! 跨域策略
//!
//! 只允许配置的客户端 Origin；携带其他 Origin 的请求在到达路由前被拒绝。

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::header::ORIGIN;
use http::{HeaderValue, Method};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::application::ClassifiedError;
use crate::infrastructure::http::error::ApiError;

/// 允许的客户端 Origin
#[derive(Debug, Clone)]
pub struct AllowedOrigin(Arc<str>);

impl AllowedOrigin {
    pub fn new(origin: impl Into<String>) -> Self {
        Self(Arc::from(origin.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, origin: &HeaderValue) -> bool {
        origin.to_str().map(|o| o == self.as_str()).unwrap_or(false)
    }
}

/// CORS 响应头
///
/// Origin 精确匹配并允许携带凭证，预检请求中声明的请求头原样允许
pub fn cors_layer(origin: &AllowedOrigin) -> Result<CorsLayer, ClassifiedError> {
    let origin = HeaderValue::from_str(origin.as_str())
        .map_err(|e| ClassifiedError::validation(format!("Invalid client origin: {}", e)))?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        // 客户端请求什么头就允许什么头
        .allow_headers(AllowHeaders::mirror_request())
        .max_age(Duration::from_secs(3600)))
}

/// 拒绝非白名单 Origin，没有 Origin 的请求（同源或非浏览器）放行
pub async fn origin_guard(
    State(allowed): State<AllowedOrigin>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(origin) = request.headers().get(ORIGIN) {
        if !allowed.matches(origin) {
            tracing::warn!(origin = ?origin, uri = %request.uri(), "Origin not allowed");
            return ApiError::from(ClassifiedError::not_authorized(
                "Origin not allowed by CORS policy",
            ))
            .into_response();
        }
    }

    next.run(request).await
}
