//! Session Cookie 中间件
//!
//! - 没有 Cookie：匿名请求，继续处理
//! - 签名无效或过期：401，并清除客户端的 Session Cookie
//! - 校验通过：`Session` 放入请求扩展
//!
//! 校验在最外层完成；失败时只在请求上做标记，由内层的 `session_rejection`
//! 生成 401，这样拒绝响应同样带有 CORS 和安全响应头。
//!
//! Handler 可以在响应扩展中放入 `SessionUpdate` 来签发或清除 Cookie；
//! 由旧密钥签名的 Cookie 会自动用当前密钥重新签发。

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::Cookie;
use http::header::SET_COOKIE;
use http::HeaderValue;
use std::sync::Arc;

use crate::application::{SessionData, SessionError, SessionKeys};
use crate::infrastructure::http::error::ApiError;

/// 当前请求的 Session（匿名时为 None）
#[derive(Debug, Clone)]
pub struct Session(pub Option<SessionData>);

/// Handler 对 Session 的修改
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    Set(SessionData),
    Clear,
}

/// Session 校验失败，请求和 401 响应上都带这个标记
#[derive(Debug, Clone)]
struct SessionRejected(SessionError);

pub async fn session_middleware(
    State(keys): State<Arc<SessionKeys>>,
    mut request: Request,
    next: Next,
) -> Response {
    let verified = match keys.from_headers(request.headers()) {
        Ok(verified) => verified,
        Err(e) => {
            tracing::warn!(uri = %request.uri(), error = %e, "Rejected session cookie");
            request.extensions_mut().insert(SessionRejected(e.clone()));
            let mut response = next.run(request).await;

            // 内层没有生成拒绝响应时，成功响应一律不放行
            let rejected = response.extensions().get::<SessionRejected>().is_some();
            let status = response.status();
            if !rejected && !(status.is_client_error() || status.is_server_error()) {
                tracing::error!("Session rejection layer missing, refusing response");
                response = rejection_response(e);
            }
            append_cookies(&mut response, keys.clear());
            return response;
        }
    };

    request
        .extensions_mut()
        .insert(Session(verified.as_ref().map(|v| v.data.clone())));

    let mut response = next.run(request).await;

    let cookies = match response.extensions_mut().remove::<SessionUpdate>() {
        Some(SessionUpdate::Set(data)) => Some(keys.issue(&data)),
        Some(SessionUpdate::Clear) => Some(Ok(keys.clear())),
        None => verified
            .filter(|v| v.needs_rotation())
            .map(|v| keys.issue(&v.data)),
    };

    match cookies {
        Some(Ok(cookies)) => append_cookies(&mut response, cookies),
        Some(Err(e)) => tracing::error!(error = %e, "Failed to sign session cookie"),
        None => {}
    }

    response
}

/// 外层已判定 Session 无效时直接返回 401
///
/// 放在 CORS 和安全响应头之内，路由之外
pub async fn session_rejection(request: Request, next: Next) -> Response {
    match request.extensions().get::<SessionRejected>() {
        Some(SessionRejected(e)) => rejection_response(e.clone()),
        None => next.run(request).await,
    }
}

fn rejection_response(e: SessionError) -> Response {
    let mut response = ApiError::from(e.clone()).into_response();
    response.extensions_mut().insert(SessionRejected(e));
    response
}

fn append_cookies(response: &mut Response, cookies: [Cookie<'static>; 2]) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode session cookie"),
        }
    }
}
