//! HTTP Error Handling
//!
//! 全局错误出口：
//! - 已分类错误原样序列化给客户端
//! - 未分类错误完整记录日志，客户端只收到通用的 500 响应

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::application::{
    BackboneError, ClassifiedError, ErrorRecord, GatewayError, SessionError,
};

/// API 错误
#[derive(Debug)]
pub enum ApiError {
    Classified(ClassifiedError),
    Unclassified(String),
}

impl ApiError {
    pub fn internal(detail: impl Into<String>) -> Self {
        ApiError::Unclassified(detail.into())
    }

    /// 客户端可见的错误记录
    pub fn record(&self) -> ErrorRecord {
        match self {
            ApiError::Classified(e) => e.serialize(),
            ApiError::Unclassified(_) => ErrorRecord::internal(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let record = self.record();
        match &self {
            ApiError::Classified(e) if e.status_code().is_server_error() => {
                tracing::error!(kind = e.kind.as_str(), error = %e.message, "Classified failure");
            }
            ApiError::Classified(e) => {
                tracing::warn!(kind = e.kind.as_str(), error = %e.message, "Classified failure");
            }
            ApiError::Unclassified(detail) => {
                tracing::error!(error = %detail, "Unclassified failure");
            }
        }

        let status = StatusCode::from_u16(record.status_code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(record)).into_response()
    }
}

impl From<ClassifiedError> for ApiError {
    fn from(e: ClassifiedError) -> Self {
        ApiError::Classified(e)
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError::Classified(e.into())
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError::Classified(e.into())
    }
}

impl From<BackboneError> for ApiError {
    fn from(e: BackboneError) -> Self {
        ApiError::Classified(e.into())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Unclassified(e.to_string())
    }
}
