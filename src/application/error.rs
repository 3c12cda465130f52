//! 错误分类体系
//!
//! 封闭的错误类型集合，每种类型对应固定的 HTTP 状态码。
//! 所有层（HTTP、Gateway、Backbone）都通过它向客户端报告错误。

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 所有已分类错误共用的机器可读状态
pub const ERROR_STATUS: &str = "error";

/// 未分类错误返回给客户端的通用消息
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong";

/// 错误类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    BadRequest,
    NotFound,
    NotAuthorized,
    PayloadTooLarge,
    ServiceUnavailable,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Validation,
        ErrorKind::BadRequest,
        ErrorKind::NotFound,
        ErrorKind::NotAuthorized,
        ErrorKind::PayloadTooLarge,
        ErrorKind::ServiceUnavailable,
    ];

    /// 固定的状态码映射
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::NotAuthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::BadRequest => "BadRequestError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::NotAuthorized => "NotAuthorizedError",
            ErrorKind::PayloadTooLarge => "PayloadTooLargeError",
            ErrorKind::ServiceUnavailable => "ServiceUnavailableError",
        }
    }
}

/// 错误记录（客户端可见的序列化形式）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub status: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

impl ErrorRecord {
    /// 未分类错误的通用记录，不包含任何内部信息
    pub fn internal() -> Self {
        Self {
            message: GENERIC_ERROR_MESSAGE.to_string(),
            status: ERROR_STATUS.to_string(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

/// 已分类错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message}", kind.as_str())]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAuthorized, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PayloadTooLarge, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }

    pub fn status(&self) -> &'static str {
        ERROR_STATUS
    }

    /// 序列化为错误记录，纯函数，不会失败
    pub fn serialize(&self) -> ErrorRecord {
        ErrorRecord {
            message: self.message.clone(),
            status: self.status().to_string(),
            status_code: self.status_code().as_u16(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_table() {
        let expected = [
            (ErrorKind::Validation, 400),
            (ErrorKind::BadRequest, 400),
            (ErrorKind::NotFound, 404),
            (ErrorKind::NotAuthorized, 401),
            (ErrorKind::PayloadTooLarge, 413),
            (ErrorKind::ServiceUnavailable, 503),
        ];

        for (kind, code) in expected {
            let record = ClassifiedError::new(kind, "boom").serialize();
            assert_eq!(record.status_code, code, "{}", kind.as_str());
            assert_eq!(record.status, "error");
            assert_eq!(record.message, "boom");
        }
    }

    #[test]
    fn test_every_kind_is_covered() {
        for kind in ErrorKind::ALL {
            let record = ClassifiedError::new(kind, "").serialize();
            assert!(record.status_code >= 400 && record.status_code < 600);
        }
    }

    #[test]
    fn test_empty_message_serializes() {
        let record = ClassifiedError::not_found("").serialize();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["message"], "");
        assert_eq!(json["status"], "error");
        assert_eq!(json["statusCode"], 404);
    }

    #[test]
    fn test_internal_record_is_generic() {
        let record = ErrorRecord::internal();
        assert_eq!(record.status_code, 500);
        assert_eq!(record.message, GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn test_display_includes_kind() {
        let err = ClassifiedError::bad_request("missing field");
        assert_eq!(err.to_string(), "BadRequestError: missing field");
    }
}
