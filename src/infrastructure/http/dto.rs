//! Data Transfer Objects
//!
//! WebSocket 帧格式：`{"event": "...", "data": {...}}`

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::{Delivery, ErrorRecord, HealthState};

// ============================================================================
// WebSocket 帧
// ============================================================================

/// 客户端发送的帧
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        topic: String,
    },
    Leave {
        topic: String,
    },
    Publish {
        topic: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// 服务端发送的帧
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected { connection_id: Uuid },
    Joined { topic: String },
    Left { topic: String },
    Message(Delivery),
    Error(ErrorRecord),
}

impl ServerFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// HTTP 响应
// ============================================================================

/// `GET /api/health` 响应
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub backbone: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<HealthState>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.backbone.is_healthy()
            && self.database.as_ref().map(HealthState::is_healthy).unwrap_or(true)
    }
}

/// 未匹配路由的响应体
#[derive(Debug, Serialize)]
pub struct NotFoundResponse {
    pub message: String,
}
