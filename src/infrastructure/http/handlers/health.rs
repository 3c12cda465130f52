//! Health Handler
//!
//! 依赖状态：任一依赖降级时返回 503

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::infrastructure::http::dto::HealthResponse;
use crate::infrastructure::http::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let response = HealthResponse {
        backbone: state.backbone_health.current(),
        database: state.database_health.as_ref().map(|h| h.current()),
    };

    let status = if response.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
