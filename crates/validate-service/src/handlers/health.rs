//! 健康检查

use axum::{extract::State, Json};

use crate::dto::HealthResponse;
use crate::state::AppState;

/// 存活探针：服务进程正常即返回 ok
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: state.service_name.clone(),
    })
}
