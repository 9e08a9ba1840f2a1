//! 规则注册接口

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use tracing::info;
use validation_engine::{Accepted, RegistrationRequest, TestReport};
use validator::Validate;

use crate::dto::RegisterDslRequest;
use crate::error::{ApiError, Result};
use crate::state::AppState;

/// 注册一组校验定义
///
/// 编译在阻塞线程池上执行；提交是原子的，请求被中途放弃也不会留下部分结果。
pub async fn register(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RegisterDslRequest>, JsonRejection>,
) -> Result<Json<Accepted>> {
    let Json(req) = payload?;
    req.validate()?;

    let registration = state.registration.clone();
    let accepted = tokio::task::spawn_blocking(move || {
        registration.register(RegistrationRequest::from(req))
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    info!(
        registered = accepted.registered.len(),
        generation = accepted.generation,
        "DSL registered"
    );
    Ok(Json(accepted))
}

/// 查看已注册的校验定义
pub async fn read(State(state): State<AppState>) -> Json<RegistrationRequest> {
    Json(state.registration.read())
}

/// 试运行测试用例，不提交
pub async fn run_tests(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RegisterDslRequest>, JsonRejection>,
) -> Result<Json<TestReport>> {
    let Json(req) = payload?;
    req.validate()?;

    let registration = state.registration.clone();
    let report = tokio::task::spawn_blocking(move || {
        registration.test(RegistrationRequest::from(req))
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(report))
}
