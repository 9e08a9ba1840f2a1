//! 批量校验接口

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use validation_engine::CancelOnDrop;
use validator::Validate;

use crate::dto::{CheckRequest, CheckResponse};
use crate::error::Result;
use crate::state::AppState;

/// 批量校验
///
/// 单个条目的失败（未注册、类型不符、求值错误）都在 200 响应体中返回。
/// 客户端断开时处理 future 被丢弃，`CancelOnDrop` 触发取消，剩余求值尽快结束。
pub async fn check(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>> {
    let Json(req) = payload?;
    req.validate()?;

    let guard = CancelOnDrop::new();
    let validations = state
        .validation
        .validate(req.into_items(), guard.flag())
        .await?;

    Ok(Json(CheckResponse { validations }))
}
