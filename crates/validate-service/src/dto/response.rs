//! 响应 DTO 定义

use serde::Serialize;
use validation_engine::Verdict;

/// 批量校验响应
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub validations: Vec<Verdict>,
}

/// 存活探针响应
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
}
