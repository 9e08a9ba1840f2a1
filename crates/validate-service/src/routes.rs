//! 路由配置模块
//!
//! 生产入口与集成测试共用 [`build_router`]，保证中间件栈一致。

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, StatusCode},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};
use ve_shared::config::AppConfig;
use ve_shared::observability::middleware as obs_middleware;

use crate::{handlers, middleware::auth_middleware, state::AppState};

/// 本地开发默认放行的来源
const DEV_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:5173"];

/// 构建 API 路由
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/dsl",
            get(handlers::dsl::read).post(handlers::dsl::register),
        )
        .route("/v1/dsl/test", post(handlers::dsl::run_tests))
        .route("/v1/check", post(handlers::check::check))
}

/// 构建完整的应用路由（含中间件栈）
///
/// 中间件自下而上生效：request_id → http_tracing → CORS → 超时 → 认证 → 请求体大小限制
pub fn build_router(state: AppState, config: &AppConfig) -> Router {
    Router::new()
        .merge(api_routes())
        .route("/health", get(handlers::health::health_check))
        .layer(DefaultBodyLimit::max(config.server.max_body_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.server.request_timeout_secs),
        ))
        .layer(build_cors_layer(config))
        // 可观测性中间件：请求追踪和指标收集
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

/// 按配置构建 CORS
///
/// `*` 放行全部来源；未配置时只放行本地开发地址；无法解析的来源被忽略。
pub fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let allowed = &config.cors.allowed_origins;

    if allowed.iter().any(|o| o == "*") {
        if config.is_production() {
            warn!("cors.allowed_origins 包含 \"*\"，生产环境中不安全，请设置为具体域名");
        }
        info!("CORS allowed_origins: * (all origins)");
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = if allowed.is_empty() {
        DEV_ORIGINS.iter().map(|&o| HeaderValue::from_static(o)).collect()
    } else {
        allowed
            .iter()
            .filter_map(|o| match o.trim().parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("忽略无效的 CORS 来源: {}", o);
                    None
                }
            })
            .collect()
    };
    info!("CORS allowed_origins: {:?}", origins);

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
