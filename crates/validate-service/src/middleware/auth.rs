//! 认证中间件
//!
//! 接受 `Authorization: Bearer <token>`；配置为预共享密钥时必须携带且匹配。

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;
use ve_shared::config::{AuthConfig, AuthMethod};

use crate::error::ApiError;
use crate::state::AppState;

/// 无需认证的路径
const PUBLIC_PATHS: [&str; 1] = ["/health"];

/// 认证器
#[cfg_attr(test, mockall::automock)]
pub trait Authenticator: Send + Sync {
    /// 是否要求请求携带凭证
    fn required(&self) -> bool;

    fn verify(&self, token: &str) -> bool;
}

/// 不做认证
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn required(&self) -> bool {
        false
    }

    fn verify(&self, _token: &str) -> bool {
        true
    }
}

/// 预共享密钥认证
pub struct PresharedKey {
    key: String,
}

impl PresharedKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Authenticator for PresharedKey {
    fn required(&self) -> bool {
        true
    }

    /// 逐字节比较完整长度，耗时与不匹配的位置无关
    fn verify(&self, token: &str) -> bool {
        let (a, b) = (self.key.as_bytes(), token.as_bytes());
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthConfigError {
    #[error("auth.method = preshared 时必须配置非空的 auth.preshared_key")]
    MissingPresharedKey,
}

/// 按配置创建认证器
pub fn from_config(config: &AuthConfig) -> Result<Arc<dyn Authenticator>, AuthConfigError> {
    match config.method {
        AuthMethod::None => Ok(Arc::new(NoAuth)),
        AuthMethod::Preshared => match config.preshared_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(Arc::new(PresharedKey::new(key))),
            _ => Err(AuthConfigError::MissingPresharedKey),
        },
    }
}

/// 认证中间件
///
/// 公开路由直接放行；其余路由按认证器要求校验 Bearer Token。
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if PUBLIC_PATHS.contains(&path) || !state.authenticator.required() {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if state.authenticator.verify(token) => next.run(request).await,
        Some(_) => {
            warn!(path = %path, "Bearer Token 校验失败");
            ApiError::Unauthorized("无效的认证 Token".to_string()).into_response()
        }
        None => ApiError::Unauthorized("缺少认证 Token".to_string()).into_response(),
    }
}
