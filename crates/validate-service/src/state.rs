//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use std::sync::Arc;

use validation_engine::{ExpressionAdapter, RegistrationService, RuleSetStore, ValidationService};
use ve_shared::config::AppConfig;

use crate::middleware::auth::{self, AuthConfigError, Authenticator};

/// Axum 应用共享状态
///
/// 注册服务与校验服务共享同一个规则存储
#[derive(Clone)]
pub struct AppState {
    pub registration: RegistrationService,
    pub validation: ValidationService,
    pub authenticator: Arc<dyn Authenticator>,
    pub service_name: String,
}

impl AppState {
    /// 按配置创建应用状态
    pub fn from_config(config: &AppConfig) -> Result<Self, AuthConfigError> {
        let authenticator = auth::from_config(&config.auth)?;
        Ok(Self::with_authenticator(config, authenticator))
    }

    pub fn with_authenticator(config: &AppConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        let store = RuleSetStore::new();
        let adapter = Arc::new(ExpressionAdapter::new(&config.engine));

        Self {
            registration: RegistrationService::new(store.clone(), adapter.clone(), &config.engine),
            validation: ValidationService::new(store, adapter, &config.engine),
            authenticator,
            service_name: config.service_name.clone(),
        }
    }
}
