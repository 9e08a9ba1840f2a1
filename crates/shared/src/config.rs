//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "OPEN_VE";

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 单个请求的处理超时（秒）
    pub request_timeout_secs: u64,
    /// 请求体大小上限（字节）
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

/// 认证方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    None,
    Preshared,
}

/// 认证配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// 预共享密钥，method = preshared 时必填
    pub preshared_key: Option<String>,
}

/// CORS 配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CorsConfig {
    /// 允许的来源；为空时只放行本地开发地址
    pub allowed_origins: Vec<String>,
}

/// 规则引擎配置
///
/// 这里的上限同时约束注册阶段（编译）与校验阶段（求值）。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 单个校验项的求值时间预算（毫秒）
    pub eval_timeout_ms: u64,
    /// 单个表达式求值的最大步数
    pub max_eval_steps: u64,
    /// 求值过程中产生的字符串/字节值的最大长度
    pub max_value_bytes: usize,
    pub max_expression_length: usize,
    pub max_nesting_depth: usize,
    pub max_expressions_per_validation: usize,
    pub max_validations_per_request: usize,
    /// 一次校验请求允许携带的最大条目数
    pub max_batch_size: usize,
    /// 批量校验的并发分片数，0 表示使用 CPU 核数
    pub parallelism: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            eval_timeout_ms: 100,
            max_eval_steps: 100_000,
            max_value_bytes: 1024 * 1024,
            max_expression_length: 2048,
            max_nesting_depth: 64,
            max_expressions_per_validation: 256,
            max_validations_per_request: 1024,
            max_batch_size: 1000,
            parallelism: 0,
        }
    }
}

/// 规则定义文件配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DslConfig {
    /// 启动时预加载的注册文件（JSON）
    pub preload_path: Option<String>,
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub observability: ObservabilityConfig,
    pub auth: AuthConfig,
    pub cors: CorsConfig,
    pub engine: EngineConfig,
    pub dsl: DslConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（OPEN_VE_ 前缀，`__` 分隔层级，如 OPEN_VE_ENGINE__EVAL_TIMEOUT_MS -> engine.eval_timeout_ms）
    /// 5. 服务特定端口环境变量（如 VALIDATE_SERVICE_PORT）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("OPEN_VE_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let mut config = Self::load_from(Path::new(&config_dir), &env, service_name)?;

        if let Some(port) = Self::get_service_port_from_env(service_name) {
            config.server.port = port;
        }

        Ok(config)
    }

    /// 从指定目录加载配置（不读取端口覆盖变量）
    pub fn load_from(config_dir: &Path, env: &str, service_name: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 服务端口环境变量：将 "validate-service" 转换为 "VALIDATE_SERVICE_PORT"
    fn get_service_port_from_env(service_name: &str) -> Option<u16> {
        std::env::var(Self::service_port_var(service_name))
            .ok()
            .and_then(|v| v.parse().ok())
    }

    fn service_port_var(service_name: &str) -> String {
        format!("{}_PORT", service_name.to_uppercase().replace('-', "_"))
    }

    /// 获取服务地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
