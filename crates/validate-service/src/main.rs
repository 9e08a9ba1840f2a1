//! 规则校验服务入口

use std::path::Path;

use tokio::net::TcpListener;
use tracing::{info, warn};
use validate_service::{build_router, AppState};
use ve_shared::{config::AppConfig, observability};

const SERVICE_NAME: &str = "validate-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 配置缺失或无法解析时回退到默认值，日志初始化后再告警
    let (mut config, load_error) = match AppConfig::load(SERVICE_NAME) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    if config.service_name.is_empty() {
        config.service_name = SERVICE_NAME.to_string();
    }

    let _guard = observability::init(&config.service_name, &config.observability).await?;
    if let Some(e) = load_error {
        warn!("Failed to load config, falling back to defaults: {}", e);
    }

    info!("Starting {} on {}", config.service_name, config.server_addr());

    let state = AppState::from_config(&config)?;

    // 预加载规则文件：失败则拒绝启动，避免以空规则集对外服务
    if let Some(path) = config.dsl.preload_path.as_deref() {
        let accepted = state.registration.load_file(Path::new(path))?;
        info!(
            path = %path,
            registered = accepted.registered.len(),
            "Preloaded DSL"
        );
    }

    let app = build_router(state, &config);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：收到 SIGTERM 或 Ctrl+C 时停止接收新连接并等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
