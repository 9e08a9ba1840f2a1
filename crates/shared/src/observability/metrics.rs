//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "rule_registrations_total",
        "Total number of rule set registrations by result"
    );
    metrics::describe_gauge!("rule_store_validations", "Number of registered validations");

    metrics::describe_counter!(
        "validation_items_total",
        "Total number of validated items by result"
    );
    metrics::describe_counter!(
        "expression_evaluations_total",
        "Total number of expression evaluations by outcome"
    );
    metrics::describe_histogram!(
        "validation_batch_duration_seconds",
        "Validation batch duration in seconds"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次注册请求，result 为 accepted 或拒绝原因编码
#[inline]
pub fn record_registration(result: &str, validations: usize) {
    metrics::counter!("rule_registrations_total", "result" => result.to_string()).increment(1);
    if result == "accepted" {
        metrics::counter!("rule_registered_validations_total").increment(validations as u64);
    }
}

/// 更新存储中的校验条目数
#[inline]
pub fn set_store_size(size: usize) {
    metrics::gauge!("rule_store_validations").set(size as f64);
}

/// 记录单个校验条目的结果（passed / failed / not_found）
#[inline]
pub fn record_validation_item(result: &str) {
    metrics::counter!("validation_items_total", "result" => result.to_string()).increment(1);
}

/// 记录单个表达式的求值结果（pass / fail / 错误类别）
#[inline]
pub fn record_expression_evaluation(outcome: &str) {
    metrics::counter!("expression_evaluations_total", "outcome" => outcome.to_string())
        .increment(1);
}

/// 记录一批校验的耗时
#[inline]
pub fn record_validation_batch(items: usize, duration_secs: f64) {
    metrics::histogram!("validation_batch_duration_seconds").record(duration_secs);
    metrics::histogram!("validation_batch_size").record(items as f64);
}
