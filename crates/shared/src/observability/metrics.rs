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

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册业务指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "mintdrop_post_outcomes_total",
        "Terminal pipeline outcomes per evaluated (post, project) pair"
    );
    metrics::describe_counter!("mintdrop_replies_total", "Reply dispatch attempts by result");
    metrics::describe_counter!("mintdrop_poll_runs_total", "Poll runs by result");
    metrics::describe_histogram!(
        "mintdrop_pipeline_duration_seconds",
        "Time spent processing one post through the pipeline"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
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
// 便捷的指标记录函数
// ============================================================================

/// 记录单个帖子在某项目下的最终结果
#[inline]
pub fn record_post_outcome(channel: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "mintdrop_post_outcomes_total",
        "channel" => channel.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "mintdrop_pipeline_duration_seconds",
        "channel" => channel.to_string()
    )
    .record(duration_secs);
}

/// 记录回复发送结果（sent / skipped / failed）
#[inline]
pub fn record_reply(template: &str, result: &str) {
    metrics::counter!(
        "mintdrop_replies_total",
        "template" => template.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// 记录轮询运行结果（ok / skipped / aborted / error）
#[inline]
pub fn record_poll_run(result: &str) {
    metrics::counter!("mintdrop_poll_runs_total", "result" => result.to_string()).increment(1);
}
