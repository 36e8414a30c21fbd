//! Prometheus 指标
//!
//! 请求计数、请求耗时与集群错误计数，通过独立端口的 `/metrics` 暴露

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    duration: HistogramVec,
    cluster_errors: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("fabric_ceph_requests_total", "Total HTTP requests"),
            &["endpoint", "method", "status"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "fabric_ceph_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["endpoint"],
        )?;
        let cluster_errors = IntCounterVec::new(
            Opts::new(
                "fabric_ceph_cluster_errors_total",
                "Per-cluster failures of Dashboard or SSH operations",
            ),
            &["cluster", "operation"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(cluster_errors.clone()))?;

        Ok(Self {
            registry,
            requests,
            duration,
            cluster_errors,
        })
    }

    pub fn observe_request(&self, endpoint: &str, method: &str, status: u16, seconds: f64) {
        self.requests
            .with_label_values(&[endpoint, method, &status.to_string()])
            .inc();
        self.duration.with_label_values(&[endpoint]).observe(seconds);
    }

    pub fn cluster_error(&self, cluster: &str, operation: &str) {
        self.cluster_errors
            .with_label_values(&[cluster, operation])
            .inc();
    }

    /// Prometheus 文本格式
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// 请求计量中间件
///
/// endpoint 使用路由模板（如 `/cluster/user/:entity`），避免标签基数膨胀
pub async fn track(State(metrics): State<Arc<Metrics>>, req: Request<Body>, next: Next) -> Response {
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = req.method().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let elapsed = start.elapsed().as_secs_f64();
    metrics.observe_request(&endpoint, &method, status, elapsed);
    info!(
        target: "metrics",
        endpoint = %endpoint,
        method = %method,
        status = status,
        duration_ms = (elapsed * 1000.0) as u64,
        "request"
    );
    response
}

/// `/metrics` 路由（挂在独立端口上）
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(expose))
        .with_state(metrics)
}

async fn expose(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
