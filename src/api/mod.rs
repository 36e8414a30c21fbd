//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod cluster_info;
pub mod cluster_user;
pub mod version;

use axum::{http::HeaderMap, middleware, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::metrics;
use crate::state::AppState;

/// 集群顺序提示 header，如 `X-Cluster: lab,europe`
pub const CLUSTER_HEADER: &str = "x-cluster";

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Version
        .merge(version::router())
        // Cluster info
        .merge(cluster_info::router())
        // CephX users
        .merge(cluster_user::router())
        // Middleware
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics::track,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub(crate) fn cluster_hint(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CLUSTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
