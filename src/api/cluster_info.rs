//! 集群信息 API

use axum::{extract::State, http::HeaderMap, routing::get, Json, Router};
use std::sync::Arc;

use super::cluster_hint;
use crate::domain::{ClusterInfoItem, Envelope};
use crate::services::cluster_info::list_cluster_info;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/cluster/info", get(cluster_info))
}

/// GET /cluster/info（无需认证）
///
/// 单个集群失败不影响整体响应，失败信息在条目的 `error` 字段中
async fn cluster_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<Envelope<ClusterInfoItem>> {
    let clusters = state.clusters(cluster_hint(&headers));
    let items = list_cluster_info(&clusters, &state.metrics).await;
    Json(Envelope::ok("clusters", items))
}
