//! 版本信息 API

use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::domain::{Envelope, VersionInfo};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/version", get(version))
}

/// GET /version（无需认证）
async fn version(State(state): State<Arc<AppState>>) -> Json<Envelope<VersionInfo>> {
    Json(Envelope::ok(
        "version",
        vec![VersionInfo {
            version: VERSION.to_string(),
            started_at: state.started_at.to_rfc3339(),
        }],
    ))
}
