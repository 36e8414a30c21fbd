//! CephX 用户管理 API
//!
//! 除导出外的所有接口都要求 `facility-operators` 角色

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::cluster_hint;
use crate::domain::{
    ApplyUserResponse, CephUser, ClusterOutcome, CreateOrUpdateUserRequest,
    CreateUserTemplatedRequest, Envelope, ExportUsersRequest,
};
use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::not_authorized;
use crate::middleware::FabricAuth;
use crate::services::{user_ops, user_sync};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/cluster/user",
            get(list_users).post(apply_user_templated).put(update_user),
        )
        .route("/cluster/user/export", post(export_users))
        .route("/cluster/user/:entity", delete(delete_user))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

/// GET /cluster/user
async fn list_users(
    auth: FabricAuth,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Envelope<CephUser>>> {
    auth.require_operator()?;
    let clusters = state.clusters(cluster_hint(&headers));
    let (cluster, users) = user_ops::list_users_first_success(&clusters, &state.metrics).await?;
    info!(identity = %auth.token.identity(), cluster = %cluster, "Listed users");
    Ok(Json(Envelope::ok("users", users)))
}

/// POST /cluster/user —— 模板化创建并同步到所有集群
async fn apply_user_templated(
    auth: FabricAuth,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateUserTemplatedRequest>, JsonRejection>,
) -> ApiResult<Json<Envelope<ApplyUserResponse>>> {
    auth.require_operator()?;
    let request = body(payload)?;
    let clusters = state.clusters(cluster_hint(&headers));

    info!(
        identity = %auth.token.identity(),
        entity = %request.user_entity,
        sync = request.sync_across_clusters,
        "Applying templated user"
    );
    let resp = user_sync::apply_user_templated(
        &clusters,
        state.importer.as_ref(),
        &request,
        &state.metrics,
    )
    .await?;
    Ok(Json(Envelope::ok("users", vec![resp])))
}

/// PUT /cluster/user —— 覆盖所有集群上的 caps
async fn update_user(
    auth: FabricAuth,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateOrUpdateUserRequest>, JsonRejection>,
) -> ApiResult<Json<Envelope<ClusterOutcome>>> {
    auth.require_operator()?;
    let request = body(payload)?;
    let clusters = state.clusters(cluster_hint(&headers));
    let outcome = user_ops::update_user_across_clusters(
        &clusters,
        &request.user_entity,
        &request.capabilities,
        &state.metrics,
    )
    .await?;
    Ok(Json(Envelope::ok("no_content", vec![outcome])))
}

/// DELETE /cluster/user/:entity
async fn delete_user(
    auth: FabricAuth,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(entity): Path<String>,
) -> ApiResult<Json<Envelope<ClusterOutcome>>> {
    auth.require_operator()?;
    let clusters = state.clusters(cluster_hint(&headers));
    let outcome = user_ops::delete_user_across_clusters(&clusters, &entity, &state.metrics).await?;
    info!(identity = %auth.token.identity(), entity = %entity, "Deleted user");
    Ok(Json(Envelope::ok("no_content", vec![outcome])))
}

/// POST /cluster/user/export
///
/// 运维可导出任意用户；普通用户只能导出名称中包含自己 bastion 登录名的单个用户
async fn export_users(
    auth: FabricAuth,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ExportUsersRequest>, JsonRejection>,
) -> ApiResult<Json<Envelope<CephUser>>> {
    let request = body(payload)?;
    if !auth.is_operator() {
        authorize_owner(&state, &auth, &request.entities).await?;
    }

    let clusters = state.clusters(cluster_hint(&headers));
    let (cluster, users) = user_ops::export_users_first_success(
        &clusters,
        &request.entities,
        request.keyring_only,
        &state.metrics,
    )
    .await?;
    info!(identity = %auth.token.identity(), cluster = %cluster, entities = ?request.entities, "Exported users");
    Ok(Json(Envelope::ok("users", users)))
}

async fn authorize_owner(state: &AppState, auth: &FabricAuth, entities: &[String]) -> ApiResult<()> {
    let entity = match entities {
        [entity] => entity,
        _ => return Err(not_authorized(&auth.token)),
    };

    let core_api = state
        .core_api
        .as_ref()
        .ok_or_else(|| not_authorized(&auth.token))?;
    let login = match core_api.bastion_login(&auth.token.uuid).await {
        Ok(Some(login)) => login,
        Ok(None) => return Err(not_authorized(&auth.token)),
        Err(e) => {
            warn!(identity = %auth.token.identity(), error = %e, "Bastion login lookup failed");
            return Err(not_authorized(&auth.token));
        }
    };

    if owns_entity(&login, entity) {
        Ok(())
    } else {
        Err(not_authorized(&auth.token))
    }
}

fn owns_entity(bastion_login: &str, entity: &str) -> bool {
    entity
        .to_lowercase()
        .contains(&bastion_login.to_lowercase())
}
