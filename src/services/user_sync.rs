//! 模板化创建/同步 CephX 用户（POST /cluster/user）
//!
//! 同一用户在所有集群上共享同一个 secret，但 caps 中的路径按集群各自解析：
//!
//! 1. 选定来源集群（已存在该用户的集群优先），在来源上更新或创建用户
//! 2. 从来源导出 keyring
//! 3. 把 keyring 导入其它集群，再用本集群的子卷路径覆盖 caps

use tracing::{error, info, warn};

use super::ServiceError;
use crate::config::ClusterEntry;
use crate::domain::keyring::entity_from_keyring;
use crate::domain::{
    dashboard_entity, render_caps, validate_entity, ApplyUserResponse, Capability,
    CreateUserTemplatedRequest, TemplateVars,
};
use crate::infra::{DashClient, KeyringImporter};
use crate::metrics::Metrics;

struct RenderParams<'a> {
    fs_name: &'a str,
    subvol_name: &'a str,
    group_name: Option<&'a str>,
    templates: &'a [Capability],
}

pub async fn apply_user_templated(
    clusters: &[&ClusterEntry],
    importer: &dyn KeyringImporter,
    request: &CreateUserTemplatedRequest,
    metrics: &Metrics,
) -> Result<ApplyUserResponse, ServiceError> {
    let entity = request.user_entity.as_str();
    validate_entity(entity).map_err(ServiceError::BadRequest)?;
    if request.template_capabilities.is_empty() {
        return Err(ServiceError::BadRequest(
            "template_capabilities must be a non-empty list".to_string(),
        ));
    }
    let render = request
        .render
        .as_ref()
        .filter(|r| !r.fs_name.is_empty() && !r.subvol_name.is_empty())
        .ok_or_else(|| {
            ServiceError::BadRequest("render.fs_name and render.subvol_name are required".to_string())
        })?;
    let params = RenderParams {
        fs_name: &render.fs_name,
        subvol_name: &render.subvol_name,
        group_name: render.group_name.as_deref().filter(|g| !g.is_empty()),
        templates: &request.template_capabilities,
    };

    let mut resp = ApplyUserResponse {
        user_entity: entity.to_string(),
        fs_name: render.fs_name.clone(),
        subvol_name: render.subvol_name.clone(),
        group_name: render.group_name.clone(),
        ..Default::default()
    };

    // 1. 登录
    let mut clients: Vec<(&ClusterEntry, DashClient)> = Vec::with_capacity(clusters.len());
    for entry in clusters {
        match DashClient::login(entry).await {
            Ok(client) => clients.push((*entry, client)),
            Err(e) => {
                error!(cluster = %entry.name, error = %e, "Dashboard login failed");
                metrics.cluster_error(&entry.name, e.op());
                resp.errors.insert(entry.name.clone(), e.to_string());
            }
        }
    }
    if clients.is_empty() {
        let failures = resp
            .errors
            .iter()
            .map(|(c, e)| format!("{}: {}", c, e))
            .collect();
        return Err(ServiceError::all_failed("apply_user", failures));
    }

    // 2. 选择来源集群
    let source_idx = select_source(&clients, entity, request.preferred_source.as_deref()).await;
    let (source_entry, source) = &clients[source_idx];
    resp.source_cluster = Some(source_entry.name.clone());
    info!(cluster = %source_entry.name, entity = %entity, "Selected source cluster");

    // 3. 来源上更新或创建
    let source_step = async {
        let path = source
            .resolve_subvolume_path(params.fs_name, params.subvol_name, params.group_name)
            .await
            .map_err(|e| (e.op(), e.to_string()))?;
        let caps = render_for(&params, &path).map_err(|e| ("render", e.to_string()))?;

        let created = match source.update_user_caps(entity, &caps).await {
            Ok(_) => false,
            Err(update_err) => {
                info!(cluster = %source_entry.name, entity = %entity, error = %update_err, "Update failed, creating user");
                source
                    .create_user(entity, &caps)
                    .await
                    .map_err(|e| (e.op(), e.to_string()))?;
                true
            }
        };
        Ok::<_, (&'static str, String)>((path, caps, created))
    }
    .await;

    match source_step {
        Ok((path, caps, created)) => {
            resp.created_on_source = created;
            resp.updated_on_source = true;
            resp.paths.insert(source_entry.name.clone(), path);
            resp.caps_applied.insert(source_entry.name.clone(), caps);
        }
        Err((op, message)) => {
            error!(cluster = %source_entry.name, entity = %entity, error = %message, "Source update/create failed");
            metrics.cluster_error(&source_entry.name, op);
            resp.errors.insert(
                source_entry.name.clone(),
                format!("source update/create failed: {}", message),
            );
            return Ok(resp);
        }
    }

    if !request.sync_across_clusters {
        return Ok(resp);
    }

    // 4. 导出 keyring；失败时仍然更新其它集群的 caps，但不导入
    let keyring = match source.export_keyring(entity).await {
        Ok(keyring) if entity_from_keyring(&keyring).is_some_and(|e| e == entity) => Some(keyring),
        Ok(_) => {
            metrics.cluster_error(&source_entry.name, "export_keyring");
            resp.errors.insert(
                source_entry.name.clone(),
                format!("export failed: keyring does not contain [{}]", entity),
            );
            None
        }
        Err(e) => {
            warn!(cluster = %source_entry.name, entity = %entity, error = %e, "Keyring export failed");
            metrics.cluster_error(&source_entry.name, e.op());
            resp.errors
                .insert(source_entry.name.clone(), format!("export failed: {}", e));
            None
        }
    };

    // 5. 同步到其它集群
    for (idx, (entry, client)) in clients.iter().enumerate() {
        if idx == source_idx {
            continue;
        }

        if let Some(keyring) = &keyring {
            if let Err(e) = importer.import(entry, entity, keyring).await {
                error!(cluster = %entry.name, entity = %entity, error = %e, "Keyring import failed");
                metrics.cluster_error(&entry.name, "import_keyring");
                resp.errors.insert(entry.name.clone(), e.to_string());
                continue;
            }
            resp.imported_to.push(entry.name.clone());
        }

        let path = match client
            .resolve_subvolume_path(params.fs_name, params.subvol_name, params.group_name)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                metrics.cluster_error(&entry.name, e.op());
                resp.errors.insert(entry.name.clone(), e.to_string());
                continue;
            }
        };
        let caps = match render_for(&params, &path) {
            Ok(caps) => caps,
            Err(e) => {
                resp.errors.insert(entry.name.clone(), e.to_string());
                continue;
            }
        };
        resp.paths.insert(entry.name.clone(), path);
        resp.caps_applied.insert(entry.name.clone(), caps.clone());

        if let Err(e) = client.update_user_caps(entity, &caps).await {
            error!(cluster = %entry.name, entity = %entity, error = %e, "Updating caps failed");
            metrics.cluster_error(&entry.name, e.op());
            resp.errors.insert(entry.name.clone(), e.to_string());
        }
    }

    info!(
        entity = %entity,
        source = ?resp.source_cluster,
        imported_to = ?resp.imported_to,
        errors = resp.errors.len(),
        "Applied templated user"
    );
    Ok(resp)
}

/// 来源集群：已存在该用户的第一个集群 > `preferred_source` > 第一个可达集群
async fn select_source(
    clients: &[(&ClusterEntry, DashClient)],
    entity: &str,
    preferred: Option<&str>,
) -> usize {
    for (idx, (entry, client)) in clients.iter().enumerate() {
        match client.list_users().await {
            Ok(users) => {
                if users.iter().any(|u| dashboard_entity(u) == Some(entity)) {
                    return idx;
                }
            }
            Err(e) => {
                warn!(cluster = %entry.name, error = %e, "Failed to list users while selecting source");
            }
        }
    }

    preferred
        .and_then(|name| clients.iter().position(|(entry, _)| entry.name == name))
        .unwrap_or(0)
}

fn render_for(
    params: &RenderParams<'_>,
    path: &str,
) -> Result<Vec<Capability>, crate::domain::TemplateError> {
    let vars = TemplateVars {
        fs: params.fs_name,
        path,
        group: params.group_name.unwrap_or(""),
        subvol: params.subvol_name,
    };
    render_caps(params.templates, &vars)
}
