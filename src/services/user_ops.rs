//! 跨集群的 CephX 用户操作：列出、导出、更新、删除

use tracing::{error, info, warn};

use super::ServiceError;
use crate::config::ClusterEntry;
use crate::domain::keyring::keyring_minimal;
use crate::domain::{validate_entity, Capability, CephUser, ClusterOutcome};
use crate::infra::{DashClient, DashboardError};
use crate::metrics::Metrics;

/// 返回第一个成功列出用户的集群及其用户列表
pub async fn list_users_first_success(
    clusters: &[&ClusterEntry],
    metrics: &Metrics,
) -> Result<(String, Vec<CephUser>), ServiceError> {
    let mut failures = Vec::new();

    for entry in clusters {
        let result = async {
            let client = DashClient::login(entry).await?;
            client.list_users().await
        }
        .await;

        match result {
            Ok(raw) => {
                let users: Vec<CephUser> = raw
                    .iter()
                    .filter_map(|u| CephUser::from_dashboard(u, &entry.name))
                    .collect();
                info!(cluster = %entry.name, users = users.len(), "Listed CephX users");
                return Ok((entry.name.clone(), users));
            }
            Err(e) => {
                warn!(cluster = %entry.name, error = %e, "Listing users failed, trying next cluster");
                metrics.cluster_error(&entry.name, e.op());
                failures.push(format!("{}: {}", entry.name, e));
            }
        }
    }

    Err(ServiceError::all_failed("list_users", failures))
}

/// 从第一个能导出全部 entity 的集群导出 keyring
///
/// 每个 entity 对应一个 `CephUser`，`keys` 中是 keyring 文本
pub async fn export_users_first_success(
    clusters: &[&ClusterEntry],
    entities: &[String],
    keyring_only: bool,
    metrics: &Metrics,
) -> Result<(String, Vec<CephUser>), ServiceError> {
    if entities.is_empty() {
        return Err(ServiceError::BadRequest(
            "entities must be a non-empty list".to_string(),
        ));
    }
    for entity in entities {
        validate_entity(entity).map_err(ServiceError::BadRequest)?;
    }

    let mut failures = Vec::new();

    'clusters: for entry in clusters {
        let client = match DashClient::login(entry).await {
            Ok(client) => client,
            Err(e) => {
                metrics.cluster_error(&entry.name, e.op());
                failures.push(format!("{}: {}", entry.name, e));
                continue;
            }
        };

        let mut users = Vec::with_capacity(entities.len());
        for entity in entities {
            match client.export_keyring(entity).await {
                Ok(keyring) => {
                    let keyring = if keyring_only {
                        keyring_minimal(&keyring)
                    } else {
                        keyring
                    };
                    users.push(CephUser {
                        user_entity: entity.clone(),
                        capabilities: Vec::new(),
                        keys: vec![keyring],
                        cluster: Some(entry.name.clone()),
                    });
                }
                Err(e) => {
                    warn!(cluster = %entry.name, entity = %entity, error = %e, "Keyring export failed");
                    metrics.cluster_error(&entry.name, e.op());
                    failures.push(format!("{}: {}", entry.name, e));
                    continue 'clusters;
                }
            }
        }

        info!(cluster = %entry.name, entities = ?entities, "Exported keyrings");
        return Ok((entry.name.clone(), users));
    }

    Err(ServiceError::all_failed("export_users", failures))
}

/// 在每个集群上覆盖用户 caps
pub async fn update_user_across_clusters(
    clusters: &[&ClusterEntry],
    user_entity: &str,
    capabilities: &[Capability],
    metrics: &Metrics,
) -> Result<ClusterOutcome, ServiceError> {
    validate_entity(user_entity).map_err(ServiceError::BadRequest)?;
    if capabilities.is_empty() {
        return Err(ServiceError::BadRequest(
            "capabilities must be a non-empty list".to_string(),
        ));
    }

    let mut outcome = ClusterOutcome {
        user_entity: user_entity.to_string(),
        ..Default::default()
    };
    let mut any_ok = false;

    for entry in clusters {
        let result = async {
            let client = DashClient::login(entry).await?;
            client.update_user_caps(user_entity, capabilities).await
        }
        .await;

        let status = match result {
            Ok(_) => {
                any_ok = true;
                "updated".to_string()
            }
            Err(e) => record_failure(metrics, &entry.name, user_entity, &e),
        };
        outcome.clusters.insert(entry.name.clone(), status);
    }

    if any_ok {
        Ok(outcome)
    } else {
        Err(ServiceError::all_failed("update_user", describe(&outcome)))
    }
}

/// 在每个集群上删除用户；不存在视为已删除
pub async fn delete_user_across_clusters(
    clusters: &[&ClusterEntry],
    user_entity: &str,
    metrics: &Metrics,
) -> Result<ClusterOutcome, ServiceError> {
    validate_entity(user_entity).map_err(ServiceError::BadRequest)?;

    let mut outcome = ClusterOutcome {
        user_entity: user_entity.to_string(),
        ..Default::default()
    };
    let mut any_ok = false;

    for entry in clusters {
        let result = async {
            let client = DashClient::login(entry).await?;
            client.delete_user(user_entity).await
        }
        .await;

        let status = match result {
            Ok(()) => {
                any_ok = true;
                info!(cluster = %entry.name, entity = %user_entity, "Deleted CephX user");
                "deleted".to_string()
            }
            Err(e) if e.is_not_found() => {
                any_ok = true;
                "not found".to_string()
            }
            Err(e) => record_failure(metrics, &entry.name, user_entity, &e),
        };
        outcome.clusters.insert(entry.name.clone(), status);
    }

    if any_ok {
        Ok(outcome)
    } else {
        Err(ServiceError::all_failed("delete_user", describe(&outcome)))
    }
}

fn record_failure(metrics: &Metrics, cluster: &str, entity: &str, e: &DashboardError) -> String {
    error!(cluster = %cluster, entity = %entity, error = %e, "Cluster operation failed");
    metrics.cluster_error(cluster, e.op());
    e.to_string()
}

fn describe(outcome: &ClusterOutcome) -> Vec<String> {
    outcome
        .clusters
        .iter()
        .map(|(cluster, status)| format!("{}: {}", cluster, status))
        .collect()
}
