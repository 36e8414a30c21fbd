//! 集群信息汇总（GET /cluster/info）

use futures::future::join_all;
use tracing::{error, info};

use crate::config::ClusterEntry;
use crate::domain::cluster::{parse_mon_map, ClusterInfoItem};
use crate::infra::{DashClient, DashboardError};
use crate::metrics::Metrics;

/// 并发获取每个集群的 fsid 与 monitor 列表
///
/// 结果顺序与 `clusters` 相同；单个集群失败只体现在对应条目的 `error` 中
pub async fn list_cluster_info(clusters: &[&ClusterEntry], metrics: &Metrics) -> Vec<ClusterInfoItem> {
    let tasks = clusters.iter().map(|entry| async move {
        match fetch_one(entry).await {
            Ok(item) => item,
            Err(e) => {
                error!(cluster = %entry.name, error = %e, "Failed to fetch cluster info");
                metrics.cluster_error(&entry.name, e.op());
                ClusterInfoItem::failed(entry.name.clone(), e.to_string())
            }
        }
    });

    let items = join_all(tasks).await;
    info!(
        clusters = items.len(),
        failed = items.iter().filter(|i| i.error.is_some()).count(),
        "Collected cluster info"
    );
    items
}

async fn fetch_one(entry: &ClusterEntry) -> Result<ClusterInfoItem, DashboardError> {
    let client = DashClient::login(entry).await?;
    let monitor = client.monitor_map().await?;
    let fsid = client.cluster_fsid(&monitor)?;
    Ok(ClusterInfoItem::new(entry.name.clone(), fsid, parse_mon_map(&monitor)))
}
