//! 集群信息领域模型：monitor map 解析与最小 ceph.conf

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 单个 monitor 的地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonEndpoint {
    pub name: Option<String>,
    /// msgr2 地址，如 `10.0.0.1:3300`
    pub v2: Option<String>,
    /// msgr1 地址，如 `10.0.0.1:6789`
    pub v1: Option<String>,
}

/// GET /cluster/info 中的单个集群条目
#[derive(Debug, Clone, Serialize)]
pub struct ClusterInfoItem {
    pub cluster: String,
    pub fsid: Option<String>,
    pub mons: Vec<MonEndpoint>,
    pub mon_host: String,
    pub ceph_conf_minimal: String,
    pub error: Option<String>,
}

impl ClusterInfoItem {
    pub fn new(cluster: impl Into<String>, fsid: String, mons: Vec<MonEndpoint>) -> Self {
        let mon_host = format_mon_host(&mons);
        let ceph_conf_minimal = minimal_ceph_conf(&fsid, &mon_host);
        Self {
            cluster: cluster.into(),
            fsid: Some(fsid),
            mons,
            mon_host,
            ceph_conf_minimal,
            error: None,
        }
    }

    /// 获取失败的集群仍然出现在列表中，只携带错误信息
    pub fn failed(cluster: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            fsid: None,
            mons: Vec::new(),
            mon_host: String::new(),
            ceph_conf_minimal: String::new(),
            error: Some(error.into()),
        }
    }
}

/// 定位 monmap
///
/// Dashboard `/api/monitor` 返回 `{"mon_status": {"monmap": ...}}`，
/// 也兼容直接传入 `{"monmap": ...}`
fn monmap(payload: &Value) -> Option<&Value> {
    payload
        .get("monmap")
        .or_else(|| payload.get("mon_status").and_then(|s| s.get("monmap")))
}

/// 从 monitor 载荷中读取集群 fsid
pub fn monmap_fsid(payload: &Value) -> Option<String> {
    monmap(payload)
        .and_then(|m| m.get("fsid"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 解析 monitor 列表
///
/// 优先使用 `public_addrs.addrvec`（msgr2 + msgr1），
/// 旧版本只有 `public_addr: "IP:6789/0"` 时作为 v1
pub fn parse_mon_map(payload: &Value) -> Vec<MonEndpoint> {
    let mons = match monmap(payload).and_then(|m| m.get("mons")).and_then(Value::as_array) {
        Some(mons) => mons,
        None => return Vec::new(),
    };

    mons.iter()
        .map(|m| {
            let name = match (m.get("name"), m.get("rank")) {
                (Some(Value::String(n)), _) => Some(n.clone()),
                (_, Some(rank)) if !rank.is_null() => Some(rank.to_string()),
                _ => None,
            };

            let addrvec = m
                .get("public_addrs")
                .and_then(|a| a.get("addrvec"))
                .and_then(Value::as_array)
                .filter(|v| !v.is_empty());

            let (mut v1, mut v2) = (None, None);
            match addrvec {
                Some(addrs) => {
                    for a in addrs {
                        let addr = a.get("addr").and_then(Value::as_str).map(str::to_string);
                        match a.get("type").and_then(Value::as_str) {
                            Some("v2") => v2 = addr,
                            Some("v1") => v1 = addr,
                            _ => {}
                        }
                    }
                }
                None => {
                    v1 = m
                        .get("public_addr")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
            }

            MonEndpoint { name, v2, v1 }
        })
        .collect()
}

/// 生成 `mon_host` 字符串：`[v2:A,v1:B] [v2:C]`
pub fn format_mon_host(mons: &[MonEndpoint]) -> String {
    mons.iter()
        .filter_map(|m| match (&m.v2, &m.v1) {
            (Some(v2), Some(v1)) => Some(format!("[v2:{},v1:{}]", v2, v1)),
            (Some(v2), None) => Some(format!("[v2:{}]", v2)),
            (None, Some(v1)) => Some(format!("[v1:{}]", v1)),
            (None, None) => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 客户端挂载所需的最小 ceph.conf
pub fn minimal_ceph_conf(fsid: &str, mon_host: &str) -> String {
    format!("[global]\n\tfsid = {}\n\tmon_host = {}\n", fsid, mon_host)
}
