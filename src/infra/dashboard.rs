//! Ceph Dashboard REST client
//!
//! 每个 `DashClient` 对应一个集群上的一次登录会话（JWT），
//! 封装用户管理、keyring 导出、monitor map 与 CephFS 子卷查询

use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{constants, ClusterEntry};
use crate::domain::Capability;

/// Dashboard 调用错误
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("[{cluster}] {op} request failed: {source}")]
    Http {
        cluster: String,
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("[{cluster}] {op} failed: {status} {body}")]
    Status {
        cluster: String,
        op: &'static str,
        status: u16,
        body: String,
    },
    #[error("[{cluster}] {op}: not found")]
    NotFound { cluster: String, op: &'static str },
    #[error("[{cluster}] login succeeded but no token in response")]
    NoToken { cluster: String },
    #[error("[{cluster}] {op}: {message}")]
    InvalidResponse {
        cluster: String,
        op: &'static str,
        message: String,
    },
}

impl DashboardError {
    /// 出错的操作名（用于 metrics 标签）
    pub fn op(&self) -> &'static str {
        match self {
            DashboardError::Http { op, .. }
            | DashboardError::Status { op, .. }
            | DashboardError::NotFound { op, .. }
            | DashboardError::InvalidResponse { op, .. } => op,
            DashboardError::NoToken { .. } => "login",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DashboardError::NotFound { .. })
    }
}

/// 已登录的 Dashboard 客户端
#[derive(Clone)]
pub struct DashClient {
    cluster: String,
    base_api: String,
    token: String,
    http: Client,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: Option<String>,
}

impl DashClient {
    /// 登录集群 Dashboard
    ///
    /// 按配置顺序尝试每个 endpoint，第一个登录成功的被使用。
    /// TLS 校验按 endpoint 跟随协议（https 校验，http 不校验），可被 `<CLUSTER>_VERIFY_TLS` 覆盖
    pub async fn login(entry: &ClusterEntry) -> Result<Self, DashboardError> {
        let mut last_error = None;
        for endpoint in &entry.dashboard.endpoints {
            let http = Client::builder()
                .timeout(constants::DASHBOARD_TIMEOUT)
                .danger_accept_invalid_certs(!verify_tls(entry, endpoint))
                .build()
                .map_err(|source| DashboardError::Http {
                    cluster: entry.name.clone(),
                    op: "login",
                    source,
                })?;
            let base_api = format!("{}/api", endpoint);
            match Self::authenticate(&http, entry, &base_api).await {
                Ok(token) => {
                    debug!(cluster = %entry.name, endpoint = %endpoint, "Logged in to dashboard");
                    return Ok(Self {
                        cluster: entry.name.clone(),
                        base_api,
                        token,
                        http,
                    });
                }
                Err(e) => {
                    warn!(cluster = %entry.name, endpoint = %endpoint, error = %e, "Dashboard login failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DashboardError::InvalidResponse {
            cluster: entry.name.clone(),
            op: "login",
            message: "no dashboard endpoints configured".to_string(),
        }))
    }

    async fn authenticate(
        http: &Client,
        entry: &ClusterEntry,
        base_api: &str,
    ) -> Result<String, DashboardError> {
        let op = "login";
        let resp = http
            .post(format!("{}/auth", base_api))
            .header(ACCEPT, constants::DASHBOARD_ACCEPT)
            .json(&json!({
                "username": entry.dashboard.user,
                "password": entry.dashboard.password,
            }))
            .send()
            .await
            .map_err(|source| DashboardError::Http {
                cluster: entry.name.clone(),
                op,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DashboardError::Status {
                cluster: entry.name.clone(),
                op,
                status: status.as_u16(),
                body,
            });
        }

        let auth: AuthResponse = resp.json().await.map_err(|source| DashboardError::Http {
            cluster: entry.name.clone(),
            op,
            source,
        })?;

        auth.token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DashboardError::NoToken {
                cluster: entry.name.clone(),
            })
    }

    /// 集群名
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// 当前使用的 API 基地址（`<endpoint>/api`）
    pub fn base_api(&self) -> &str {
        &self.base_api
    }

    // ========== 用户管理 ==========

    /// GET /api/cluster/user
    pub async fn list_users(&self) -> Result<Vec<Value>, DashboardError> {
        let op = "list_users";
        let url = self.url(op, &["cluster", "user"])?;
        let resp = self.send(op, self.http.get(url)).await?;
        let resp = self.expect_success(op, resp).await?;
        let body: Value = self.json(op, resp).await?;

        Ok(match body {
            Value::Array(users) => users,
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(users)) => users,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        })
    }

    /// POST /api/cluster/user
    pub async fn create_user(
        &self,
        user_entity: &str,
        capabilities: &[Capability],
    ) -> Result<u16, DashboardError> {
        let op = "create_user";
        let url = self.url(op, &["cluster", "user"])?;
        let payload = json!({ "user_entity": user_entity, "capabilities": capabilities });
        let resp = self.send(op, self.http.post(url).json(&payload)).await?;
        self.expect_accepted(op, resp).await
    }

    /// PUT /api/cluster/user —— 覆盖用户的全部 caps
    pub async fn update_user_caps(
        &self,
        user_entity: &str,
        capabilities: &[Capability],
    ) -> Result<u16, DashboardError> {
        let op = "update_user_caps";
        let url = self.url(op, &["cluster", "user"])?;
        let payload = json!({ "user_entity": user_entity, "capabilities": capabilities });
        let resp = self.send(op, self.http.put(url).json(&payload)).await?;
        self.expect_accepted(op, resp).await
    }

    /// DELETE /api/cluster/user/{entity}
    pub async fn delete_user(&self, user_entity: &str) -> Result<(), DashboardError> {
        let op = "delete_user";
        let url = self.url(op, &["cluster", "user", user_entity])?;
        let resp = self.send(op, self.http.delete(url)).await?;
        self.expect_success(op, resp).await.map(|_| ())
    }

    /// POST /api/cluster/user/export —— 导出单个用户的 keyring 文本
    pub async fn export_keyring(&self, user_entity: &str) -> Result<String, DashboardError> {
        let op = "export_keyring";
        let url = self.url(op, &["cluster", "user", "export"])?;
        let payload = json!({ "entities": [user_entity] });
        let resp = self.send(op, self.http.post(url).json(&payload)).await?;
        let resp = self.expect_success(op, resp).await?;
        let text = resp.text().await.map_err(|source| self.http_error(op, source))?;

        Ok(keyring_from_body(text))
    }

    // ========== 集群信息 ==========

    /// GET /api/monitor
    pub async fn monitor_map(&self) -> Result<Value, DashboardError> {
        let op = "monitor_map";
        let url = self.url(op, &["monitor"])?;
        let resp = self.send(op, self.http.get(url)).await?;
        let resp = self.expect_success(op, resp).await?;
        self.json(op, resp).await
    }

    /// 从已获取的 monitor map 中读取集群 fsid
    pub fn cluster_fsid(&self, monitor: &Value) -> Result<String, DashboardError> {
        crate::domain::cluster::monmap_fsid(monitor)
            .ok_or_else(|| self.invalid("cluster_fsid", "fsid missing from monitor map"))
    }

    /// GET /api/cephfs/subvolume/{fs}/info
    pub async fn subvolume_info(
        &self,
        fs_name: &str,
        subvol_name: &str,
        group_name: Option<&str>,
    ) -> Result<Value, DashboardError> {
        let op = "subvolume_info";
        let mut url = self.url(op, &["cephfs", "subvolume", fs_name, "info"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("subvol_name", subvol_name);
            if let Some(group) = group_name.filter(|g| !g.is_empty()) {
                query.append_pair("group_name", group);
            }
        }
        let resp = self.send(op, self.http.get(url)).await?;
        let resp = self.expect_success(op, resp).await?;
        self.json(op, resp).await
    }

    /// 解析本集群上子卷的绝对路径
    pub async fn resolve_subvolume_path(
        &self,
        fs_name: &str,
        subvol_name: &str,
        group_name: Option<&str>,
    ) -> Result<String, DashboardError> {
        let info = self.subvolume_info(fs_name, subvol_name, group_name).await?;
        subvolume_path(&info).ok_or_else(|| DashboardError::InvalidResponse {
            cluster: self.cluster.clone(),
            op: "subvolume_info",
            message: format!(
                "could not resolve subvolume path for {}:{}:{}",
                fs_name,
                group_name.unwrap_or(""),
                subvol_name
            ),
        })
    }

    // ========== 内部工具 ==========

    fn url(&self, op: &'static str, segments: &[&str]) -> Result<Url, DashboardError> {
        let mut url = Url::parse(&self.base_api).map_err(|e| self.invalid(op, e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| self.invalid(op, "endpoint cannot be used as a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, op: &'static str, req: RequestBuilder) -> Result<Response, DashboardError> {
        req.header(ACCEPT, constants::DASHBOARD_ACCEPT)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| self.http_error(op, source))
    }

    /// 任意 2xx 视为成功；404 单独报告
    async fn expect_success(&self, op: &'static str, resp: Response) -> Result<Response, DashboardError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(DashboardError::NotFound {
                cluster: self.cluster.clone(),
                op,
            });
        }
        Err(self.status_error(op, resp).await)
    }

    /// 创建/更新接口只接受 200/201/202
    async fn expect_accepted(&self, op: &'static str, resp: Response) -> Result<u16, DashboardError> {
        let status = resp.status();
        if matches!(
            status,
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED
        ) {
            info!(cluster = %self.cluster, op = op, status = status.as_u16(), "Dashboard request accepted");
            Ok(status.as_u16())
        } else {
            Err(self.status_error(op, resp).await)
        }
    }

    async fn status_error(&self, op: &'static str, resp: Response) -> DashboardError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        DashboardError::Status {
            cluster: self.cluster.clone(),
            op,
            status,
            body,
        }
    }

    async fn json(&self, op: &'static str, resp: Response) -> Result<Value, DashboardError> {
        resp.json().await.map_err(|source| self.http_error(op, source))
    }

    fn http_error(&self, op: &'static str, source: reqwest::Error) -> DashboardError {
        DashboardError::Http {
            cluster: self.cluster.clone(),
            op,
            source,
        }
    }

    fn invalid(&self, op: &'static str, message: impl Into<String>) -> DashboardError {
        DashboardError::InvalidResponse {
            cluster: self.cluster.clone(),
            op,
            message: message.into(),
        }
    }
}

/// 解析导出接口的响应体
///
/// 常见形态：JSON 字符串、`{"keyring": "..."}`、纯文本
fn keyring_from_body(text: String) -> String {
    let extracted = match serde_json::from_str::<Value>(&text) {
        Ok(Value::String(s)) => Some(s),
        Ok(Value::Object(map)) => ["keyring", "result", "output"].iter().find_map(|k| {
            map.get(*k)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }),
        _ => None,
    };
    extracted.unwrap_or(text)
}

fn verify_tls(entry: &ClusterEntry, endpoint: &str) -> bool {
    entry
        .verify_tls
        .unwrap_or_else(|| endpoint.starts_with("https://"))
}

/// 从子卷 info 响应中挑出绝对路径
pub fn subvolume_path(info: &Value) -> Option<String> {
    let absolute = |v: &Value| v.as_str().filter(|s| s.starts_with('/')).map(str::to_string);

    ["path", "full_path", "mount_path", "mountpoint"]
        .iter()
        .find_map(|k| info.get(*k).and_then(absolute))
        .or_else(|| info.as_object()?.values().find_map(absolute))
}


#[cfg(test)]
mod tests {
    use super::fake::{self, FakeDashboard};
    use super::*;

    #[test]
    fn test_keyring_from_body() {
        let quoted = serde_json::to_string("[client.a]\n\tkey = K\n").unwrap();
        assert_eq!(keyring_from_body(quoted), "[client.a]\n\tkey = K\n");
        assert_eq!(
            keyring_from_body(r#"{"keyring": "[client.b]"}"#.to_string()),
            "[client.b]"
        );
        assert_eq!(
            keyring_from_body(r#"{"output": "[client.c]"}"#.to_string()),
            "[client.c]"
        );
        assert_eq!(keyring_from_body("[client.d]\n".to_string()), "[client.d]\n");
    }

    #[test]
    fn test_subvolume_path() {
        assert_eq!(
            subvolume_path(&json!({"path": "/volumes/g/s/uuid"})).as_deref(),
            Some("/volumes/g/s/uuid")
        );
        assert_eq!(
            subvolume_path(&json!({"path": "relative", "mountpoint": "/mnt/x"})).as_deref(),
            Some("/mnt/x")
        );
        assert_eq!(
            subvolume_path(&json!({"data_pool": "p", "other": "/abs"})).as_deref(),
            Some("/abs")
        );
        assert_eq!(subvolume_path(&json!({"path": "x"})), None);
        assert_eq!(subvolume_path(&json!("just a string")), None);
    }

    #[tokio::test]
    async fn test_login_and_user_lifecycle() {
        let dash = FakeDashboard::new("europe");
        let entry = fake::cluster(&dash).await;

        let client = DashClient::login(&entry).await.unwrap();
        assert_eq!(client.cluster(), "europe");
        assert!(client.base_api().ends_with("/api"));

        let caps = vec![Capability::new("mon", "allow r")];
        assert_eq!(client.create_user("client.demo", &caps).await.unwrap(), 201);

        let users = client.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["entity"], "client.demo");

        let new_caps = vec![Capability::new("mds", "allow rw")];
        assert_eq!(client.update_user_caps("client.demo", &new_caps).await.unwrap(), 200);
        assert_eq!(dash.caps("client.demo"), Some(new_caps));

        let keyring = client.export_keyring("client.demo").await.unwrap();
        assert!(keyring.starts_with("[client.demo]\n"));

        client.delete_user("client.demo").await.unwrap();
        let err = client.delete_user("client.demo").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.op(), "delete_user");
    }

    #[tokio::test]
    async fn test_update_missing_user_is_error() {
        let dash = FakeDashboard::new("europe");
        let entry = fake::cluster(&dash).await;
        let client = DashClient::login(&entry).await.unwrap();

        let err = client
            .update_user_caps("client.ghost", &[Capability::new("mon", "allow r")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("update_user_caps"));
    }

    #[tokio::test]
    async fn test_login_bad_password() {
        let dash = FakeDashboard::new("europe");
        let mut entry = fake::cluster(&dash).await;
        entry.dashboard.password = "wrong".to_string();

        let err = DashClient::login(&entry).await.err().unwrap();
        assert!(matches!(err, DashboardError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_login_fails_over_to_next_endpoint() {
        let dash = FakeDashboard::new("europe");
        let endpoint = fake::spawn(dash.clone()).await;
        let entry = fake::entry("europe", vec!["http://127.0.0.1:1".to_string(), endpoint.clone()]);

        let client = DashClient::login(&entry).await.unwrap();
        assert_eq!(client.base_api(), format!("{}/api", endpoint));
    }

    #[test]
    fn test_verify_tls_per_endpoint() {
        let mut entry = fake::entry(
            "europe",
            vec!["https://mgr-a:8443".to_string(), "http://mgr-b:8080".to_string()],
        );
        assert!(verify_tls(&entry, &entry.dashboard.endpoints[0]));
        assert!(!verify_tls(&entry, &entry.dashboard.endpoints[1]));

        entry.verify_tls = Some(false);
        assert!(!verify_tls(&entry, &entry.dashboard.endpoints[0]));
        entry.verify_tls = Some(true);
        assert!(verify_tls(&entry, &entry.dashboard.endpoints[1]));
    }

    #[tokio::test]
    async fn test_monitor_and_subvolume() {
        let dash = FakeDashboard::new("lab");
        let entry = fake::cluster(&dash).await;
        let client = DashClient::login(&entry).await.unwrap();

        let monitor = client.monitor_map().await.unwrap();
        assert_eq!(crate::domain::cluster::monmap_fsid(&monitor).as_deref(), Some("fsid-lab"));
        assert_eq!(client.cluster_fsid(&monitor).unwrap(), "fsid-lab");
        assert!(client.cluster_fsid(&json!({"monmap": {"mons": []}})).is_err());

        let path = client
            .resolve_subvolume_path("CEPH-FS-01", "project123", Some("fabric_staff"))
            .await
            .unwrap();
        assert_eq!(path, dash.subvol_path);
        assert!(dash
            .calls()
            .contains(&"SUBVOL CEPH-FS-01 project123 fabric_staff".to_string()));

        let err = client
            .resolve_subvolume_path("OTHER-FS", "project123", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
