//! YAML 配置文件加载
//!
//! 配置文件结构：
//!
//! ```yaml
//! cluster:
//!   europe:
//!     ceph_cli: ceph
//!     default_fs: CEPH-FS-01
//!     dashboard:
//!       endpoints: ["https://10.145.126.2:8443"]
//!       user: admin
//!       password: secret
//! runtime:
//!   port: 11000
//! logging:
//!   log-directory: /var/log/ceph-mgr
//! oauth:
//!   jwks-url: https://cm.fabric-testbed.net/credmgr/certs
//!   key-refresh: "00:10:00"
//! core_api:
//!   enable: false
//! ```

use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::env::{constants, env_prefix, parse_bool, process_env, EnvLookup};

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// 完整配置
#[derive(Debug, Clone)]
pub struct Config {
    /// 集群列表，保持配置文件中的顺序
    pub clusters: Vec<ClusterEntry>,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
    pub oauth: OAuthConfig,
    pub core_api: CoreApiConfig,
}

/// 单个集群
#[derive(Debug, Clone)]
pub struct ClusterEntry {
    pub name: String,
    /// 远端执行的 ceph 命令（默认 `ceph`）
    pub ceph_cli: String,
    pub default_fs: String,
    pub dashboard: DashboardConfig,
    pub ssh: SshSettings,
    /// `<CLUSTER>_VERIFY_TLS` 覆盖；None 表示按协议决定
    pub verify_tls: Option<bool>,
}

/// Ceph Dashboard 连接配置
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// 非空，已去除首尾空白和末尾 `/`
    pub endpoints: Vec<String>,
    pub user: String,
    pub password: String,
}

impl DashboardConfig {
    pub fn primary_endpoint(&self) -> &str {
        &self.endpoints[0]
    }
}

/// 集群管理主机的 SSH 配置（均可选，可被环境变量覆盖）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SshSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub service_project: Option<String>,
    pub port: u16,
    pub metrics_port: u16,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_directory: PathBuf,
    pub log_file: String,
    pub metrics_log_file: String,
    pub log_level: String,
    /// 保留的滚动日志文件数
    pub log_retain: usize,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub jwks_url: String,
    pub key_refresh: Duration,
    pub verify_exp: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CoreApiConfig {
    pub enable: bool,
    pub host: Option<String>,
    pub token: Option<String>,
}

impl CoreApiConfig {
    pub fn is_enabled(&self) -> bool {
        self.enable && self.host.is_some() && self.token.is_some()
    }
}

impl Config {
    /// 从文件加载配置，并应用进程环境变量覆盖
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_yaml_with_env(&text, &process_env)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_with_env(text, &process_env)
    }

    /// 解析 YAML，环境变量通过 `lookup` 读取
    pub fn from_yaml_with_env(text: &str, lookup: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;

        let clusters_raw = raw.cluster.unwrap_or_default();
        if clusters_raw.is_empty() {
            return Err(ConfigError::invalid(
                "'cluster' section is required and cannot be empty",
            ));
        }

        let mut clusters = Vec::with_capacity(clusters_raw.len());
        for (key, value) in clusters_raw {
            let name = match key {
                serde_yaml::Value::String(s) => s,
                other => {
                    return Err(ConfigError::invalid(format!(
                        "cluster name must be a string, got {:?}",
                        other
                    )))
                }
            };
            if !value.is_mapping() {
                return Err(ConfigError::invalid(format!("cluster.{} must be a mapping", name)));
            }
            let raw_cluster: RawCluster = serde_yaml::from_value(value)?;
            clusters.push(raw_cluster.into_entry(name, lookup)?);
        }

        let runtime_raw = raw.runtime.unwrap_or_default();
        let runtime = RuntimeConfig {
            service_project: runtime_raw.service_project,
            port: runtime_raw.port.unwrap_or(constants::DEFAULT_PORT),
            metrics_port: runtime_raw
                .metrics_port
                .unwrap_or(constants::DEFAULT_METRICS_PORT),
        };

        let log_raw = raw.logging.unwrap_or_default();
        let logging = LoggingConfig {
            log_directory: log_raw
                .log_directory
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/var/log/actor")),
            log_file: non_empty(log_raw.log_file).unwrap_or_else(|| "actor.log".to_string()),
            metrics_log_file: non_empty(log_raw.metrics_log_file)
                .unwrap_or_else(|| "metrics.log".to_string()),
            log_level: non_empty(log_raw.log_level).unwrap_or_else(|| "INFO".to_string()),
            log_retain: log_raw.log_retain.filter(|n| *n > 0).unwrap_or(5),
        };

        let oauth_raw = raw.oauth.unwrap_or_default();
        let jwks_url = non_empty(oauth_raw.jwks_url)
            .ok_or_else(|| ConfigError::invalid("oauth.jwks-url is required"))?;
        let key_refresh = parse_hms(oauth_raw.key_refresh.as_deref().unwrap_or("00:10:00"))?;
        let oauth = OAuthConfig {
            jwks_url,
            key_refresh,
            verify_exp: oauth_raw.verify_exp.map_or(true, |b| b.value()),
        };

        let core_raw = raw.core_api.unwrap_or_default();
        let core_api = CoreApiConfig {
            enable: core_raw.enable.map_or(false, |b| b.value()),
            host: non_empty(core_raw.host).map(|h| h.trim_end_matches('/').to_string()),
            token: lookup("CORE_API_TOKEN").or_else(|| non_empty(core_raw.token)),
        };

        Ok(Self {
            clusters,
            runtime,
            logging,
            oauth,
            core_api,
        })
    }

    /// 按名称查找集群
    pub fn cluster(&self, name: &str) -> Option<&ClusterEntry> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn cluster_names(&self) -> Vec<&str> {
        self.clusters.iter().map(|c| c.name.as_str()).collect()
    }

    /// 根据 `X-Cluster` 提示确定集群尝试顺序
    ///
    /// `hint` 形如 `a,b,c`；未知的名称被忽略。
    /// 没有提示或没有任何已知名称时返回全部集群（配置顺序）
    pub fn ordered_clusters(&self, hint: Option<&str>) -> Vec<&ClusterEntry> {
        let mut ordered: Vec<&ClusterEntry> = Vec::new();
        for name in hint.unwrap_or("").split(',').map(str::trim) {
            if name.is_empty() {
                continue;
            }
            if let Some(entry) = self.cluster(name) {
                if !ordered.iter().any(|c| c.name == entry.name) {
                    ordered.push(entry);
                }
            }
        }
        if ordered.is_empty() {
            self.clusters.iter().collect()
        } else {
            ordered
        }
    }
}

/// 解析 `HH:MM:SS` 时长
pub fn parse_hms(value: &str) -> Result<Duration, ConfigError> {
    let re = Regex::new(r"^\s*(\d{1,2}):([0-5]\d):([0-5]\d)\s*$")
        .map_err(|e| ConfigError::invalid(e.to_string()))?;
    let caps = re
        .captures(value)
        .ok_or_else(|| ConfigError::invalid(format!("invalid HH:MM:SS duration: {:?}", value)))?;

    let field = |i: usize| -> u64 { caps[i].parse().unwrap_or(0) };
    Ok(Duration::from_secs(field(1) * 3600 + field(2) * 60 + field(3)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ========== 原始 YAML 结构 ==========

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    cluster: Option<serde_yaml::Mapping>,
    runtime: Option<RawRuntime>,
    logging: Option<RawLogging>,
    oauth: Option<RawOAuth>,
    core_api: Option<RawCoreApi>,
}

#[derive(Debug, Deserialize)]
struct RawCluster {
    ceph_cli: Option<String>,
    default_fs: Option<String>,
    #[serde(default)]
    dashboard: RawDashboard,
    #[serde(default)]
    ssh: SshSettings,
}

#[derive(Debug, Default, Deserialize)]
struct RawDashboard {
    #[serde(default)]
    endpoints: Vec<String>,
    user: Option<String>,
    password: Option<String>,
    /// 旧版配置把 SSH 参数写在 dashboard 下，作为 `ssh` 段的后备
    ssh_user: Option<String>,
    ssh_key: Option<String>,
    ssh_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRuntime {
    service_project: Option<String>,
    port: Option<u16>,
    #[serde(rename = "metrics-port", alias = "metrics_port")]
    metrics_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLogging {
    #[serde(rename = "log-directory")]
    log_directory: Option<String>,
    #[serde(rename = "log-file")]
    log_file: Option<String>,
    #[serde(rename = "metrics-log-file")]
    metrics_log_file: Option<String>,
    #[serde(rename = "log-level")]
    log_level: Option<String>,
    #[serde(rename = "log-retain")]
    log_retain: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RawOAuth {
    #[serde(rename = "jwks-url")]
    jwks_url: Option<String>,
    #[serde(rename = "key-refresh")]
    key_refresh: Option<String>,
    #[serde(rename = "verify-exp")]
    verify_exp: Option<BoolLike>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCoreApi {
    enable: Option<BoolLike>,
    host: Option<String>,
    token: Option<String>,
}

/// YAML 中的布尔值可能写成 `true`、`"yes"` 或 `1`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BoolLike {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl BoolLike {
    fn value(&self) -> bool {
        match self {
            BoolLike::Bool(b) => *b,
            BoolLike::Int(n) => *n != 0,
            BoolLike::Str(s) => parse_bool(s),
        }
    }
}

impl RawCluster {
    fn into_entry(self, name: String, lookup: EnvLookup<'_>) -> Result<ClusterEntry, ConfigError> {
        let prefix = env_prefix(&name);

        let endpoints: Vec<String> = self
            .dashboard
            .endpoints
            .iter()
            .map(|e| e.trim().trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(ConfigError::invalid(format!(
                "cluster.{}.dashboard.endpoints must be a non-empty list",
                name
            )));
        }

        let user = non_empty(self.dashboard.user).ok_or_else(|| {
            ConfigError::invalid(format!("cluster.{}.dashboard.user is required", name))
        })?;
        let password = lookup(&format!("{}_DASHBOARD_PASSWORD", prefix))
            .or(self.dashboard.password)
            .unwrap_or_default();

        let default_fs = non_empty(self.default_fs).ok_or_else(|| {
            ConfigError::invalid(format!("cluster.{}.default_fs is required", name))
        })?;

        let verify_tls = lookup(&format!("{}_VERIFY_TLS", prefix)).map(|v| parse_bool(&v));

        let ssh = SshSettings {
            host: non_empty(self.ssh.host),
            port: self.ssh.port.or(self.dashboard.ssh_port),
            user: non_empty(self.ssh.user).or_else(|| non_empty(self.dashboard.ssh_user)),
            key: non_empty(self.ssh.key).or_else(|| non_empty(self.dashboard.ssh_key)),
        };

        Ok(ClusterEntry {
            ceph_cli: non_empty(self.ceph_cli).unwrap_or_else(|| "ceph".to_string()),
            default_fs,
            dashboard: DashboardConfig {
                endpoints,
                user,
                password,
            },
            ssh,
            verify_tls,
            name,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) const SAMPLE: &str = r#"
cluster:
  europe:
    ceph_cli: ceph
    default_fs: CEPH-FS-01
    dashboard:
      endpoints:
        - "https://10.145.126.2:8443/"
        - " "
      user: admin
      password: from-file
  lab:
    default_fs: LAB-FS
    dashboard:
      endpoints: ["http://lab-mgr:8080"]
      user: admin
    ssh:
      host: lab-admin
      port: 2222
runtime:
  port: 11000
logging:
  log-directory: /var/log/ceph-mgr
  log-level: debug
oauth:
  jwks-url: https://cm.example.org/credmgr/certs
  key-refresh: "00:05:30"
  verify-exp: "no"
core_api:
  enable: yes
  host: https://uis.example.org/
  token: core-token
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_sample() {
        let cfg = Config::from_yaml_with_env(SAMPLE, &no_env).unwrap();

        assert_eq!(cfg.cluster_names(), vec!["europe", "lab"]);
        let europe = cfg.cluster("europe").unwrap();
        assert_eq!(europe.dashboard.endpoints, vec!["https://10.145.126.2:8443"]);
        assert_eq!(europe.dashboard.password, "from-file");
        assert_eq!(europe.verify_tls, None);

        let lab = cfg.cluster("lab").unwrap();
        assert_eq!(lab.ceph_cli, "ceph");
        assert_eq!(lab.ssh.host.as_deref(), Some("lab-admin"));
        assert_eq!(lab.ssh.port, Some(2222));

        assert_eq!(cfg.runtime.port, 11000);
        assert_eq!(cfg.runtime.metrics_port, 8700);
        assert_eq!(cfg.logging.log_directory, PathBuf::from("/var/log/ceph-mgr"));
        assert_eq!(cfg.logging.log_file, "actor.log");
        assert_eq!(cfg.logging.log_retain, 5);
        assert_eq!(cfg.oauth.key_refresh, Duration::from_secs(330));
        assert!(!cfg.oauth.verify_exp);
        assert!(cfg.core_api.is_enabled());
        assert_eq!(cfg.core_api.host.as_deref(), Some("https://uis.example.org"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("EUROPE_DASHBOARD_PASSWORD", "from-env"),
            ("LAB_VERIFY_TLS", "true"),
            ("CORE_API_TOKEN", "env-core-token"),
        ]);
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());

        let cfg = Config::from_yaml_with_env(SAMPLE, &lookup).unwrap();
        assert_eq!(cfg.cluster("europe").unwrap().dashboard.password, "from-env");
        assert_eq!(cfg.cluster("lab").unwrap().verify_tls, Some(true));
        assert_eq!(cfg.core_api.token.as_deref(), Some("env-core-token"));
    }

    #[test]
    fn test_missing_sections() {
        let err = Config::from_yaml_with_env("oauth:\n  jwks-url: x\n", &no_env).unwrap_err();
        assert!(err.to_string().contains("'cluster' section is required"));

        let no_oauth = r#"
cluster:
  a:
    default_fs: fs
    dashboard: { endpoints: ["http://a"], user: u }
"#;
        let err = Config::from_yaml_with_env(no_oauth, &no_env).unwrap_err();
        assert!(err.to_string().contains("oauth.jwks-url"));
    }

    #[test]
    fn test_invalid_cluster() {
        let no_endpoints = r#"
cluster:
  a:
    default_fs: fs
    dashboard: { endpoints: ["  "], user: u }
oauth: { jwks-url: x }
"#;
        let err = Config::from_yaml_with_env(no_endpoints, &no_env).unwrap_err();
        assert!(err.to_string().contains("cluster.a.dashboard.endpoints"));

        let no_fs = r#"
cluster:
  a:
    dashboard: { endpoints: ["http://a"], user: u }
oauth: { jwks-url: x }
"#;
        let err = Config::from_yaml_with_env(no_fs, &no_env).unwrap_err();
        assert!(err.to_string().contains("cluster.a.default_fs"));
    }

    #[test]
    fn test_legacy_dashboard_ssh_keys() {
        let legacy = r#"
cluster:
  old:
    default_fs: fs
    dashboard:
      endpoints: ["http://old-mgr:8080"]
      user: u
      ssh_user: cephadm
      ssh_key: /root/.ssh/ceph_ed25519
      ssh_port: 2200
  mixed:
    default_fs: fs
    dashboard:
      endpoints: ["http://mixed-mgr:8080"]
      user: u
      ssh_user: legacy
      ssh_port: 2200
    ssh:
      user: admin
oauth: { jwks-url: x }
"#;
        let cfg = Config::from_yaml_with_env(legacy, &no_env).unwrap();

        let old = cfg.cluster("old").unwrap();
        assert_eq!(old.ssh.user.as_deref(), Some("cephadm"));
        assert_eq!(old.ssh.key.as_deref(), Some("/root/.ssh/ceph_ed25519"));
        assert_eq!(old.ssh.port, Some(2200));
        assert_eq!(old.ssh.host, None);

        let mixed = cfg.cluster("mixed").unwrap();
        assert_eq!(mixed.ssh.user.as_deref(), Some("admin"));
        assert_eq!(mixed.ssh.port, Some(2200));
    }

    #[test]
    fn test_ordered_clusters() {
        let cfg = Config::from_yaml_with_env(SAMPLE, &no_env).unwrap();
        let names = |hint: Option<&str>| -> Vec<String> {
            cfg.ordered_clusters(hint)
                .into_iter()
                .map(|c| c.name.clone())
                .collect()
        };

        assert_eq!(names(None), vec!["europe", "lab"]);
        assert_eq!(names(Some("lab, europe")), vec!["lab", "europe"]);
        assert_eq!(names(Some("lab,unknown,lab")), vec!["lab"]);
        assert_eq!(names(Some("unknown")), vec!["europe", "lab"]);
    }

    #[test]
    fn test_parse_hms() {
        assert_eq!(parse_hms("00:10:00").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_hms(" 1:00:05 ").unwrap(), Duration::from_secs(3605));
        assert!(parse_hms("10:61:00").is_err());
        assert!(parse_hms("10m").is_err());
    }

    #[test]
    fn test_shipped_template_parses() {
        let cfg = Config::from_yaml_with_env(include_str!("../../config_template.yml"), &no_env)
            .unwrap();
        assert_eq!(cfg.runtime.port, 11000);
        assert_eq!(cfg.runtime.metrics_port, 8700);
        assert_eq!(cfg.logging.log_directory, PathBuf::from("/var/log/ceph-mgr"));
        assert_eq!(cfg.cluster("europe").unwrap().dashboard.endpoints.len(), 2);
        assert!(!cfg.core_api.is_enabled());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, SAMPLE).unwrap();

        let cfg = Config::load_from_file(&path).unwrap();
        assert_eq!(cfg.clusters.len(), 2);

        let err = Config::load_from_file(dir.path().join("missing.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
