//! 环境变量覆盖
//!
//! 配置文件里的密钥可以通过 `<CLUSTER>_XXX` 环境变量覆盖，
//! 前缀由集群名转换而来（大写，`-` 替换为 `_`）

use std::env;

/// 环境变量读取函数
///
/// 测试中可以注入闭包，避免修改进程级环境变量
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// 读取进程环境变量（空字符串视为未设置）
pub fn process_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// 集群名 -> 环境变量前缀
///
/// `europe` -> `EUROPE`, `lab-2` -> `LAB_2`
pub fn env_prefix(cluster: &str) -> String {
    cluster.to_uppercase().replace('-', "_")
}

/// 解析布尔字符串
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// 常量
pub mod constants {
    use std::time::Duration;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Ceph Dashboard API 版本
    pub const DASHBOARD_ACCEPT: &str = "application/vnd.ceph.api.v1.0+json";

    /// Dashboard 请求超时
    pub const DASHBOARD_TIMEOUT: Duration = Duration::from_secs(60);

    /// SSH 连接超时
    pub const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// 未知 kid 触发 JWKS 重新拉取的最小间隔
    pub const JWKS_MISS_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

    /// 运维角色名称
    pub const FACILITY_OPERATORS: &str = "facility-operators";

    /// 默认配置文件路径
    pub const DEFAULT_CONFIG_PATH: &str = "/etc/fabric/ceph/config/config.yml";

    /// 默认 API 端口
    pub const DEFAULT_PORT: u16 = 3500;

    /// 默认 metrics 端口
    pub const DEFAULT_METRICS_PORT: u16 = 8700;
}
