//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::{ClusterEntry, Config};
use crate::infra::{CoreApiClient, KeyringImporter, SshKeyringImporter};
use crate::metrics::Metrics;
use crate::services::TokenValidator;

/// 应用状态
///
/// Dashboard 会话不在请求之间共享，每个请求重新登录
pub struct AppState {
    // ========== 核心配置 ==========
    pub config: Arc<Config>,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    // ========== 认证 ==========
    pub validator: TokenValidator,
    /// 未启用时为 None
    pub core_api: Option<CoreApiClient>,

    // ========== 外部操作 ==========
    /// keyring 导入（生产环境走 SSH）
    pub importer: Arc<dyn KeyringImporter>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// 根据配置创建应用状态
    pub fn new(config: Config, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let validator = TokenValidator::new(&config.oauth)?;
        let core_api = CoreApiClient::from_config(&config.core_api)?;

        tracing::info!(
            clusters = ?config.cluster_names(),
            port = config.runtime.port,
            metrics_port = config.runtime.metrics_port,
            jwks_url = %config.oauth.jwks_url,
            verify_exp = config.oauth.verify_exp,
            core_api = core_api.is_some(),
            "Loaded configuration"
        );

        Ok(Self {
            config: Arc::new(config),
            started_at: Utc::now(),
            validator,
            core_api,
            importer: Arc::new(SshKeyringImporter),
            metrics,
        })
    }

    /// 按 `X-Cluster` 提示排列的集群
    pub fn clusters(&self, hint: Option<&str>) -> Vec<&ClusterEntry> {
        self.config.ordered_clusters(hint)
    }
}
