//! 服务层模块
//!
//! 包含核心业务逻辑（跨集群用户管理、集群信息、token 校验）

pub mod cluster_info;
pub mod token;
pub mod user_ops;
pub mod user_sync;

pub use token::{FabricToken, TokenError, TokenValidator};

/// 业务层错误
///
/// 单个集群的失败记录在结果中，只有整个操作没有任何成功集群时才返回错误
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{operation} failed on all clusters: {}", failures.join("; "))]
    AllClustersFailed {
        operation: &'static str,
        failures: Vec<String>,
    },
}

impl ServiceError {
    pub(crate) fn all_failed(operation: &'static str, failures: Vec<String>) -> Self {
        Self::AllClustersFailed {
            operation,
            failures,
        }
    }
}
