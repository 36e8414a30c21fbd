//! 基础设施模块
//!
//! 封装外部依赖（Ceph Dashboard、SSH、Core API）

pub mod core_api;
pub mod dashboard;
pub mod ssh;

pub use core_api::{CoreApiClient, CoreApiError};
pub use dashboard::{DashClient, DashboardError};
pub use ssh::{KeyringImporter, SshCreds, SshError, SshKeyringImporter};
