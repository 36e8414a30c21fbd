//! 配置模块
//!
//! YAML 配置文件解析与环境变量覆盖

pub mod env;
pub mod settings;

pub use env::constants;
pub use settings::{
    ClusterEntry, Config, ConfigError, CoreApiConfig, DashboardConfig, LoggingConfig,
    OAuthConfig, RuntimeConfig, SshSettings,
};
