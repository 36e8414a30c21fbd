//! 领域模型模块
//!
//! 纯数据结构与纯函数，不依赖 axum/tokio

pub mod cluster;
pub mod envelope;
pub mod keyring;
pub mod user;

pub use cluster::{ClusterInfoItem, MonEndpoint};
pub use envelope::{Envelope, VersionInfo};
pub use user::{
    dashboard_entity, render_cap, render_caps, validate_entity, ApplyUserResponse, Capability,
    CephUser, ClusterOutcome, CreateOrUpdateUserRequest, CreateUserTemplatedRequest,
    ExportUsersRequest, RenderSpec, TemplateError, TemplateVars,
};
