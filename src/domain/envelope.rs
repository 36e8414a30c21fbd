//! 统一响应外壳
//!
//! 所有 2xx 响应体都是 `{"data": [...], "size": n, "status": 200, "type": "..."}`

use serde::Serialize;

/// 成功响应外壳
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub data: Vec<T>,
    pub size: usize,
    pub status: u16,
    #[serde(rename = "type")]
    pub kind: String,
}

impl<T> Envelope<T> {
    pub fn ok(kind: impl Into<String>, data: Vec<T>) -> Self {
        Self {
            size: data.len(),
            data,
            status: 200,
            kind: kind.into(),
        }
    }
}

/// GET /version
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub version: String,
    /// 服务启动时间 (RFC 3339)
    pub started_at: String,
}
