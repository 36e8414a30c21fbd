//! 统一错误处理
//!
//! `ApiError` 实现 `IntoResponse`，渲染为统一的错误外壳：
//!
//! ```json
//! {"errors": [{"message": "Unauthorized", "details": "..."}], "size": 1, "status": 401, "type": "error"}
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::services::{ServiceError, TokenError};

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub details: String,
}

/// 错误响应外壳
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorDetail>,
    pub size: usize,
    pub status: u16,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, details: impl Into<String>) -> Self {
        Self {
            errors: vec![ErrorDetail {
                message: status.canonical_reason().unwrap_or("Error").to_string(),
                details: details.into(),
            }],
            size: 1,
            status: status.as_u16(),
            kind: "error",
        }
    }
}

/// 统一 API 错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 400 - 请求无效
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// 401 - token 缺失/无效或权限不足
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// 500 - 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(details: impl Into<String>) -> Self {
        Self::Unauthorized(details.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let details = match self {
            ApiError::BadRequest(m) | ApiError::Unauthorized(m) | ApiError::Internal(m) => m,
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), details = %details, "Request failed");
        }
        (status, Json(ErrorResponse::new(status, details))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::BadRequest(m) => ApiError::BadRequest(m),
            other @ ServiceError::AllClustersFailed { .. } => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        ApiError::Unauthorized(e.to_string())
    }
}

/// API 结果类型别名
pub type ApiResult<T> = Result<T, ApiError>;
