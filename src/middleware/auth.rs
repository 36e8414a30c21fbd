//! FABRIC token 认证中间件
//!
//! 提供 `FabricAuth` extractor，校验 `Authorization: Bearer <jwt>`

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, header::HeaderMap, request::Parts},
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::services::{FabricToken, TokenValidator};
use crate::state::AppState;

/// 已认证的调用方
///
/// 需要认证的 handler 使用此 extractor；运维权限由 handler 通过
/// [`FabricAuth::require_operator`] 判断
///
/// # Example
///
/// ```ignore
/// async fn protected_handler(
///     auth: FabricAuth,
///     State(state): State<Arc<AppState>>,
/// ) -> ApiResult<impl IntoResponse> {
///     auth.require_operator()?;
///     // handler 逻辑...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FabricAuth {
    pub token: FabricToken,
}

impl FabricAuth {
    pub fn is_operator(&self) -> bool {
        self.token.is_operator()
    }

    pub fn require_operator(&self) -> Result<(), ApiError> {
        if self.is_operator() {
            Ok(())
        } else {
            Err(not_authorized(&self.token))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for FabricAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, &state.validator).await
    }
}

/// 校验 Bearer token，并要求 token 至少带有一个角色
pub async fn authenticate(
    headers: &HeaderMap,
    validator: &TokenValidator,
) -> Result<FabricAuth, ApiError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let raw = match bearer {
        Some(raw) => raw,
        None => {
            tracing::warn!("Missing bearer token");
            return Err(ApiError::unauthorized("missing bearer token"));
        }
    };

    let token = validator.validate(raw).await.map_err(|e| {
        tracing::warn!(error = %e, "Token validation failed");
        ApiError::from(e)
    })?;

    if token.roles.is_empty() {
        tracing::warn!(identity = %token.identity(), "Token carries no roles");
        return Err(not_authorized(&token));
    }

    Ok(FabricAuth { token })
}

pub fn not_authorized(token: &FabricToken) -> ApiError {
    ApiError::unauthorized(format!("{} is not authorized!", token.identity()))
}
