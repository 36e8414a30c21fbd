//! FABRIC Core API Client
//!
//! 只用于查询用户的 bastion 登录名（非运维用户导出 keyring 时的归属校验）

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CoreApiConfig;

/// Core API 错误
#[derive(Debug, thiserror::Error)]
pub enum CoreApiError {
    #[error("core api request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("core api returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Clone)]
pub struct CoreApiClient {
    client: Client,
    host: String,
    token: String,
}

impl CoreApiClient {
    /// 配置未启用或缺少 host/token 时返回 None
    pub fn from_config(config: &CoreApiConfig) -> Result<Option<Self>, CoreApiError> {
        let (host, token) = match (&config.host, &config.token) {
            (Some(host), Some(token)) if config.enable => (host.clone(), token.clone()),
            _ => return Ok(None),
        };
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Some(Self {
            client,
            host,
            token,
        }))
    }

    /// 查询用户的 bastion 登录名
    ///
    /// GET `{host}/people/{uuid}?as_self=false`，读取 `results[0].bastion_login`
    pub async fn bastion_login(&self, uuid: &str) -> Result<Option<String>, CoreApiError> {
        let url = format!("{}/people/{}", self.host, uuid);
        let resp = self
            .client
            .get(&url)
            .query(&[("as_self", "false")])
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(uuid = %uuid, status = status.as_u16(), "Core API people lookup failed");
            return Err(CoreApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = resp.json().await?;
        let login = bastion_login_from(&body);
        debug!(uuid = %uuid, bastion_login = ?login, "Resolved bastion login");
        Ok(login)
    }
}

fn bastion_login_from(body: &Value) -> Option<String> {
    body.get("results")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .and_then(|p| p.get("bastion_login"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod fake {
    //! 假 Core API：`/people/:uuid` 返回固定的 bastion_login

    use axum::{
        extract::{Path, Query},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::get,
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;

    pub(crate) const TOKEN: &str = "core-token";

    pub(crate) async fn spawn(logins: HashMap<String, String>) -> String {
        let app = Router::new().route(
            "/people/:uuid",
            get(
                move |headers: HeaderMap,
                      Path(uuid): Path<String>,
                      Query(q): Query<HashMap<String, String>>| {
                    let logins = logins.clone();
                    async move { people(headers, uuid, q, logins) }
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn people(
        headers: HeaderMap,
        uuid: String,
        query: HashMap<String, String>,
        logins: HashMap<String, String>,
    ) -> Response {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v == format!("Bearer {}", TOKEN));
        if !authorized || query.get("as_self").map(String::as_str) != Some("false") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        match logins.get(&uuid) {
            Some(login) => Json(json!({"results": [{"uuid": uuid, "bastion_login": login}]}))
                .into_response(),
            None => Json(json!({"results": []})).into_response(),
        }
    }
}
