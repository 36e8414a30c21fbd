//! FABRIC token 校验
//!
//! Token 由 FABRIC credential manager 签发，公钥通过 JWKS 获取并缓存

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{constants, OAuthConfig};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),
    #[error("token header has no 'kid'")]
    MissingKid,
    #[error("no signing key found for kid '{0}'")]
    UnknownKid(String),
    #[error("token algorithm {alg:?} does not match signing key")]
    AlgorithmMismatch { alg: Algorithm },
    #[error("failed to fetch JWKS: {0}")]
    Jwks(String),
    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

/// Token 中的角色
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// 解码后的 FABRIC token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricToken {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub projects: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl FabricToken {
    pub fn is_operator(&self) -> bool {
        self.roles
            .iter()
            .any(|r| r.name == constants::FACILITY_OPERATORS)
    }

    /// 日志与错误信息中使用的身份标识
    pub fn identity(&self) -> String {
        format!("{}/{}", self.uuid, self.email)
    }
}

struct KeyCache {
    keys: JwkSet,
    fetched_at: Option<Instant>,
}

/// JWKS 校验器
///
/// 密钥缓存超过 `key_refresh` 或遇到未知 kid 时重新拉取
pub struct TokenValidator {
    http: Client,
    jwks_url: Option<String>,
    key_refresh: Duration,
    miss_refetch: Duration,
    verify_exp: bool,
    cache: RwLock<KeyCache>,
}

impl TokenValidator {
    pub fn new(config: &OAuthConfig) -> Result<Self, TokenError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TokenError::Jwks(e.to_string()))?;
        Ok(Self {
            http,
            jwks_url: Some(config.jwks_url.clone()),
            key_refresh: config.key_refresh,
            miss_refetch: constants::JWKS_MISS_REFETCH_INTERVAL,
            verify_exp: config.verify_exp,
            cache: RwLock::new(KeyCache {
                keys: JwkSet { keys: Vec::new() },
                fetched_at: None,
            }),
        })
    }

    /// 使用固定密钥集，不访问网络
    pub fn with_static_keys(keys: JwkSet, verify_exp: bool) -> Self {
        Self {
            http: Client::new(),
            jwks_url: None,
            key_refresh: Duration::MAX,
            miss_refetch: Duration::MAX,
            verify_exp,
            cache: RwLock::new(KeyCache {
                keys,
                fetched_at: Some(Instant::now()),
            }),
        }
    }

    /// 调整未知 kid 触发重新拉取的最小间隔
    pub fn with_miss_refetch_interval(mut self, interval: Duration) -> Self {
        self.miss_refetch = interval;
        self
    }

    /// 校验签名（以及按配置校验过期时间），返回 claims
    pub async fn validate(&self, token: &str) -> Result<FabricToken, TokenError> {
        let header = decode_header(token).map_err(TokenError::Malformed)?;
        let kid = header.kid.ok_or(TokenError::MissingKid)?;

        let jwk = self.find_key(&kid).await?;
        if !algorithm_matches(&jwk, header.alg) {
            return Err(TokenError::AlgorithmMismatch { alg: header.alg });
        }
        let key = DecodingKey::from_jwk(&jwk).map_err(TokenError::Invalid)?;

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        validation.validate_exp = self.verify_exp;
        if !self.verify_exp {
            validation.required_spec_claims = HashSet::new();
        }

        let data = decode::<FabricToken>(token, &key, &validation).map_err(TokenError::Invalid)?;
        debug!(identity = %data.claims.identity(), "Validated token");
        Ok(data.claims)
    }

    async fn find_key(&self, kid: &str) -> Result<Jwk, TokenError> {
        let refreshed = self.refresh_if_older(self.key_refresh).await?;
        if let Some(jwk) = self.cached_key(kid).await {
            return Ok(jwk);
        }

        // 签发方可能已轮换密钥；按未知 kid 触发的拉取受最小间隔限制
        if !refreshed && self.refresh_if_older(self.miss_refetch).await? {
            if let Some(jwk) = self.cached_key(kid).await {
                return Ok(jwk);
            }
        }

        debug!(kid = %kid, "No signing key for kid");
        Err(TokenError::UnknownKid(kid.to_string()))
    }

    async fn cached_key(&self, kid: &str) -> Option<Jwk> {
        self.cache.read().await.keys.find(kid).cloned()
    }

    /// 缓存早于 `max_age` 时重新拉取，返回是否拉取过
    async fn refresh_if_older(&self, max_age: Duration) -> Result<bool, TokenError> {
        let url = match &self.jwks_url {
            Some(url) => url,
            None => return Ok(false),
        };
        if !is_older(self.cache.read().await.fetched_at, max_age) {
            return Ok(false);
        }

        let mut cache = self.cache.write().await;
        // 等待写锁期间可能已有其他请求完成拉取
        if !is_older(cache.fetched_at, max_age) {
            return Ok(false);
        }

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| TokenError::Jwks(e.to_string()))?;
        if !resp.status().is_success() {
            warn!(url = %url, status = resp.status().as_u16(), "JWKS fetch failed");
            return Err(TokenError::Jwks(format!("{} returned {}", url, resp.status())));
        }
        let keys: JwkSet = resp
            .json()
            .await
            .map_err(|e| TokenError::Jwks(e.to_string()))?;

        info!(url = %url, keys = keys.keys.len(), "Refreshed JWKS");
        cache.keys = keys;
        cache.fetched_at = Some(Instant::now());
        Ok(true)
    }
}

fn is_older(fetched_at: Option<Instant>, max_age: Duration) -> bool {
    fetched_at.map_or(true, |at| at.elapsed() >= max_age)
}

fn algorithm_matches(jwk: &Jwk, alg: Algorithm) -> bool {
    use Algorithm::*;
    match &jwk.algorithm {
        AlgorithmParameters::OctetKey(_) => matches!(alg, HS256 | HS384 | HS512),
        AlgorithmParameters::RSA(_) => {
            matches!(alg, RS256 | RS384 | RS512 | PS256 | PS384 | PS512)
        }
        AlgorithmParameters::EllipticCurve(_) => matches!(alg, ES256 | ES384),
        AlgorithmParameters::OctetKeyPair(_) => matches!(alg, EdDSA),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 测试用 HS256 token

    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    pub(crate) const SECRET: &str = "fabric-ceph-jwks-secret-0123456789ab";
    /// SECRET 的 base64url 编码
    const SECRET_B64: &str = "ZmFicmljLWNlcGgtandrcy1zZWNyZXQtMDEyMzQ1Njc4OWFi";
    pub(crate) const KID: &str = "test";

    pub(crate) fn jwks() -> JwkSet {
        serde_json::from_value(json!({
            "keys": [{"kty": "oct", "kid": KID, "alg": "HS256", "k": SECRET_B64}]
        }))
        .unwrap()
    }

    pub(crate) fn validator() -> TokenValidator {
        TokenValidator::with_static_keys(jwks(), true)
    }

    pub(crate) fn sign(claims: serde_json::Value, kid: &str) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid.to_string());
        encode(&header, &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    pub(crate) fn token(uuid: &str, email: &str, roles: &[&str]) -> String {
        let roles: Vec<_> = roles
            .iter()
            .map(|r| json!({"name": r, "description": ""}))
            .collect();
        sign(
            json!({
                "uuid": uuid,
                "email": email,
                "sub": format!("http://cilogon.org/{}", uuid),
                "name": "Test User",
                "roles": roles,
                "projects": [],
                "exp": chrono::Utc::now().timestamp() + 3600,
            }),
            KID,
        )
    }

    pub(crate) fn operator_token() -> String {
        token("uuid-op", "op@fabric-testbed.net", &[constants::FACILITY_OPERATORS, "project-leads"])
    }
}
