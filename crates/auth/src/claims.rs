//! JWT claims 解码
//!
//! 部分身份提供方直接返回 JWT bearer token，此时从 `exp` 推导过期时间。
//! 令牌由提供方签发，本地没有验签密钥，因此只解码不验签。

use crate::error::AuthError;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

/// 关心的 claims 子集
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    /// 过期时间 (Unix timestamp)
    pub exp: i64,

    /// Xbox user id
    #[serde(default)]
    pub xid: Option<String>,

    /// user hash
    #[serde(default)]
    pub uhs: Option<String>,
}

impl TokenClaims {
    pub fn expires_at(&self) -> Result<DateTime<Utc>, AuthError> {
        DateTime::from_timestamp(self.exp, 0)
            .ok_or_else(|| AuthError::invalid_token(format!("exp out of range: {}", self.exp)))
    }
}

/// 解码 JWT claims（不验签、不校验过期）
pub fn decode_unverified(token: &str) -> Result<TokenClaims, AuthError> {
    let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = std::collections::HashSet::new();

    decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| AuthError::invalid_token(e.to_string()))
}
