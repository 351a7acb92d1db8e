//! 身份提供方
//!
//! [`IdentityProvider`] 把 refresh token 换成新的 [`IdentityToken`]。
//! 生产实现 [`XboxLiveProvider`] 依次完成 MSA OAuth 刷新、Xbox 用户认证、XSTS 授权三步。

use crate::claims;
use crate::error::AuthError;
use crate::token::IdentityToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use sessioncast_common::config::AuthConfig;
use thiserror::Error;
use tracing::{debug, warn};

/// 身份提供方错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 凭据被拒绝，不可重试
    #[error("rejected: {0}")]
    Rejected(String),

    /// 网络错误、5xx、429，可重试
    #[error("transient: {0}")]
    Transient(String),
}

impl ProviderError {
    /// 按 HTTP 状态码分类
    ///
    /// 400 `invalid_grant`、401、403 视为拒绝；5xx 与 429 为瞬时错误；其余 4xx 为拒绝
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = format!("HTTP {status}: {body}");
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Self::Transient(detail)
        } else {
            Self::Rejected(detail)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Rejected(format!("malformed response: {err}"))
        } else {
            Self::Transient(err.to_string())
        }
    }
}

/// 身份提供方抽象
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 使用 refresh token 换取新的身份令牌
    async fn refresh(&self, refresh_token: &str) -> Result<IdentityToken, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct MsaTokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct XboxTokenResponse {
    #[serde(default)]
    not_after: Option<String>,
    token: String,
    display_claims: DisplayClaims,
}

impl XboxTokenResponse {
    /// 过期时间：优先取 `NotAfter`，缺失或无法解析时从令牌自身的 `exp` claim 推导
    fn expires_at(&self) -> Result<DateTime<Utc>, ProviderError> {
        if let Some(not_after) = self.not_after.as_deref() {
            match DateTime::parse_from_rfc3339(not_after) {
                Ok(at) => return Ok(at.with_timezone(&Utc)),
                Err(e) => debug!("Unparsable NotAfter '{}': {}", not_after, e),
            }
        }
        claims::decode_unverified(&self.token)
            .and_then(|claims| claims.expires_at())
            .map_err(|e| ProviderError::Rejected(format!("token has no usable expiry: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct DisplayClaims {
    xui: Vec<UserClaims>,
}

#[derive(Debug, Deserialize)]
struct UserClaims {
    uhs: String,
    #[serde(default)]
    xid: Option<String>,
}

/// Xbox Live 身份提供方
#[derive(Debug, Clone)]
pub struct XboxLiveProvider {
    client: reqwest::Client,
    config: AuthConfig,
}

impl XboxLiveProvider {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AuthError::general(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// 第一步：MSA OAuth 刷新
    async fn refresh_msa(&self, refresh_token: &str) -> Result<MsaTokenResponse, ProviderError> {
        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("MSA token endpoint returned HTTP {}", status);
            return Err(ProviderError::from_status(status, &body));
        }

        Ok(response.json().await?)
    }

    /// 第二步：Xbox 用户认证
    async fn authenticate_user(&self, access_token: &str) -> Result<XboxTokenResponse, ProviderError> {
        let body = json!({
            "RelyingParty": "http://auth.xboxlive.com",
            "TokenType": "JWT",
            "Properties": {
                "AuthMethod": "RPS",
                "SiteName": "user.auth.xboxlive.com",
                "RpsTicket": format!("t={access_token}"),
            }
        });
        self.post_xbox(&self.config.user_auth_endpoint, &body).await
    }

    /// 第三步：XSTS 授权
    async fn authorize_xsts(&self, user_token: &str) -> Result<XboxTokenResponse, ProviderError> {
        let body = json!({
            "RelyingParty": self.config.relying_party,
            "TokenType": "JWT",
            "Properties": {
                "SandboxId": "RETAIL",
                "UserTokens": [user_token],
            }
        });
        self.post_xbox(&self.config.xsts_endpoint, &body).await
    }

    async fn post_xbox(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<XboxTokenResponse, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("x-xbl-contract-version", "1")
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{} returned HTTP {}", url, status);
            return Err(ProviderError::from_status(status, &body));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl IdentityProvider for XboxLiveProvider {
    async fn refresh(&self, refresh_token: &str) -> Result<IdentityToken, ProviderError> {
        let msa = self.refresh_msa(refresh_token).await?;
        let msa_expiry = Utc::now() + chrono::Duration::seconds(msa.expires_in);
        debug!("MSA access token refreshed, expires_in={}s", msa.expires_in);

        let user = self.authenticate_user(&msa.access_token).await?;
        let xsts = self.authorize_xsts(&user.token).await?;

        let xsts_expiry = xsts.expires_at()?;
        let claims = xsts
            .display_claims
            .xui
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Rejected("XSTS response has no user claims".to_string()))?;

        let expires_at = xsts_expiry.min(msa_expiry);
        let value = format!("XBL3.0 x={};{}", claims.uhs, xsts.token);

        debug!("XSTS token issued, expires_at={}", expires_at);
        Ok(IdentityToken::new(value, expires_at, msa.refresh_token)
            .with_user(Some(claims.uhs), claims.xid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#),
            ProviderError::Rejected(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::UNAUTHORIZED, ""),
            ProviderError::Rejected(_)
        ));
        assert!(ProviderError::from_status(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
        assert!(ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
    }

    fn response(not_after: Option<&str>, token: &str) -> XboxTokenResponse {
        XboxTokenResponse {
            not_after: not_after.map(str::to_string),
            token: token.to_string(),
            display_claims: DisplayClaims { xui: Vec::new() },
        }
    }

    #[test]
    fn test_not_after_with_seven_digit_fraction() {
        let expiry = response(Some("2031-05-01T10:20:30.1234567Z"), "opaque")
            .expires_at()
            .unwrap();
        assert_eq!(expiry.to_rfc3339(), "2031-05-01T10:20:30.123456700+00:00");
    }

    #[test]
    fn test_expiry_without_not_after_or_jwt_is_rejected() {
        let err = response(None, "opaque").expires_at().unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(ref m) if m.contains("expiry")));

        let err = response(Some("tomorrow"), "opaque").expires_at().unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_provider_creation() {
        assert!(XboxLiveProvider::new(&AuthConfig::default()).is_ok());
    }
}
