//! 身份令牌
//!
//! 令牌只由 [`CredentialManager`](crate::CredentialManager) 持有和替换

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Xbox Live 身份令牌
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityToken {
    /// Authorization 头的完整取值（`XBL3.0 x=<uhs>;<token>`）
    pub value: String,

    /// 过期时间
    pub expires_at: DateTime<Utc>,

    /// 本次刷新返回的 refresh token（可能已轮换）
    pub refresh_token: String,

    /// user hash
    pub user_hash: Option<String>,

    /// Xbox user id
    pub xuid: Option<String>,
}

impl IdentityToken {
    pub fn new(
        value: impl Into<String>,
        expires_at: DateTime<Utc>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            value: value.into(),
            expires_at,
            refresh_token: refresh_token.into(),
            user_hash: None,
            xuid: None,
        }
    }

    pub fn with_user(mut self, user_hash: Option<String>, xuid: Option<String>) -> Self {
        self.user_hash = user_hash;
        self.xuid = xuid;
        self
    }

    /// 检查令牌是否已过期
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// 剩余有效期是否已不足 `margin`
    pub fn expires_within(&self, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        match self.expires_at.checked_sub_signed(margin) {
            Some(deadline) => Utc::now() >= deadline,
            None => true,
        }
    }

    /// 距离过期的剩余时间，已过期时为零
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// 用作 HTTP `Authorization` 头的值
    pub fn authorization(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("xuid", &self.xuid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiration() {
        let valid = IdentityToken::new("XBL3.0 x=1;a", Utc::now() + chrono::Duration::hours(1), "r");
        assert!(!valid.is_expired());
        assert!(!valid.expires_within(Duration::from_secs(300)));
        assert!(valid.expires_within(Duration::from_secs(7200)));

        let expired = IdentityToken::new("XBL3.0 x=1;a", Utc::now() - chrono::Duration::seconds(1), "r");
        assert!(expired.is_expired());
        assert!(expired.expires_within(Duration::ZERO));
        assert_eq!(expired.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = IdentityToken::new("XBL3.0 x=123;secret", Utc::now(), "refresh-secret");
        let printed = format!("{token:?}");
        assert!(!printed.contains("secret"));
    }
}
