//! 凭据管理器
//!
//! 持有当前身份令牌，在进入过期余量前刷新。刷新在持有状态锁期间完成，
//! 并发调用者等待同一次刷新的结果。

use crate::error::AuthError;
use crate::provider::{IdentityProvider, ProviderError};
use crate::token::IdentityToken;
use sessioncast_common::Backoff;
use sessioncast_common::config::AuthConfig;
use sessioncast_common::metrics::TOKEN_REFRESHES;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

struct CredentialState {
    token: Option<IdentityToken>,
    refresh_token: String,
}

/// 凭据管理器
///
/// 整个进程只有一个实例，以 `Arc<CredentialManager>` 共享给目录客户端、信令通道和编排器。
pub struct CredentialManager {
    provider: Arc<dyn IdentityProvider>,
    config: AuthConfig,
    state: Mutex<CredentialState>,
}

impl CredentialManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        config: AuthConfig,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            config,
            state: Mutex::new(CredentialState {
                token: None,
                refresh_token: refresh_token.into(),
            }),
        }
    }

    /// 按配置加载 refresh token：优先使用内联配置，其次读取缓存文件
    pub fn from_config(
        provider: Arc<dyn IdentityProvider>,
        config: AuthConfig,
    ) -> Result<Self, AuthError> {
        let refresh_token = load_refresh_token(&config)?.ok_or(AuthError::MissingRefreshToken)?;
        Ok(Self::new(provider, config, refresh_token))
    }

    /// 返回一个未进入过期余量的令牌，必要时先刷新
    pub async fn current_token(&self) -> Result<IdentityToken, AuthError> {
        let mut state = self.state.lock().await;

        if let Some(token) = &state.token
            && !token.expires_within(self.config.expiry_margin())
        {
            return Ok(token.clone());
        }

        self.refresh_locked(&mut state).await
    }

    /// 丢弃缓存的令牌并重新认证（例如目录服务返回 401）
    pub async fn force_refresh(&self) -> Result<IdentityToken, AuthError> {
        let mut state = self.state.lock().await;
        state.token = None;
        self.refresh_locked(&mut state).await
    }

    async fn refresh_locked(&self, state: &mut CredentialState) -> Result<IdentityToken, AuthError> {
        let margin = self.config.expiry_margin();
        let max_attempts = self.config.max_refresh_attempts.max(1);
        let mut backoff = Backoff::new(self.config.initial_backoff(), self.config.max_backoff());
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!("Refreshing identity token (attempt {}/{})", attempt, max_attempts);

            match self.provider.refresh(&state.refresh_token).await {
                Ok(token) if token.expires_within(margin) => {
                    warn!(
                        "Identity provider issued a token expiring at {}, inside the {}s margin",
                        token.expires_at,
                        margin.as_secs()
                    );
                    last_error = format!("token expires at {}", token.expires_at);
                    self.absorb_rotation(state, &token).await;
                }
                Ok(token) => {
                    self.absorb_rotation(state, &token).await;
                    state.token = Some(token.clone());
                    TOKEN_REFRESHES.with_label_values(&["success"]).inc();
                    info!("Identity token refreshed, expires at {}", token.expires_at);
                    return Ok(token);
                }
                Err(ProviderError::Rejected(reason)) => {
                    TOKEN_REFRESHES.with_label_values(&["rejected"]).inc();
                    error!("Identity provider rejected credentials: {}", reason);
                    return Err(AuthError::rejected(reason));
                }
                Err(ProviderError::Transient(reason)) => {
                    TOKEN_REFRESHES.with_label_values(&["transient"]).inc();
                    warn!("Transient token refresh failure: {}", reason);
                    last_error = reason;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }

        TOKEN_REFRESHES.with_label_values(&["exhausted"]).inc();
        Err(AuthError::RefreshExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// 记录轮换后的 refresh token 并写回缓存文件
    async fn absorb_rotation(&self, state: &mut CredentialState, token: &IdentityToken) {
        if token.refresh_token.is_empty() || token.refresh_token == state.refresh_token {
            return;
        }
        state.refresh_token = token.refresh_token.clone();

        if let Some(path) = &self.config.refresh_token_file
            && let Err(e) = store_refresh_token(path, &token.refresh_token).await
        {
            warn!("Failed to persist rotated refresh token: {}", e);
        }
    }
}

/// 读取 refresh token：内联配置优先，其次缓存文件
pub fn load_refresh_token(config: &AuthConfig) -> Result<Option<String>, AuthError> {
    if let Some(token) = config.refresh_token.as_deref().map(str::trim)
        && !token.is_empty()
    {
        return Ok(Some(token.to_string()));
    }

    let Some(path) = config.refresh_token_file.as_ref() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|e| AuthError::Cache {
        reason: format!("{}: {e}", path.display()),
    })?;
    let token = content.trim();
    Ok((!token.is_empty()).then(|| token.to_string()))
}

/// 写入 refresh token 缓存文件
pub async fn store_refresh_token(path: &Path, refresh_token: &str) -> Result<(), AuthError> {
    let cache_err = |e: std::io::Error| AuthError::Cache {
        reason: format!("{}: {e}", path.display()),
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(cache_err)?;
    }
    tokio::fs::write(path, refresh_token).await.map_err(cache_err)?;
    debug!("Refresh token stored at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 按脚本依次返回结果的身份提供方
    struct ScriptedProvider {
        script: std::sync::Mutex<VecDeque<Result<IdentityToken, ProviderError>>>,
        calls: AtomicUsize,
        seen: std::sync::Mutex<Vec<String>>,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<IdentityToken, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                seen: std::sync::Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            })
        }

        fn slow(script: Vec<Result<IdentityToken, ProviderError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                seen: std::sync::Mutex::new(Vec::new()),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        async fn refresh(&self, refresh_token: &str) -> Result<IdentityToken, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(refresh_token.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Transient("script exhausted".to_string())))
        }
    }

    fn token_valid_for(secs: i64, refresh: &str) -> IdentityToken {
        IdentityToken::new(
            format!("XBL3.0 x=1;{refresh}"),
            Utc::now() + chrono::Duration::seconds(secs),
            refresh,
        )
    }

    fn config() -> AuthConfig {
        AuthConfig {
            refresh_token_file: None,
            expiry_margin_secs: 300,
            max_refresh_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let provider = ScriptedProvider::new(vec![Ok(token_valid_for(3600, "r1"))]);
        let manager = CredentialManager::new(provider.clone(), config(), "r0");

        let first = manager.current_token().await.unwrap();
        let second = manager.current_token().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed_before_use() {
        // 第一次拿到的令牌 400 秒后过期；再次调用前手动把它推进到余量之内
        let provider = ScriptedProvider::new(vec![
            Ok(token_valid_for(400, "r1")),
            Ok(token_valid_for(3600, "r2")),
        ]);
        let manager = CredentialManager::new(provider.clone(), config(), "r0");
        manager.current_token().await.unwrap();

        {
            let mut state = manager.state.lock().await;
            if let Some(token) = state.token.as_mut() {
                token.expires_at = Utc::now() + chrono::Duration::seconds(200);
            }
        }

        let token = manager.current_token().await.unwrap();
        assert!(!token.expires_within(Duration::from_secs(300)));
        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.seen.lock().unwrap().as_slice(), ["r0", "r1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let provider =
            ScriptedProvider::slow(vec![Ok(token_valid_for(3600, "r1"))], Duration::from_millis(50));
        let manager = Arc::new(CredentialManager::new(provider.clone(), config(), "r0"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.current_token().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Transient("HTTP 503".to_string())),
            Err(ProviderError::Transient("connection reset".to_string())),
            Ok(token_valid_for(3600, "r1")),
        ]);
        let manager = CredentialManager::new(provider.clone(), config(), "r0");

        assert!(manager.current_token().await.is_ok());
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let provider = ScriptedProvider::new(vec![]);
        let manager = CredentialManager::new(provider.clone(), config(), "r0");

        let err = manager.current_token().await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshExhausted { attempts: 3, .. }));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Rejected("invalid_grant".to_string())),
            Ok(token_valid_for(3600, "r1")),
        ]);
        let manager = CredentialManager::new(provider.clone(), config(), "r0");

        let err = manager.current_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected { .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_token_counts_as_failed_attempt() {
        let provider = ScriptedProvider::new(vec![
            Ok(token_valid_for(60, "r1")),
            Ok(token_valid_for(120, "r2")),
            Ok(token_valid_for(3600, "r3")),
        ]);
        let manager = CredentialManager::new(provider.clone(), config(), "r0");

        let token = manager.current_token().await.unwrap();
        assert_eq!(token.refresh_token, "r3");
        assert_eq!(provider.calls(), 3);
        // 每次尝试都使用上一次轮换得到的 refresh token
        assert_eq!(provider.seen.lock().unwrap().as_slice(), ["r0", "r1", "r2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_returns_token_inside_margin() {
        let provider = ScriptedProvider::new(vec![
            Ok(token_valid_for(10, "r1")),
            Ok(token_valid_for(10, "r2")),
            Ok(token_valid_for(10, "r3")),
        ]);
        let manager = CredentialManager::new(provider.clone(), config(), "r0");

        let err = manager.current_token().await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshExhausted { .. }));
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache() {
        let provider = ScriptedProvider::new(vec![
            Ok(token_valid_for(3600, "r1")),
            Ok(token_valid_for(3600, "r2")),
        ]);
        let manager = CredentialManager::new(provider.clone(), config(), "r0");

        let first = manager.current_token().await.unwrap();
        let forced = manager.force_refresh().await.unwrap();
        assert_ne!(first.value, forced.value);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("refresh_token");

        let provider = ScriptedProvider::new(vec![Ok(token_valid_for(3600, "rotated"))]);
        let manager = CredentialManager::new(
            provider,
            AuthConfig {
                refresh_token_file: Some(path.clone()),
                ..config()
            },
            "initial",
        );
        manager.current_token().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "rotated");
    }

    #[test]
    fn test_load_refresh_token_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refresh_token");
        std::fs::write(&path, "from-file\n").unwrap();

        let mut config = AuthConfig {
            refresh_token: None,
            refresh_token_file: Some(path),
            ..Default::default()
        };
        assert_eq!(load_refresh_token(&config).unwrap().as_deref(), Some("from-file"));

        config.refresh_token = Some("inline".to_string());
        assert_eq!(load_refresh_token(&config).unwrap().as_deref(), Some("inline"));

        config.refresh_token = None;
        config.refresh_token_file = Some(dir.path().join("missing"));
        assert!(load_refresh_token(&config).unwrap().is_none());

        let provider = ScriptedProvider::new(vec![]);
        assert!(matches!(
            CredentialManager::from_config(provider, config),
            Err(AuthError::MissingRefreshToken)
        ));
    }
}
