//! 发行 API 的 bearer 凭证
//!
//! `CachedTokenProvider` 在令牌过期前 60 秒刷新，并发调用共享同一次刷新。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use mint_drop_shared::config::IssuanceConfig;

use super::check_status;
use crate::error::{DropError, Result};

/// 提前刷新的安全余量
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// 凭证提供者
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// 返回当前有效的 bearer token
    async fn bearer_token(&self) -> Result<String>;
}

/// 预先签发的固定令牌
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String> {
        if self.token.is_empty() {
            return Err(DropError::MissingCredential("发行 API token 为空".to_string()));
        }
        Ok(self.token.clone())
    }
}

/// 令牌端点返回的令牌
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedToken {
    pub access_token: String,
    /// 有效期（秒），端点未返回时使用配置的默认值
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// 令牌获取方式
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch(&self) -> Result<IssuedToken>;
}

/// OAuth client-credentials 令牌获取
pub struct ClientCredentialsFetcher {
    http: Client,
    auth_url: String,
    client_id: String,
    client_secret: String,
    audience: String,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
}

impl ClientCredentialsFetcher {
    /// 配置缺少 client_id/client_secret 时返回 None
    pub fn from_config(config: &IssuanceConfig) -> Result<Option<Self>> {
        let (Some(client_id), Some(client_secret)) = (&config.client_id, &config.client_secret)
        else {
            return Ok(None);
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DropError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Some(Self {
            http,
            auth_url: config.auth_url.clone(),
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            audience: config.audience.clone(),
        }))
    }
}

#[async_trait]
impl TokenFetcher for ClientCredentialsFetcher {
    async fn fetch(&self) -> Result<IssuedToken> {
        let request = TokenRequest {
            grant_type: "client_credentials",
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            audience: &self.audience,
        };
        let response = self.http.post(&self.auth_url).json(&request).send().await?;
        let token = check_status("issuance-auth", response).await?.json().await?;
        Ok(token)
    }
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// 带缓存的令牌提供者
pub struct CachedTokenProvider<F> {
    fetcher: F,
    default_lifetime: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl<F: TokenFetcher> CachedTokenProvider<F> {
    pub fn new(fetcher: F, default_lifetime: Duration) -> Self {
        Self {
            fetcher,
            default_lifetime,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<F: TokenFetcher> CredentialProvider for CachedTokenProvider<F> {
    async fn bearer_token(&self) -> Result<String> {
        // 持锁期间完成刷新，并发调用者等待同一次刷新结果
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref()
            && Instant::now() < entry.refresh_at
        {
            return Ok(entry.token.clone());
        }

        debug!("刷新发行 API 令牌");
        let issued = self.fetcher.fetch().await?;
        let lifetime = issued
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(self.default_lifetime);
        let refresh_at = Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN);

        info!(lifetime_secs = lifetime.as_secs(), "发行 API 令牌已更新");
        *cached = Some(CachedToken {
            token: issued.access_token.clone(),
            refresh_at,
        });
        Ok(issued.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued(token: &str, expires_in: Option<u64>) -> IssuedToken {
        IssuedToken {
            access_token: token.to_string(),
            expires_in,
        }
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new("abc");
        assert_eq!(provider.bearer_token().await.unwrap(), "abc");

        let empty = StaticTokenProvider::new("");
        assert!(empty.bearer_token().await.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_cached_token_reused_within_lifetime() {
        let mut fetcher = MockTokenFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|| Ok(issued("t1", Some(3600))));

        let provider = CachedTokenProvider::new(fetcher, Duration::from_secs(86_400));
        assert_eq!(provider.bearer_token().await.unwrap(), "t1");
        assert_eq!(provider.bearer_token().await.unwrap(), "t1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_token_refreshed_before_expiry() {
        let mut fetcher = MockTokenFetcher::new();
        let mut seq = mockall::Sequence::new();
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(issued("t1", Some(120))));
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(issued("t2", Some(120))));

        let provider = CachedTokenProvider::new(fetcher, Duration::from_secs(86_400));
        assert_eq!(provider.bearer_token().await.unwrap(), "t1");

        // 有效期 120 秒，提前 60 秒刷新
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(provider.bearer_token().await.unwrap(), "t1");
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(provider.bearer_token().await.unwrap(), "t2");
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let mut fetcher = MockTokenFetcher::new();
        fetcher.expect_fetch().returning(|| {
            Err(DropError::external(
                "issuance-auth",
                crate::error::ExternalFailure::PermissionDenied,
                "bad secret",
            ))
        });

        let provider = CachedTokenProvider::new(fetcher, Duration::from_secs(60));
        assert!(provider.bearer_token().await.is_err());
    }
}
