//! 数字藏品发行 API 客户端
//!
//! 每个请求携带 `X-API-Key` 头与 bearer 凭证

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mint_drop_shared::config::IssuanceConfig;

use super::check_status;
use super::credentials::CredentialProvider;
use crate::error::{DropError, Result};

const SERVICE: &str = "issuance";

/// 发行方返回的领取链接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedLink {
    pub qr_hash: String,
    #[serde(default)]
    pub claimed: bool,
}

/// 发行 API 接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssuanceClient: Send + Sync {
    /// 列出活动下的全部领取链接及其领取状态
    async fn list_links(&self, event_id: &str, event_secret: &str) -> Result<Vec<IssuedLink>>;

    /// 获取链接的领取密钥
    async fn claim_secret(&self, qr_hash: &str) -> Result<String>;

    /// 使用领取密钥为受益人（地址或邮箱）领取
    async fn claim(&self, qr_hash: &str, secret: &str, beneficiary: &str) -> Result<()>;

    /// 由 qr_hash 拼接完整领取地址
    fn claim_url(&self, qr_hash: &str) -> String;
}

pub struct HttpIssuanceClient {
    http: Client,
    api_base: String,
    api_key: String,
    claim_url_base: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpIssuanceClient {
    pub fn new(config: &IssuanceConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| DropError::MissingCredential("发行 API key 未配置".to_string()))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DropError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            claim_url_base: config.claim_url_base.clone(),
            credentials,
        })
    }

    async fn authorized(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.credentials.bearer_token().await?;
        Ok(builder.header("X-API-Key", &self.api_key).bearer_auth(token))
    }
}

#[derive(Serialize)]
struct QrCodesRequest<'a> {
    secret_code: &'a str,
}

#[derive(Deserialize)]
struct ClaimInfo {
    secret: String,
}

#[derive(Serialize)]
struct ClaimRequest<'a> {
    address: &'a str,
    qr_hash: &'a str,
    secret: &'a str,
}

#[async_trait]
impl IssuanceClient for HttpIssuanceClient {
    #[instrument(skip(self, event_secret))]
    async fn list_links(&self, event_id: &str, event_secret: &str) -> Result<Vec<IssuedLink>> {
        let request = self
            .http
            .post(format!("{}/event/{}/qr-codes", self.api_base, event_id))
            .json(&QrCodesRequest {
                secret_code: event_secret,
            });
        let response = self.authorized(request).await?.send().await?;
        let links = check_status(SERVICE, response).await?.json().await?;
        Ok(links)
    }

    #[instrument(skip(self))]
    async fn claim_secret(&self, qr_hash: &str) -> Result<String> {
        let request = self
            .http
            .get(format!("{}/actions/claim-qr", self.api_base))
            .query(&[("qr_hash", qr_hash)]);
        let response = self.authorized(request).await?.send().await?;
        let info: ClaimInfo = check_status(SERVICE, response).await?.json().await?;
        Ok(info.secret)
    }

    #[instrument(skip(self, secret))]
    async fn claim(&self, qr_hash: &str, secret: &str, beneficiary: &str) -> Result<()> {
        let request = self
            .http
            .post(format!("{}/actions/claim-qr", self.api_base))
            .json(&ClaimRequest {
                address: beneficiary,
                qr_hash,
                secret,
            });
        let response = self.authorized(request).await?.send().await?;
        check_status(SERVICE, response).await?;
        Ok(())
    }

    fn claim_url(&self, qr_hash: &str) -> String {
        format!("{}{}", self.claim_url_base, qr_hash)
    }
}
