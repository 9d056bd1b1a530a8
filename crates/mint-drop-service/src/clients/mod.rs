//! 外部服务客户端
//!
//! 所有请求都带请求级超时；非 2xx 响应按状态码分类为 `ExternalFailure`

pub mod credentials;
pub mod issuance;
pub mod social;

pub use credentials::{
    CachedTokenProvider, ClientCredentialsFetcher, CredentialProvider, IssuedToken,
    StaticTokenProvider, TokenFetcher,
};
pub use issuance::{HttpIssuanceClient, IssuanceClient, IssuedLink};
pub use social::{HttpSocialClient, SearchQuery, SearchResults, SocialClient};

use reqwest::Response;

use crate::error::{DropError, ExternalFailure, Result};

/// 非 2xx 响应转换为分类后的外部错误
pub(crate) async fn check_status(service: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DropError::external(
        service,
        ExternalFailure::from_status(status.as_u16()),
        format!("HTTP {}: {}", status.as_u16(), body),
    ))
}
