//! API Key 认证中间件
//!
//! 管理接口通过 X-API-Key 头部传递 API Key，与配置中的值比较摘要

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::DropError;
use crate::state::AppState;

/// API Key Header 名称
pub const API_KEY_HEADER: &str = "X-API-Key";

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

pub async fn api_key_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_api_key.as_deref() else {
        warn!("管理接口 API Key 未配置，拒绝请求");
        return DropError::Unauthorized("管理接口未启用".to_string()).into_response();
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if digest(key) == digest(expected) => next.run(request).await,
        Some(key) => {
            warn!(key_prefix = &key[..key.len().min(4)], "API Key 无效");
            DropError::Unauthorized("API Key 无效".to_string()).into_response()
        }
        None => DropError::Unauthorized("缺少 API Key".to_string()).into_response(),
    }
}
