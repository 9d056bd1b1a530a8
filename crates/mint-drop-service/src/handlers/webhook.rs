//! 推送通道入口
//!
//! GET 为平台挑战响应，POST 为事件推送

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::DropError;
use crate::handlers::ApiResponse;
use crate::ingest::{SIGNATURE_HEADER, WebhookOutcome, WebhookPayload};
use crate::service::RunStats;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CrcQuery {
    pub crc_token: String,
}

/// GET /webhooks/social?crc_token=...
pub async fn crc_challenge(
    State(state): State<AppState>,
    Query(query): Query<CrcQuery>,
) -> Result<Json<Value>, DropError> {
    let token = state.webhook.crc_response(&query.crc_token)?;
    debug!("已响应挑战请求");
    Ok(Json(json!({ "response_token": token })))
}

/// POST /webhooks/social
///
/// 超出处理预算时返回 202，处理在后台继续
pub async fn receive_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<RunStats>>), DropError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    state.webhook.verify(&body, signature)?;

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| DropError::Validation(format!("事件格式无效: {}", e)))?;

    match state.webhook.handle(payload).await? {
        WebhookOutcome::Completed(stats) => Ok((StatusCode::OK, Json(ApiResponse::success(stats)))),
        WebhookOutcome::Deferred => Ok((
            StatusCode::ACCEPTED,
            Json(ApiResponse::empty("DEFERRED", "处理超出预算，已转入后台")),
        )),
    }
}
