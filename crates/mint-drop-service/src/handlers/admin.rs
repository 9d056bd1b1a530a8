//! 管理接口处理器
//!
//! 项目、暗号、领取链接的维护，以及统计与手动执行批次

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::info;

use crate::error::DropError;
use crate::handlers::ApiResponse;
use crate::models::{Delivery, IngestChannel, MintLink, PoolStats, Project, SecretCode};
use crate::service::{
    AddCodesRequest, ClaimLinkRequest, GenerateCodesRequest, ImportLinksRequest, ImportReport,
    ProjectRequest, RunStats, SetActiveRequest,
};
use crate::state::AppState;

type ApiResult<T> = Result<Json<ApiResponse<T>>, DropError>;

#[derive(Debug, Deserialize)]
pub struct DeliveryQuery {
    pub limit: Option<i64>,
}

// ==================== 项目 ====================

/// GET /api/admin/projects
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Vec<Project>> {
    Ok(Json(ApiResponse::success(state.admin.list_projects().await?)))
}

/// POST /api/admin/projects
pub async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<ProjectRequest>,
) -> ApiResult<Project> {
    Ok(Json(ApiResponse::success(state.admin.create_project(req).await?)))
}

/// GET /api/admin/projects/{id}
pub async fn get_project(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Project> {
    Ok(Json(ApiResponse::success(state.admin.get_project(id).await?)))
}

/// PUT /api/admin/projects/{id}
pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ProjectRequest>,
) -> ApiResult<Project> {
    Ok(Json(ApiResponse::success(state.admin.update_project(id, req).await?)))
}

/// PATCH /api/admin/projects/{id}/active
pub async fn set_project_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SetActiveRequest>,
) -> ApiResult<Project> {
    Ok(Json(ApiResponse::success(state.admin.set_active(id, req.active).await?)))
}

// ==================== 暗号 ====================

/// GET /api/admin/projects/{id}/codes
pub async fn list_codes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<SecretCode>> {
    Ok(Json(ApiResponse::success(state.admin.list_codes(id).await?)))
}

/// POST /api/admin/projects/{id}/codes
pub async fn add_codes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AddCodesRequest>,
) -> ApiResult<ImportReport> {
    Ok(Json(ApiResponse::success(state.admin.add_codes(id, req).await?)))
}

/// POST /api/admin/projects/{id}/codes/generate
pub async fn generate_codes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<GenerateCodesRequest>,
) -> ApiResult<Vec<String>> {
    Ok(Json(ApiResponse::success(state.admin.generate_codes(id, req).await?)))
}

// ==================== 领取链接 ====================

/// GET /api/admin/projects/{id}/links
pub async fn list_links(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<MintLink>> {
    Ok(Json(ApiResponse::success(state.admin.list_links(id).await?)))
}

/// POST /api/admin/projects/{id}/links
pub async fn import_links(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ImportLinksRequest>,
) -> ApiResult<ImportReport> {
    Ok(Json(ApiResponse::success(state.admin.import_links(id, req).await?)))
}

/// POST /api/admin/projects/{id}/links/sync
pub async fn sync_links(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ImportReport> {
    Ok(Json(ApiResponse::success(state.admin.sync_links(id).await?)))
}

/// POST /api/admin/links/{id}/claim
pub async fn claim_link(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ClaimLinkRequest>,
) -> ApiResult<MintLink> {
    Ok(Json(ApiResponse::success(state.admin.claim_link(id, req).await?)))
}

// ==================== 统计与记录 ====================

/// GET /api/admin/projects/{id}/stats
pub async fn pool_stats(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<PoolStats> {
    Ok(Json(ApiResponse::success(state.admin.pool_stats(id).await?)))
}

/// GET /api/admin/projects/{id}/deliveries?limit=
pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<DeliveryQuery>,
) -> ApiResult<Vec<Delivery>> {
    Ok(Json(ApiResponse::success(
        state.admin.list_deliveries(id, query.limit).await?,
    )))
}

/// POST /api/admin/runs
///
/// 立即执行一个轮询批次；其他实例持有运行租约时不执行
pub async fn trigger_run(State(state): State<AppState>) -> ApiResult<RunStats> {
    match state.poller.run_once(IngestChannel::Manual).await? {
        Some(stats) => {
            info!(found = stats.found, delivered = stats.delivered, "手动批次执行完成");
            Ok(Json(ApiResponse::success(stats)))
        }
        None => Ok(Json(ApiResponse::empty("RUN_IN_PROGRESS", "其他实例正在执行批次"))),
    }
}
