//! 路由配置模块

use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, patch, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware::api_key_auth_middleware, state::AppState};

/// 请求级超时，需大于推送处理预算
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 管理接口路由，统一经过 API Key 认证
pub fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // 项目
        .route(
            "/projects",
            get(handlers::admin::list_projects).post(handlers::admin::create_project),
        )
        .route(
            "/projects/{id}",
            get(handlers::admin::get_project).put(handlers::admin::update_project),
        )
        .route(
            "/projects/{id}/active",
            patch(handlers::admin::set_project_active),
        )
        // 暗号
        .route(
            "/projects/{id}/codes",
            get(handlers::admin::list_codes).post(handlers::admin::add_codes),
        )
        .route(
            "/projects/{id}/codes/generate",
            post(handlers::admin::generate_codes),
        )
        // 领取链接
        .route(
            "/projects/{id}/links",
            get(handlers::admin::list_links).post(handlers::admin::import_links),
        )
        .route("/projects/{id}/links/sync", post(handlers::admin::sync_links))
        .route("/links/{id}/claim", post(handlers::admin::claim_link))
        // 统计与记录
        .route("/projects/{id}/stats", get(handlers::admin::pool_stats))
        .route(
            "/projects/{id}/deliveries",
            get(handlers::admin::list_deliveries),
        )
        .route("/runs", post(handlers::admin::trigger_run))
        .layer(middleware::from_fn_with_state(state, api_key_auth_middleware))
}

/// 推送通道路由，签名在处理器内校验
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route(
        "/webhooks/social",
        get(handlers::webhook::crc_challenge).post(handlers::webhook::receive_events),
    )
}

/// 组装完整应用
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/admin", admin_routes(state.clone()))
        .merge(webhook_routes())
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
