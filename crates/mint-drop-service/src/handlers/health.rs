//! 健康检查

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::state::AppState;

/// 存活探针
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "mint-drop-service"
    }))
}

/// 就绪探针：检查数据库连接
pub async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    let db_ok = match &state.database {
        Some(db) => db.health_check().await.is_ok(),
        None => true,
    };

    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": "mint-drop-service",
        "checks": {
            "database": if db_ok { "ok" } else { "fail" }
        }
    }))
}
