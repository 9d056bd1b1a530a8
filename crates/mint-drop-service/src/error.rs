//! 发放服务错误类型
//!
//! 预期内的拒绝（缺少暗号、链接发完等）不是错误，而是 `Outcome` 的取值；
//! 这里只定义系统错误、外部服务故障与配置错误。

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mint_drop_shared::error::SharedError;
use serde_json::json;
use thiserror::Error;

/// 外部服务故障分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalFailure {
    /// 触发平台限流（HTTP 429）
    RateLimited,
    /// 凭证失效或无权限（HTTP 401/403）
    PermissionDenied,
    /// 目标不存在，例如原帖已删除（HTTP 404）
    NotFound,
    /// 请求超时
    Timeout,
    /// 其他平台错误
    Other,
}

impl ExternalFailure {
    /// 根据 HTTP 状态码分类
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            401 | 403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 | 504 => Self::Timeout,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ExternalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 发放服务错误类型
#[derive(Debug, Error)]
pub enum DropError {
    // === 配置错误：影响整批帖子，必须在逐帖处理前中止 ===
    #[error("没有处于激活状态的项目")]
    NoActiveProject,

    #[error("缺少凭证: {0}")]
    MissingCredential(String),

    // === 外部服务错误 ===
    #[error("外部服务错误: {service} ({kind}) - {message}")]
    External {
        service: &'static str,
        kind: ExternalFailure,
        message: String,
    },

    #[error("处理超时: {0}")]
    Timeout(String),

    // === 管理接口错误 ===
    #[error("项目不存在: {0}")]
    ProjectNotFound(i64),

    #[error("领取链接不存在: {0}")]
    MintLinkNotFound(i64),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("认证失败: {0}")]
    Unauthorized(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis 错误: {0}")]
    Redis(String),

    #[error("基础设施错误: {0}")]
    Shared(#[from] SharedError),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 发放服务 Result 类型别名
pub type Result<T> = std::result::Result<T, DropError>;

impl DropError {
    /// 构造外部服务错误
    pub fn external(
        service: &'static str,
        kind: ExternalFailure,
        message: impl Into<String>,
    ) -> Self {
        Self::External {
            service,
            kind,
            message: message.into(),
        }
    }

    /// 是否为配置错误（需要运营立即介入）
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NoActiveProject | Self::MissingCredential(_))
    }

    /// 检查是否为可重试的错误
    ///
    /// 仅表示"稍后重新采集可能成功"，单次管道内不会自动重试。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::External { kind, .. } => {
                matches!(kind, ExternalFailure::RateLimited | ExternalFailure::Timeout | ExternalFailure::Other)
            }
            Self::Timeout(_) | Self::Database(_) | Self::Redis(_) => true,
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoActiveProject => "NO_ACTIVE_PROJECT",
            Self::MissingCredential(_) => "MISSING_CREDENTIAL",
            Self::External { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            Self::MintLinkNotFound(_) => "MINT_LINK_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Shared(e) => e.code(),
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<reqwest::Error> for DropError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ExternalFailure::Timeout
        } else if let Some(status) = err.status() {
            ExternalFailure::from_status(status.as_u16())
        } else {
            ExternalFailure::Other
        };
        Self::External {
            service: "http",
            kind,
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for DropError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

impl From<validator::ValidationErrors> for DropError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl DropError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ProjectNotFound(_) | Self::MintLinkNotFound(_) => StatusCode::NOT_FOUND,
            Self::NoActiveProject | Self::MissingCredential(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::External { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Database(_)
            | Self::Redis(_)
            | Self::Shared(_)
            | Self::Serialization(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DropError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "请求处理失败");
            "服务内部错误，请稍后重试".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}
