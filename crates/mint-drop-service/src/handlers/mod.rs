//! HTTP 处理器

pub mod admin;
pub mod health;
pub mod webhook;

use serde::Serialize;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    /// 成功但没有数据返回
    pub fn empty(code: &str, message: &str) -> Self {
        Self {
            success: true,
            code: code.to_string(),
            message: message.to_string(),
            data: None,
        }
    }
}
