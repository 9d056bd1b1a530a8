//! 资源池实体：一次性暗号与领取链接

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一次性暗号
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SecretCode {
    pub id: i64,
    pub project_id: i64,
    pub code: String,
    pub used: bool,
    #[sqlx(default)]
    pub used_by: Option<String>,
    #[sqlx(default)]
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 领取链接
///
/// 状态：available（未领取、未预留）-> reserved（reserved_for 已设置）-> claimed（终态）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MintLink {
    pub id: i64,
    pub project_id: i64,
    pub qr_hash: String,
    pub claim_url: String,
    pub claimed: bool,
    #[sqlx(default)]
    pub reserved_for: Option<String>,
    #[sqlx(default)]
    pub reserved_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub claimed_by: Option<String>,
    #[sqlx(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MintLink {
    pub fn is_available(&self) -> bool {
        !self.claimed && self.reserved_for.is_none()
    }
}

/// 待导入的链接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMintLink {
    pub qr_hash: String,
    pub claim_url: String,
}

impl NewMintLink {
    /// 从领取地址提取 hash（取最后一段路径）
    pub fn from_claim_url(url: &str) -> Option<Self> {
        let trimmed = url.trim();
        let hash = trimmed
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(|s| s.split(['?', '#']).next().unwrap_or(s))
            .filter(|s| !s.is_empty() && !s.contains(':'))?;

        Some(Self {
            qr_hash: hash.to_string(),
            claim_url: trimmed.to_string(),
        })
    }
}

/// 资源池统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub links_total: i64,
    pub links_available: i64,
    pub links_reserved: i64,
    pub links_claimed: i64,
    pub codes_total: i64,
    pub codes_used: i64,
}
