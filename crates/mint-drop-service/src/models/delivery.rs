//! 发放记录与帖子处理审计

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{Outcome, ReplyState};

/// 发放记录
///
/// (post_id, project_id) 唯一，是整条管道的幂等键。
/// 链接本身的 claimed/reserved 状态以 mint_links 为准，这里按值保存链接信息。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: i64,
    pub post_id: String,
    pub project_id: i64,
    pub user_id: String,
    pub username: String,
    pub mint_link_id: i64,
    pub claim_url: String,
    #[sqlx(default)]
    pub secret_code: Option<String>,
    /// pending：链接已发放但回复尚未成功
    pub reply_state: ReplyState,
    #[sqlx(default)]
    pub reply_id: Option<String>,
    pub delivered_at: DateTime<Utc>,
    pub claimed: bool,
    #[sqlx(default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Delivery {
    pub fn reply_pending(&self) -> bool {
        self.reply_state != ReplyState::Sent
    }
}

/// 帖子处理审计
///
/// 记录每个 (post, project) 的评估结果和回复状态
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedPost {
    pub post_id: String,
    pub project_id: i64,
    pub user_id: String,
    pub outcome: Outcome,
    pub eligible: bool,
    pub reply_state: ReplyState,
    #[sqlx(default)]
    pub reply_id: Option<String>,
    #[sqlx(default)]
    pub last_error: Option<String>,
    pub evaluated_at: DateTime<Utc>,
    #[sqlx(default)]
    pub replied_at: Option<DateTime<Utc>>,
}
