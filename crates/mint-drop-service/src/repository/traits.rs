//! 存储 Trait 定义
//!
//! 服务层只依赖这些抽象。每个条件写操作（暗号消费、链接预留、回复认领）
//! 都必须在存储层一次性原子完成，禁止"先读再判断再写"的两段式实现。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{
    Delivery, MintLink, NewMintLink, Outcome, PoolStats, ProcessedPost, Project, ProjectDraft,
    SecretCode,
};

/// 一次发放请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub post_id: String,
    pub project_id: i64,
    pub user_id: String,
    pub username: String,
    /// 需要消费的暗号（项目要求暗号时必填）
    pub code: Option<String>,
    /// 项目不允许同一用户多次领取
    pub single_claim_per_user: bool,
}

/// 发放事务的结果
///
/// 除 `Granted` 外，其他分支都会回滚整个事务，不消耗任何资源
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GrantDecision {
    Granted(Delivery),
    AlreadyDelivered(Delivery),
    UserAlreadyClaimed,
    CodeAlreadyUsed,
    NoLinksAvailable,
}

impl GrantDecision {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Granted(_) => Outcome::Granted,
            Self::AlreadyDelivered(_) => Outcome::AlreadyDelivered,
            Self::UserAlreadyClaimed => Outcome::UserAlreadyClaimed,
            Self::CodeAlreadyUsed => Outcome::CodeAlreadyUsed,
            Self::NoLinksAvailable => Outcome::NoLinksAvailable,
        }
    }
}

/// 项目存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn list_active_projects(&self) -> Result<Vec<Project>>;
    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn get_project(&self, id: i64) -> Result<Option<Project>>;
    async fn create_project(&self, draft: &ProjectDraft) -> Result<Project>;
    async fn update_project(&self, id: i64, draft: &ProjectDraft) -> Result<Option<Project>>;
    async fn set_project_active(&self, id: i64, active: bool) -> Result<bool>;
}

/// 资源池存储：暗号与领取链接
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReservationStore: Send + Sync {
    // 暗号池
    async fn add_codes(&self, project_id: i64, codes: &[String]) -> Result<u64>;
    async fn list_codes(&self, project_id: i64) -> Result<Vec<SecretCode>>;

    /// 条件消费暗号：仅当未使用时标记为已使用，返回是否由本次调用消费成功
    async fn consume_code(&self, project_id: i64, code: &str, user_id: &str) -> Result<bool>;

    // 链接池
    async fn import_links(&self, project_id: i64, links: &[NewMintLink]) -> Result<u64>;
    async fn list_links(&self, project_id: i64) -> Result<Vec<MintLink>>;

    /// 按插入顺序预留最早的可用链接，选择与标记在同一原子操作内完成
    async fn reserve_link(&self, project_id: i64, user_id: &str) -> Result<Option<MintLink>>;

    /// 标记链接已被领取，并同步对应发放记录的 claimed 状态
    async fn mark_links_claimed(&self, project_id: i64, qr_hashes: &[String]) -> Result<u64>;

    /// 记录单个链接由谁领取
    async fn mark_link_claimed_by(&self, link_id: i64, claimed_by: &str)
    -> Result<Option<MintLink>>;

    async fn get_link(&self, link_id: i64) -> Result<Option<MintLink>>;
    async fn pool_stats(&self, project_id: i64) -> Result<PoolStats>;

    /// 发放事务
    ///
    /// 在同一原子单元内完成：发放记录查重、用户查重、暗号消费、链接预留、写入发放记录。
    async fn grant(&self, request: &GrantRequest) -> Result<GrantDecision>;
}

/// 发放记录与帖子处理审计
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn find_delivery(&self, post_id: &str, project_id: i64) -> Result<Option<Delivery>>;
    async fn user_has_delivery(&self, project_id: i64, user_id: &str) -> Result<bool>;
    async fn list_deliveries(&self, project_id: i64, limit: i64) -> Result<Vec<Delivery>>;

    async fn get_processed(&self, post_id: &str, project_id: i64)
    -> Result<Option<ProcessedPost>>;

    /// 记录评估结果；新结果为 already_delivered 时保留原有结果
    async fn record_evaluation(
        &self,
        post_id: &str,
        project_id: i64,
        user_id: &str,
        outcome: Outcome,
    ) -> Result<()>;

    /// 原子认领回复权：仅当 reply_state 为 none 或 failed 时转为 sending
    async fn claim_reply(&self, post_id: &str, project_id: i64, user_id: &str) -> Result<bool>;

    /// 回复成功：审计记录与发放记录同时标记为 sent
    async fn complete_reply(&self, post_id: &str, project_id: i64, reply_id: &str) -> Result<()>;

    /// 回复失败：释放认领，允许后续重新采集时重试
    async fn fail_reply(&self, post_id: &str, project_id: i64, error: &str) -> Result<()>;
}

/// 轮询高水位存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get_cursor(&self, scope: &str) -> Result<Option<String>>;

    /// 仅当新 ID 数值上更大时推进
    async fn advance_cursor(&self, scope: &str, since_id: &str) -> Result<()>;
}

/// 运行租约存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// 获取租约；已被他人持有且未过期时返回 false
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// 释放租约；仅持有者可释放
    async fn release(&self, key: &str, owner: &str) -> Result<bool>;
}
