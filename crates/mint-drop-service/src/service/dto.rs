//! 服务层数据传输对象
//!
//! 管道处理报告、运行统计与管理接口请求

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Outcome, ProjectDraft};
use crate::reply::ReplyResult;

// ============================================================================
// 管道处理报告
// ============================================================================

/// 帖子在单个项目下的处理结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectOutcome {
    /// 未命中任何项目时为空
    pub project_id: Option<i64>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyResult>,
}

/// 单个帖子的处理报告
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostReport {
    pub post_id: String,
    pub outcomes: Vec<ProjectOutcome>,
    /// 单个项目处理中的系统错误（不影响其他项目）
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl PostReport {
    pub fn new(post_id: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
            ..Default::default()
        }
    }

    /// 是否调用过平台写接口
    pub fn dispatched_reply(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.reply.as_ref().is_some_and(ReplyResult::attempted))
    }

    /// 只包含某个结果
    pub fn only(&self, outcome: Outcome) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.outcome == outcome)
    }
}

/// 一次运行的汇总统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    /// 采集到的帖子数
    pub found: u32,
    /// 满足项目规则的 (post, project) 数
    pub eligible: u32,
    /// 发放成功且回复已送达
    pub delivered: u32,
    /// 拒绝类结果（缺暗号、缺图片、暗号已用、已领取、链接已发完）
    pub denied: u32,
    /// 回复失败或系统错误
    pub failed: u32,
    /// 未命中标签或此前已处理
    pub skipped: u32,
}

impl RunStats {
    /// 累加一个帖子的处理报告
    pub fn absorb(&mut self, report: &PostReport) {
        self.found += 1;
        self.failed += report.errors.len() as u32;

        for item in &report.outcomes {
            if item.outcome.is_eligible() {
                self.eligible += 1;
            }
            match item.outcome {
                Outcome::DroppedNoHashtagMatch | Outcome::AlreadyDelivered => self.skipped += 1,
                Outcome::Granted => {
                    if matches!(item.reply, Some(ReplyResult::Sent { .. })) {
                        self.delivered += 1;
                    }
                }
                _ => self.denied += 1,
            }
            if matches!(item.reply, Some(ReplyResult::Failed { .. })) {
                self.failed += 1;
            }
        }
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.found += other.found;
        self.eligible += other.eligible;
        self.delivered += other.delivered;
        self.denied += other.denied;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

// ============================================================================
// 管理接口请求
// ============================================================================

/// 创建/更新项目请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRequest {
    #[validate(length(min = 1, max = 200, message = "项目名称长度必须在1-200个字符之间"))]
    pub name: String,
    #[validate(length(min = 1, max = 100, message = "话题标签长度必须在1-100个字符之间"))]
    pub hashtag: String,
    pub event_id: Option<String>,
    pub event_secret: Option<String>,
    #[serde(default)]
    pub require_secret_code: bool,
    #[serde(default)]
    pub require_image: bool,
    #[serde(default)]
    pub allow_multiple_claims: bool,
    #[validate(length(min = 1, max = 100, message = "回复账号不能为空"))]
    pub bot_account: String,
    pub eligible_template: Option<String>,
    pub not_eligible_template: Option<String>,
    pub already_claimed_template: Option<String>,
    pub no_links_template: Option<String>,
}

impl From<ProjectRequest> for ProjectDraft {
    fn from(req: ProjectRequest) -> Self {
        ProjectDraft {
            name: req.name,
            hashtag: req.hashtag,
            event_id: req.event_id,
            event_secret: req.event_secret,
            require_secret_code: req.require_secret_code,
            require_image: req.require_image,
            allow_multiple_claims: req.allow_multiple_claims,
            bot_account: req.bot_account.trim().trim_start_matches('@').to_string(),
            eligible_template: req.eligible_template,
            not_eligible_template: req.not_eligible_template,
            already_claimed_template: req.already_claimed_template,
            no_links_template: req.no_links_template,
        }
    }
}

/// 激活/停用项目
#[derive(Debug, Clone, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

/// 添加指定暗号
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddCodesRequest {
    #[validate(length(min = 1, max = 10000, message = "单次添加数量必须在1-10000之间"))]
    pub codes: Vec<String>,
}

/// 批量生成暗号
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerateCodesRequest {
    #[validate(range(min = 1, max = 10000, message = "单次生成数量必须在1-10000之间"))]
    pub count: usize,
    #[validate(range(min = 4, max = 32, message = "暗号长度必须在4-32之间"))]
    #[serde(default = "default_code_length")]
    pub length: usize,
}

fn default_code_length() -> usize {
    6
}

/// 导入领取链接
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImportLinksRequest {
    #[validate(length(min = 1, max = 10000, message = "单次导入数量必须在1-10000之间"))]
    pub claim_urls: Vec<String>,
}

/// 为受益人领取链接
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClaimLinkRequest {
    #[validate(length(min = 3, max = 200, message = "受益人地址长度必须在3-200之间"))]
    pub beneficiary: String,
}

/// 导入/同步结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// 提交的条目数
    pub submitted: u64,
    /// 新增的条目数
    pub inserted: u64,
    /// 无法解析而跳过的条目数
    pub rejected: u64,
    /// 同步时新标记为已领取的链接数
    pub marked_claimed: u64,
}
