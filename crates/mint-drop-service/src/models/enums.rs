//! 发放服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 帖子在某个项目下的最终处理结果
///
/// 每个 (post, project) 恰好到达一个终态；拒绝类结果是正常业务分支，不是错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Outcome {
    /// 没有匹配任何激活项目的话题标签，静默丢弃
    DroppedNoHashtagMatch,
    /// 项目要求暗号但帖子中没有
    MissingCode,
    /// 项目要求图片但帖子没有附带图片
    MissingImage,
    /// 暗号已被其他帖子使用
    CodeAlreadyUsed,
    /// 该帖子此前已获得发放（或已被回复），不再回复
    AlreadyDelivered,
    /// 该用户在此项目下已领取过
    UserAlreadyClaimed,
    /// 领取链接已发完
    NoLinksAvailable,
    /// 发放成功
    Granted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DroppedNoHashtagMatch => "dropped_no_hashtag_match",
            Self::MissingCode => "missing_code",
            Self::MissingImage => "missing_image",
            Self::CodeAlreadyUsed => "code_already_used",
            Self::AlreadyDelivered => "already_delivered",
            Self::UserAlreadyClaimed => "user_already_claimed",
            Self::NoLinksAvailable => "no_links_available",
            Self::Granted => "granted",
        }
    }

    /// 该结果对应的回复模板，None 表示不回复
    pub fn template_kind(&self) -> Option<TemplateKind> {
        match self {
            Self::MissingCode | Self::MissingImage | Self::CodeAlreadyUsed => {
                Some(TemplateKind::NotEligible)
            }
            Self::UserAlreadyClaimed => Some(TemplateKind::AlreadyClaimed),
            Self::NoLinksAvailable => Some(TemplateKind::NoLinksAvailable),
            Self::Granted => Some(TemplateKind::Eligible),
            Self::DroppedNoHashtagMatch | Self::AlreadyDelivered => None,
        }
    }

    /// 是否满足项目规则（暗号与图片）
    pub fn is_eligible(&self) -> bool {
        matches!(
            self,
            Self::Granted | Self::NoLinksAvailable | Self::UserAlreadyClaimed
        )
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 回复状态
///
/// processed_posts: none -> sending -> sent | failed（failed 可重新进入 sending）
/// deliveries: pending -> sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ReplyState {
    #[default]
    None,
    Pending,
    Sending,
    Sent,
    Failed,
}

impl ReplyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// 已回复或正在回复，不允许再次发起
    pub fn is_answered(&self) -> bool {
        matches!(self, Self::Sending | Self::Sent)
    }
}

/// 回复模板类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// 发放成功，包含领取链接
    Eligible,
    /// 不满足条件（缺暗号、缺图片、暗号已用）
    NotEligible,
    /// 用户已领取过
    AlreadyClaimed,
    /// 链接已发完
    NoLinksAvailable,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eligible => "eligible",
            Self::NotEligible => "not_eligible",
            Self::AlreadyClaimed => "already_claimed",
            Self::NoLinksAvailable => "no_links_available",
        }
    }
}

/// 帖子来源通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestChannel {
    /// 实时推送（Webhook）
    Push,
    /// 定时搜索
    Poll,
    /// 管理端手动触发的搜索
    Manual,
}

impl IngestChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Poll => "poll",
            Self::Manual => "manual",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_template_mapping() {
        assert_eq!(Outcome::Granted.template_kind(), Some(TemplateKind::Eligible));
        assert_eq!(Outcome::MissingCode.template_kind(), Some(TemplateKind::NotEligible));
        assert_eq!(Outcome::MissingImage.template_kind(), Some(TemplateKind::NotEligible));
        assert_eq!(Outcome::CodeAlreadyUsed.template_kind(), Some(TemplateKind::NotEligible));
        assert_eq!(
            Outcome::UserAlreadyClaimed.template_kind(),
            Some(TemplateKind::AlreadyClaimed)
        );
        assert_eq!(
            Outcome::NoLinksAvailable.template_kind(),
            Some(TemplateKind::NoLinksAvailable)
        );
        assert_eq!(Outcome::AlreadyDelivered.template_kind(), None);
        assert_eq!(Outcome::DroppedNoHashtagMatch.template_kind(), None);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::CodeAlreadyUsed).unwrap();
        assert_eq!(json, "\"code_already_used\"");
        assert_eq!(Outcome::CodeAlreadyUsed.as_str(), "code_already_used");

        let parsed: Outcome = serde_json::from_str("\"no_links_available\"").unwrap();
        assert_eq!(parsed, Outcome::NoLinksAvailable);
    }

    #[test]
    fn test_reply_state() {
        assert!(ReplyState::Sent.is_answered());
        assert!(ReplyState::Sending.is_answered());
        assert!(!ReplyState::Failed.is_answered());
        assert!(!ReplyState::None.is_answered());
        assert_eq!(ReplyState::default(), ReplyState::None);
    }
}
