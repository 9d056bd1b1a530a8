//! 活动项目实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::TemplateKind;

/// 活动项目
///
/// 一个项目对应一个话题标签、一组暗号与一池领取链接
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub name: String,
    /// 话题标签，存储时不含 `#`
    pub hashtag: String,
    /// 发行方活动 ID（同步链接时使用）
    #[sqlx(default)]
    pub event_id: Option<String>,
    #[sqlx(default)]
    #[serde(skip_serializing)]
    pub event_secret: Option<String>,
    pub require_secret_code: bool,
    pub require_image: bool,
    pub allow_multiple_claims: bool,
    pub active: bool,
    /// 负责回复的机器人账号
    pub bot_account: String,
    #[sqlx(default)]
    pub eligible_template: Option<String>,
    #[sqlx(default)]
    pub not_eligible_template: Option<String>,
    #[sqlx(default)]
    pub already_claimed_template: Option<String>,
    #[sqlx(default)]
    pub no_links_template: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// 项目自身配置的模板，空字符串视为未配置
    pub fn template(&self, kind: TemplateKind) -> Option<&str> {
        let template = match kind {
            TemplateKind::Eligible => self.eligible_template.as_deref(),
            TemplateKind::NotEligible => self.not_eligible_template.as_deref(),
            TemplateKind::AlreadyClaimed => self.already_claimed_template.as_deref(),
            TemplateKind::NoLinksAvailable => self.no_links_template.as_deref(),
        };
        template.filter(|t| !t.trim().is_empty())
    }

    /// 匹配时使用的标签形式：去掉 `#`、转小写
    pub fn normalized_hashtag(&self) -> String {
        normalize_hashtag(&self.hashtag)
    }
}

/// 规范化话题标签
pub fn normalize_hashtag(raw: &str) -> String {
    raw.trim().trim_start_matches('#').to_lowercase()
}

/// 创建/更新项目时写入的字段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDraft {
    pub name: String,
    pub hashtag: String,
    pub event_id: Option<String>,
    pub event_secret: Option<String>,
    pub require_secret_code: bool,
    pub require_image: bool,
    pub allow_multiple_claims: bool,
    pub bot_account: String,
    pub eligible_template: Option<String>,
    pub not_eligible_template: Option<String>,
    pub already_claimed_template: Option<String>,
    pub no_links_template: Option<String>,
}

#[cfg(test)]
pub(crate) fn sample_project(id: i64, hashtag: &str) -> Project {
    let now = Utc::now();
    Project {
        id,
        name: format!("Project {}", id),
        hashtag: hashtag.to_string(),
        event_id: None,
        event_secret: None,
        require_secret_code: false,
        require_image: false,
        allow_multiple_claims: false,
        active: true,
        bot_account: "dropbot".to_string(),
        eligible_template: None,
        not_eligible_template: None,
        already_claimed_template: None,
        no_links_template: None,
        created_at: now,
        updated_at: now,
    }
}
