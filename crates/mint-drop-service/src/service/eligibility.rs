//! 资格判定
//!
//! 一个帖子可能同时命中多个共享话题标签的项目，每个项目独立判定。
//! 判定顺序：暗号（项目要求时）-> 图片（项目要求时）。

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::models::{Outcome, Project, SecretCode, SocialPost};
use crate::repository::ReservationStore;

/// 单个项目下的判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// 满足项目规则，携带命中的暗号（项目要求暗号时）
    Eligible { code: Option<String> },
    /// 不满足规则，携带拒绝结果
    Denied(Outcome),
}

/// 暗号扫描结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeMatch {
    /// 命中一个未使用的暗号
    Unused(String),
    /// 只命中已使用的暗号
    OnlyUsed,
    /// 没有命中任何暗号
    NoMatch,
}

/// 在帖子文本中扫描项目暗号（子串匹配，不区分大小写）
///
/// 未使用的暗号优先；多个未使用暗号同时命中时取最早创建的一个
pub fn find_code(text: &str, codes: &[SecretCode]) -> CodeMatch {
    let haystack = text.to_uppercase();
    let mut saw_used = false;

    for code in codes {
        let needle = code.code.trim().to_uppercase();
        if needle.is_empty() || !haystack.contains(&needle) {
            continue;
        }
        if !code.used {
            return CodeMatch::Unused(code.code.clone());
        }
        saw_used = true;
    }

    if saw_used {
        CodeMatch::OnlyUsed
    } else {
        CodeMatch::NoMatch
    }
}

/// 选出话题标签命中的激活项目
pub fn matching_projects<'a>(post: &SocialPost, projects: &'a [Project]) -> Vec<&'a Project> {
    let hashtags = post.hashtags();
    if hashtags.is_empty() {
        return Vec::new();
    }
    projects
        .iter()
        .filter(|p| p.active && hashtags.contains(&p.normalized_hashtag()))
        .collect()
}

pub struct EligibilityResolver {
    reservations: Arc<dyn ReservationStore>,
}

impl EligibilityResolver {
    pub fn new(reservations: Arc<dyn ReservationStore>) -> Self {
        Self { reservations }
    }

    /// 判定帖子在某个项目下是否满足规则
    pub async fn evaluate(&self, project: &Project, post: &SocialPost) -> Result<Eligibility> {
        let mut matched_code = None;

        if project.require_secret_code {
            let codes = self.reservations.list_codes(project.id).await?;
            match find_code(&post.text, &codes) {
                CodeMatch::Unused(code) => matched_code = Some(code),
                CodeMatch::OnlyUsed => {
                    debug!(post_id = %post.id, project_id = project.id, "暗号已被使用");
                    return Ok(Eligibility::Denied(Outcome::CodeAlreadyUsed));
                }
                CodeMatch::NoMatch => {
                    return Ok(Eligibility::Denied(Outcome::MissingCode));
                }
            }
        }

        if project.require_image && !post.has_photo {
            return Ok(Eligibility::Denied(Outcome::MissingImage));
        }

        Ok(Eligibility::Eligible { code: matched_code })
    }
}
