//! 回复发送
//!
//! 发送前在存储层原子认领回复权（none/failed -> sending），
//! 成功后标记 sent，失败后标记 failed 以便重新采集时重试。
//! 外部回复失败只影响当前帖子，不会向上抛出。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use mint_drop_shared::observability::metrics::record_reply;

use super::template::{ReplyContext, TemplateEngine};
use crate::clients::SocialClient;
use crate::error::Result;
use crate::models::{Project, SocialPost, TemplateKind};
use crate::repository::DeliveryLedger;

/// 单次回复结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyResult {
    Sent { reply_id: String },
    /// 已回复或有其他调用者正在回复
    AlreadyAnswered,
    Failed { reason: String, retryable: bool },
}

impl ReplyResult {
    /// 是否实际调用了平台写接口（用于轮询节流）
    pub fn attempted(&self) -> bool {
        matches!(self, Self::Sent { .. } | Self::Failed { .. })
    }
}

pub struct ReplyDispatcher {
    social: Arc<dyn SocialClient>,
    ledger: Arc<dyn DeliveryLedger>,
    templates: TemplateEngine,
}

impl ReplyDispatcher {
    pub fn new(
        social: Arc<dyn SocialClient>,
        ledger: Arc<dyn DeliveryLedger>,
        templates: TemplateEngine,
    ) -> Self {
        Self {
            social,
            ledger,
            templates,
        }
    }

    /// 渲染项目模板并回复帖子
    ///
    /// 缺少回复凭证属于配置错误，返回 Err 由调用方中止整批处理
    #[instrument(
        skip(self, project, post, claim_url),
        fields(post_id = %post.id, project_id = project.id, template = kind.as_str())
    )]
    pub async fn dispatch(
        &self,
        project: &Project,
        post: &SocialPost,
        kind: TemplateKind,
        claim_url: Option<&str>,
    ) -> Result<ReplyResult> {
        if !self
            .ledger
            .claim_reply(&post.id, project.id, &post.author_id)
            .await?
        {
            debug!("帖子已回复或正在回复，跳过");
            record_reply(kind.as_str(), "skipped");
            return Ok(ReplyResult::AlreadyAnswered);
        }

        let mut context = ReplyContext::new(&post.author_username, project);
        if let Some(url) = claim_url {
            context = context.with_claim_url(url);
        }
        let text = self.templates.render_for(project, kind, &context);

        match self
            .social
            .post_reply(&project.bot_account, &post.id, &text)
            .await
        {
            Ok(reply_id) => {
                self.ledger
                    .complete_reply(&post.id, project.id, &reply_id)
                    .await?;
                info!(reply_id = %reply_id, "回复已发送");
                record_reply(kind.as_str(), "sent");
                Ok(ReplyResult::Sent { reply_id })
            }
            Err(e) => {
                self.ledger
                    .fail_reply(&post.id, project.id, &e.to_string())
                    .await?;
                record_reply(kind.as_str(), "failed");

                if e.is_configuration() {
                    error!(error = %e, bot = %project.bot_account, "回复凭证缺失");
                    return Err(e);
                }
                warn!(error = %e, retryable = e.is_retryable(), "回复发送失败");
                Ok(ReplyResult::Failed {
                    reason: e.to_string(),
                    retryable: e.is_retryable(),
                })
            }
        }
    }
}
