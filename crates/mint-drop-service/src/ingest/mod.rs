//! 采集通道
//!
//! 推送与轮询两条通道共用同一条发放管道，幂等性由存储层保证

pub mod poller;
pub mod webhook;

pub use poller::PollWorker;
pub use webhook::{SIGNATURE_HEADER, WebhookOutcome, WebhookPayload, WebhookProcessor};

use crate::clients::SocialClient;
use crate::error::{DropError, Result};
use crate::models::Project;

/// 处理任何帖子之前确认每个激活项目的回复账号都已配置凭证
pub(crate) fn verify_reply_credentials(
    social: &dyn SocialClient,
    projects: &[Project],
) -> Result<()> {
    for project in projects {
        if !social.can_reply_as(&project.bot_account) {
            return Err(DropError::MissingCredential(format!(
                "项目 {} 的回复账号 {}",
                project.id, project.bot_account
            )));
        }
    }
    Ok(())
}
