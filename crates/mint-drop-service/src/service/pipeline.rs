//! 发放管道
//!
//! 采集通道 -> 资格判定 -> 发放事务 -> 回复。两条采集通道共用这一条管道，
//! 幂等性由发放记录（post + project 唯一）和回复认领保证，采集通道本身不做去重。
//!
//! 每个 (post, project) 恰好到达一个终态，单次调用内不重试；
//! 重试只通过重新采集发生，并被上述幂等检查吸收。

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use mint_drop_shared::observability::metrics::record_post_outcome;

use super::dto::{PostReport, ProjectOutcome};
use super::eligibility::{Eligibility, EligibilityResolver, matching_projects};
use crate::error::Result;
use crate::models::{IngestChannel, Outcome, Project, SocialPost, TemplateKind};
use crate::reply::{ReplyDispatcher, ReplyResult};
use crate::repository::{DeliveryLedger, GrantDecision, GrantRequest, ReservationStore};

/// 单个项目的处理结果
struct Handled {
    item: ProjectOutcome,
    /// 帖子满足该项目规则或已在该项目下发放
    claimed: bool,
    /// 缺暗号的回复尚未发出
    deferred: bool,
}

impl Handled {
    fn claimed(item: ProjectOutcome) -> Self {
        Self {
            item,
            claimed: true,
            deferred: false,
        }
    }
}

pub struct DeliveryPipeline {
    reservations: Arc<dyn ReservationStore>,
    ledger: Arc<dyn DeliveryLedger>,
    resolver: EligibilityResolver,
    dispatcher: ReplyDispatcher,
}

impl DeliveryPipeline {
    pub fn new(
        reservations: Arc<dyn ReservationStore>,
        ledger: Arc<dyn DeliveryLedger>,
        dispatcher: ReplyDispatcher,
    ) -> Self {
        Self {
            resolver: EligibilityResolver::new(reservations.clone()),
            reservations,
            ledger,
            dispatcher,
        }
    }

    /// 处理单个帖子
    ///
    /// 单个项目中的系统错误记录在报告里，不影响其他项目；
    /// 配置错误（如回复凭证缺失）直接返回，由调用方中止整批处理
    #[instrument(skip(self, post, projects), fields(post_id = %post.id, channel = channel.as_str()))]
    pub async fn process_post(
        &self,
        post: &SocialPost,
        projects: &[Project],
        channel: IngestChannel,
    ) -> Result<PostReport> {
        let started = Instant::now();
        let mut report = PostReport::new(&post.id);

        let matched = matching_projects(post, projects);
        if matched.is_empty() {
            debug!("未命中任何项目话题标签，丢弃");
            record_post_outcome(
                channel.as_str(),
                Outcome::DroppedNoHashtagMatch.as_str(),
                started.elapsed().as_secs_f64(),
            );
            report.outcomes.push(ProjectOutcome {
                project_id: None,
                outcome: Outcome::DroppedNoHashtagMatch,
                reply: None,
            });
            return Ok(report);
        }

        // 多个项目共享标签时，缺暗号的回复等所有项目处理完再决定
        let defer_missing_code = matched.len() > 1;
        let mut claimed = false;
        let mut deferred: Vec<(usize, &Project)> = Vec::new();

        for project in matched {
            let project_started = Instant::now();
            match self
                .process_for_project(project, post, defer_missing_code)
                .await
            {
                Ok(handled) => {
                    record_post_outcome(
                        channel.as_str(),
                        handled.item.outcome.as_str(),
                        project_started.elapsed().as_secs_f64(),
                    );
                    claimed |= handled.claimed;
                    if handled.deferred {
                        deferred.push((report.outcomes.len(), project));
                    }
                    report.outcomes.push(handled.item);
                }
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => {
                    error!(project_id = project.id, error = %e, "帖子处理失败");
                    report.errors.push(format!("project {}: {}", project.id, e));
                }
            }
        }

        for (index, project) in deferred {
            if claimed {
                debug!(project_id = project.id, "帖子已被同标签的其他项目认领，不回复缺暗号");
                continue;
            }
            match self
                .dispatcher
                .dispatch(project, post, TemplateKind::NotEligible, None)
                .await
            {
                Ok(reply) => report.outcomes[index].reply = Some(reply),
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => {
                    error!(project_id = project.id, error = %e, "缺暗号回复失败");
                    report.errors.push(format!("project {}: {}", project.id, e));
                }
            }
        }

        Ok(report)
    }

    /// 单个项目下的处理流程
    async fn process_for_project(
        &self,
        project: &Project,
        post: &SocialPost,
        defer_missing_code: bool,
    ) -> Result<Handled> {
        // 1. 已有发放记录：回复已送达则终止；回复未送达则补发，不再预留新链接
        if let Some(delivery) = self.ledger.find_delivery(&post.id, project.id).await? {
            let item = if delivery.reply_pending() {
                info!(project_id = project.id, "发放记录的回复未送达，补发");
                self.reply_for_grant(project, post, &delivery.claim_url)
                    .await?
            } else {
                self.finish(project, post, Outcome::AlreadyDelivered, None)
                    .await?
            };
            return Ok(Handled::claimed(item));
        }

        // 2. 此前已回复过（拒绝类结果）
        if let Some(processed) = self.ledger.get_processed(&post.id, project.id).await?
            && processed.reply_state.is_answered()
        {
            debug!(project_id = project.id, "帖子此前已回复");
            let item = self
                .finish(project, post, Outcome::AlreadyDelivered, None)
                .await?;
            return Ok(Handled {
                item,
                claimed: processed.eligible,
                deferred: false,
            });
        }

        // 3. 资格判定
        let code = match self.resolver.evaluate(project, post).await? {
            Eligibility::Eligible { code } => code,
            Eligibility::Denied(Outcome::MissingCode) if defer_missing_code => {
                self.ledger
                    .record_evaluation(&post.id, project.id, &post.author_id, Outcome::MissingCode)
                    .await?;
                return Ok(Handled {
                    item: ProjectOutcome {
                        project_id: Some(project.id),
                        outcome: Outcome::MissingCode,
                        reply: None,
                    },
                    claimed: false,
                    deferred: true,
                });
            }
            Eligibility::Denied(outcome) => {
                info!(project_id = project.id, outcome = %outcome, "帖子不满足项目规则");
                let item = self.finish(project, post, outcome, None).await?;
                return Ok(Handled {
                    item,
                    claimed: false,
                    deferred: false,
                });
            }
        };

        let item = self.grant_for_project(project, post, code).await?;
        Ok(Handled::claimed(item))
    }

    /// 满足规则后的领取检查与发放事务
    async fn grant_for_project(
        &self,
        project: &Project,
        post: &SocialPost,
        code: Option<String>,
    ) -> Result<ProjectOutcome> {
        // 4. 用户已领取的快速判断，最终以发放事务内的检查为准
        if !project.allow_multiple_claims
            && self
                .ledger
                .user_has_delivery(project.id, &post.author_id)
                .await?
        {
            return self
                .finish(project, post, Outcome::UserAlreadyClaimed, None)
                .await;
        }

        // 5. 发放事务
        let request = GrantRequest {
            post_id: post.id.clone(),
            project_id: project.id,
            user_id: post.author_id.clone(),
            username: post.author_username.clone(),
            code,
            single_claim_per_user: !project.allow_multiple_claims,
        };
        match self.reservations.grant(&request).await? {
            GrantDecision::Granted(delivery) => {
                info!(
                    project_id = project.id,
                    mint_link_id = delivery.mint_link_id,
                    "链接已发放"
                );
                self.reply_for_grant(project, post, &delivery.claim_url).await
            }
            // 并发的另一条采集通道已先完成发放，由它负责回复
            GrantDecision::AlreadyDelivered(_) => {
                self.finish(project, post, Outcome::AlreadyDelivered, None).await
            }
            denied => {
                let outcome = denied.outcome();
                info!(project_id = project.id, outcome = %outcome, "发放被拒绝");
                self.finish(project, post, outcome, None).await
            }
        }
    }

    /// 发放成功后的回复；回复权被他人持有时视为已处理
    async fn reply_for_grant(
        &self,
        project: &Project,
        post: &SocialPost,
        claim_url: &str,
    ) -> Result<ProjectOutcome> {
        let mut item = self
            .finish(project, post, Outcome::Granted, Some(claim_url))
            .await?;
        if item.reply == Some(ReplyResult::AlreadyAnswered) {
            item.outcome = Outcome::AlreadyDelivered;
        }
        Ok(item)
    }

    /// 记录评估结果，并按结果对应的模板回复
    async fn finish(
        &self,
        project: &Project,
        post: &SocialPost,
        outcome: Outcome,
        claim_url: Option<&str>,
    ) -> Result<ProjectOutcome> {
        self.ledger
            .record_evaluation(&post.id, project.id, &post.author_id, outcome)
            .await?;

        let reply = match outcome.template_kind() {
            Some(kind) => {
                if kind == TemplateKind::Eligible && claim_url.is_none() {
                    warn!(project_id = project.id, "发放结果缺少领取链接，跳过回复");
                    None
                } else {
                    Some(
                        self.dispatcher
                            .dispatch(project, post, kind, claim_url)
                            .await?,
                    )
                }
            }
            None => None,
        };

        Ok(ProjectOutcome {
            project_id: Some(project.id),
            outcome,
            reply,
        })
    }
}
