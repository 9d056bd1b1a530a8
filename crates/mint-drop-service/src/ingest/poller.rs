//! 轮询通道
//!
//! 按固定间隔搜索所有激活项目的话题标签，以游标记录每个标签已处理到的最大帖子 ID。
//! 同一批帖子按发布时间从早到晚顺序处理，两次回复之间按配置节流。
//! 积压超过单批上限时只处理最早的一部分，游标停在已处理的位置，其余留给后续批次。
//!
//! 多实例部署时通过运行租约保证同一时刻只有一个批次在执行，批次执行中按 TTL 的三分之一续期。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use mint_drop_shared::config::PollerConfig;
use mint_drop_shared::observability::metrics::record_poll_run;

use crate::clients::{SearchQuery, SearchResults, SocialClient};
use super::verify_reply_credentials;
use crate::error::{DropError, Result};
use crate::lease::{LeaseGuard, LeaseManager, POLL_RUN_LEASE};
use crate::models::{IngestChannel, Project, SocialPost, sort_oldest_first};
use crate::reply::ReplyResult;
use crate::repository::{CursorStore, ProjectStore};
use crate::service::{DeliveryPipeline, PostReport, RunStats};

/// 单个标签的游标推进状态
#[derive(Debug, Default)]
struct CursorProgress {
    /// 可安全推进到的帖子 ID
    advance_to: Option<String>,
    /// 遇到需要重新采集的帖子后不再推进
    held: bool,
}

pub struct PollWorker {
    projects: Arc<dyn ProjectStore>,
    cursors: Arc<dyn CursorStore>,
    social: Arc<dyn SocialClient>,
    pipeline: Arc<DeliveryPipeline>,
    leases: Arc<LeaseManager>,
    interval: Duration,
    pacing: Duration,
    max_results: u32,
    max_posts_per_run: usize,
}

impl PollWorker {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        cursors: Arc<dyn CursorStore>,
        social: Arc<dyn SocialClient>,
        pipeline: Arc<DeliveryPipeline>,
        leases: Arc<LeaseManager>,
        config: &PollerConfig,
    ) -> Self {
        Self {
            projects,
            cursors,
            social,
            pipeline,
            leases,
            interval: Duration::from_secs(config.interval_secs),
            pacing: Duration::from_millis(config.pacing_ms),
            max_results: config.max_results,
            max_posts_per_run: config.max_posts_per_run.max(1),
        }
    }

    /// 游标作用域
    pub fn cursor_scope(hashtag: &str) -> String {
        format!("hashtag:{}", hashtag)
    }

    /// 主循环：按间隔持续执行批次直到进程退出
    pub async fn run(&self) {
        info!(
            interval = ?self.interval,
            pacing = ?self.pacing,
            max_results = self.max_results,
            max_posts_per_run = self.max_posts_per_run,
            "PollWorker 已启动"
        );

        loop {
            if let Err(e) = self.run_once(IngestChannel::Poll).await {
                if e.is_configuration() {
                    error!(error = %e, "轮询批次因配置错误中止");
                } else {
                    warn!(error = %e, "轮询批次执行失败");
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// 执行一个批次；租约被其他实例持有时返回 None
    #[instrument(skip(self), fields(channel = channel.as_str()))]
    pub async fn run_once(&self, channel: IngestChannel) -> Result<Option<RunStats>> {
        let Some(guard) = self.leases.try_acquire(POLL_RUN_LEASE).await? else {
            info!("其他实例正在执行批次，跳过本轮");
            record_poll_run("skipped");
            return Ok(None);
        };

        let result = self.run_batch(channel, &guard).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "释放运行租约失败");
        }

        match &result {
            Ok(stats) => {
                info!(
                    found = stats.found,
                    eligible = stats.eligible,
                    delivered = stats.delivered,
                    denied = stats.denied,
                    failed = stats.failed,
                    skipped = stats.skipped,
                    "批次执行完成"
                );
                record_poll_run("ok");
            }
            Err(e) if e.is_configuration() => record_poll_run("aborted"),
            Err(_) => record_poll_run("error"),
        }
        result.map(Some)
    }

    async fn run_batch(&self, channel: IngestChannel, guard: &LeaseGuard) -> Result<RunStats> {
        let projects = self.projects.list_active_projects().await?;
        if projects.is_empty() {
            return Err(DropError::NoActiveProject);
        }
        self.verify_credentials(&projects)?;

        let hashtags: BTreeSet<String> = projects.iter().map(Project::normalized_hashtag).collect();

        // post id -> 命中的标签
        let mut found_under: HashMap<String, Vec<String>> = HashMap::new();
        let mut posts: Vec<SocialPost> = Vec::new();
        for tag in &hashtags {
            let since_id = self.cursors.get_cursor(&Self::cursor_scope(tag)).await?;
            let results = self.collect_tag(tag, since_id).await?;
            debug!(hashtag = %tag, count = results.len(), "搜索完成");

            for post in results {
                let tags = found_under.entry(post.id.clone()).or_default();
                if tags.is_empty() {
                    posts.push(post);
                }
                tags.push(tag.clone());
            }
        }

        sort_oldest_first(&mut posts);
        if posts.len() > self.max_posts_per_run {
            info!(
                found = posts.len(),
                limit = self.max_posts_per_run,
                "帖子数超过单批上限，其余留给后续批次"
            );
            posts.truncate(self.max_posts_per_run);
        }

        let renew_every = self.leases.ttl() / 3;
        let mut renewed_at = Instant::now();
        let mut stats = RunStats::default();
        let mut progress: HashMap<String, CursorProgress> = HashMap::new();
        for post in &posts {
            if renewed_at.elapsed() >= renew_every {
                if !guard.renew().await? {
                    warn!(post_id = %post.id, "运行租约已失效，提前结束本批次");
                    break;
                }
                renewed_at = Instant::now();
            }

            let report = self.pipeline.process_post(post, &projects, channel).await?;
            stats.absorb(&report);

            let retry = needs_reingest(&report);
            for tag in found_under.get(&post.id).into_iter().flatten() {
                let entry = progress.entry(tag.clone()).or_default();
                if entry.held {
                    continue;
                }
                if retry {
                    entry.held = true;
                } else {
                    entry.advance_to = Some(post.id.clone());
                }
            }

            if report.dispatched_reply() && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        for (tag, entry) in progress {
            if let Some(id) = entry.advance_to {
                self.cursors
                    .advance_cursor(&Self::cursor_scope(&tag), &id)
                    .await?;
            }
        }

        Ok(stats)
    }

    /// 搜索单个标签游标之后的帖子
    ///
    /// 平台按从新到旧翻页，结果被翻页上限截断时以最早取回的帖子为界继续向前翻，
    /// 直到取回游标之后最早的帖子。只保留最早的 `max_posts_per_run` 个。
    async fn collect_tag(&self, tag: &str, since_id: Option<String>) -> Result<Vec<SocialPost>> {
        let mut collected: Vec<SocialPost> = Vec::new();
        let mut until_id: Option<String> = None;

        loop {
            let query = SearchQuery {
                query: format!("#{} -is:retweet", tag),
                since_id: since_id.clone(),
                until_id: until_id.clone(),
                max_results: self.max_results,
            };
            let results: SearchResults = self.social.search_recent(&query).await?;
            let oldest = results.oldest_id().map(str::to_string);
            let truncated = results.truncated;
            collected.extend(results.posts);
            sort_oldest_first(&mut collected);
            collected.truncate(self.max_posts_per_run);

            match oldest {
                Some(oldest) if truncated && until_id.as_deref() != Some(oldest.as_str()) => {
                    debug!(hashtag = %tag, until_id = %oldest, "搜索结果被截断，继续向前翻页");
                    until_id = Some(oldest);
                }
                _ => break,
            }
        }

        Ok(collected)
    }

    /// 批次开始前检查搜索凭证与每个项目的回复凭证
    fn verify_credentials(&self, projects: &[Project]) -> Result<()> {
        if !self.social.can_search() {
            return Err(DropError::MissingCredential("社交平台搜索凭证".to_string()));
        }
        verify_reply_credentials(self.social.as_ref(), projects)
    }
}

/// 系统错误或可重试的回复失败需要后续批次重新采集
fn needs_reingest(report: &PostReport) -> bool {
    !report.errors.is_empty()
        || report.outcomes.iter().any(|o| {
            matches!(
                o.reply,
                Some(ReplyResult::Failed {
                    retryable: true,
                    ..
                })
            )
        })
}
