//! 集成测试公共设施
//!
//! 内存存储 + 记录回复的社交平台客户端，驱动完整发放管道

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use mint_drop::clients::{SearchQuery, SearchResults, SocialClient};
use mint_drop::error::{DropError, ExternalFailure, Result};
use mint_drop::ingest::{PollWorker, WebhookProcessor};
use mint_drop::lease::LeaseManager;
use mint_drop::models::{NewMintLink, Project, ProjectDraft, SocialPost, compare_post_ids};
use mint_drop::reply::{ReplyDispatcher, TemplateEngine};
use mint_drop::repository::{MemoryStore, ProjectStore, ReservationStore};
use mint_drop::service::{AdminService, DeliveryPipeline};
use mint_drop::state::AppState;
use mint_drop_shared::config::PollerConfig;

pub const ADMIN_KEY: &str = "test-admin-key";
pub const CONSUMER_SECRET: &str = "test-consumer-secret";

/// 已发送的回复
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReply {
    pub bot: String,
    pub in_reply_to: String,
    pub text: String,
}

/// 记录回复的社交平台客户端，搜索结果来自预置帖子
#[derive(Default)]
pub struct RecordingSocial {
    posts: Mutex<Vec<SocialPost>>,
    replies: Mutex<Vec<SentReply>>,
    /// 接下来需要失败的回复次数
    failures: Mutex<u32>,
    /// 没有回复凭证的机器人账号
    denied_bots: Mutex<HashSet<String>>,
}

impl RecordingSocial {
    pub fn publish(&self, post: SocialPost) {
        self.posts.lock().push(post);
    }

    pub fn fail_next_replies(&self, count: u32) {
        *self.failures.lock() = count;
    }

    pub fn deny_bot(&self, bot: &str) {
        self.denied_bots.lock().insert(bot.to_string());
    }

    pub fn replies(&self) -> Vec<SentReply> {
        self.replies.lock().clone()
    }

    pub fn replies_to(&self, post_id: &str) -> Vec<SentReply> {
        self.replies
            .lock()
            .iter()
            .filter(|r| r.in_reply_to == post_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SocialClient for RecordingSocial {
    async fn search_recent(&self, query: &SearchQuery) -> Result<SearchResults> {
        let tag = query
            .query
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        let posts = self
            .posts
            .lock()
            .iter()
            .filter(|p| p.text.to_lowercase().contains(&tag))
            .filter(|p| match &query.since_id {
                Some(since) => compare_post_ids(&p.id, since).is_gt(),
                None => true,
            })
            .filter(|p| match &query.until_id {
                Some(until) => compare_post_ids(&p.id, until).is_lt(),
                None => true,
            })
            .cloned()
            .collect();
        Ok(SearchResults {
            posts,
            truncated: false,
        })
    }

    async fn post_reply(&self, bot: &str, in_reply_to: &str, text: &str) -> Result<String> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(DropError::external(
                    "social",
                    ExternalFailure::RateLimited,
                    "HTTP 429",
                ));
            }
        }
        let mut replies = self.replies.lock();
        replies.push(SentReply {
            bot: bot.to_string(),
            in_reply_to: in_reply_to.to_string(),
            text: text.to_string(),
        });
        Ok(format!("reply-{}", replies.len()))
    }

    fn can_search(&self) -> bool {
        true
    }

    fn can_reply_as(&self, bot: &str) -> bool {
        !self.denied_bots.lock().contains(bot)
    }
}

/// 完整装配的测试环境
pub struct Harness {
    pub store: MemoryStore,
    pub social: Arc<RecordingSocial>,
    pub pipeline: Arc<DeliveryPipeline>,
    pub poller: Arc<PollWorker>,
    pub webhook: Arc<WebhookProcessor>,
    pub admin: Arc<AdminService>,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let shared = Arc::new(store.clone());
        let social = Arc::new(RecordingSocial::default());

        let dispatcher = ReplyDispatcher::new(
            social.clone(),
            shared.clone(),
            TemplateEngine::with_defaults(),
        );
        let pipeline = Arc::new(DeliveryPipeline::new(
            shared.clone(),
            shared.clone(),
            dispatcher,
        ));
        let leases = Arc::new(LeaseManager::new(
            None,
            shared.clone(),
            Duration::from_secs(60),
        ));
        let poller = Arc::new(PollWorker::new(
            shared.clone(),
            shared.clone(),
            social.clone(),
            pipeline.clone(),
            leases,
            &PollerConfig {
                pacing_ms: 0,
                ..Default::default()
            },
        ));
        let webhook = Arc::new(WebhookProcessor::new(
            shared.clone(),
            social.clone(),
            pipeline.clone(),
            Some(CONSUMER_SECRET.to_string()),
            Duration::from_secs(5),
        ));
        let admin = Arc::new(AdminService::new(
            shared.clone(),
            shared.clone(),
            shared,
            None,
        ));

        Self {
            store,
            social,
            pipeline,
            poller,
            webhook,
            admin,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.admin.clone(),
            self.webhook.clone(),
            self.poller.clone(),
            Some(ADMIN_KEY.to_string()),
        )
    }

    /// 创建并激活项目，导入 `links` 个领取链接与给定暗号
    pub async fn project(&self, draft: ProjectDraft, links: usize, codes: &[&str]) -> Project {
        let project = self.store.create_project(&draft).await.unwrap();
        self.store
            .set_project_active(project.id, true)
            .await
            .unwrap();

        let links: Vec<NewMintLink> = (1..=links)
            .map(|i| NewMintLink {
                qr_hash: format!("p{}h{}", project.id, i),
                claim_url: format!("https://poap.xyz/claim/p{}h{}", project.id, i),
            })
            .collect();
        self.store.import_links(project.id, &links).await.unwrap();

        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        self.store.add_codes(project.id, &codes).await.unwrap();

        self.store.get_project(project.id).await.unwrap().unwrap()
    }

    pub async fn active_projects(&self) -> Vec<Project> {
        self.store.list_active_projects().await.unwrap()
    }
}

pub fn draft(hashtag: &str) -> ProjectDraft {
    ProjectDraft {
        name: "Drop".to_string(),
        hashtag: hashtag.to_string(),
        bot_account: "dropbot".to_string(),
        ..Default::default()
    }
}

pub fn post(id: &str, author: &str, text: &str, has_photo: bool) -> SocialPost {
    post_at(id, author, text, has_photo, Utc::now())
}

pub fn post_at(
    id: &str,
    author: &str,
    text: &str,
    has_photo: bool,
    created_at: DateTime<Utc>,
) -> SocialPost {
    SocialPost {
        id: id.to_string(),
        text: text.to_string(),
        author_id: format!("uid-{}", author),
        author_username: author.to_string(),
        has_photo,
        created_at,
    }
}
