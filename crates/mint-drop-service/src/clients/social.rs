//! 社交平台 API 客户端
//!
//! 读：按话题标签搜索最近帖子；写：以机器人账号回复帖子。
//! 搜索使用应用级 bearer token，回复使用各机器人账号的用户级 token。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use mint_drop_shared::config::SocialConfig;

use super::check_status;
use crate::error::{DropError, Result};
use crate::models::{SocialPost, compare_post_ids};

const SERVICE: &str = "social";

/// 单次搜索最多翻页数，防止异常情况下无限翻页
const MAX_SEARCH_PAGES: usize = 10;

/// 搜索请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    /// 仅返回 ID 大于该值的帖子
    pub since_id: Option<String>,
    /// 仅返回 ID 小于该值的帖子，用于向更早的帖子继续翻页
    pub until_id: Option<String>,
    pub max_results: u32,
}

/// 搜索结果，帖子按平台返回顺序（新的在前）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    pub posts: Vec<SocialPost>,
    /// 达到翻页上限时仍有更早的帖子未取回
    pub truncated: bool,
}

impl SearchResults {
    /// 本次取回的最早帖子 ID
    pub fn oldest_id(&self) -> Option<&str> {
        self.posts
            .iter()
            .map(|p| p.id.as_str())
            .min_by(|a, b| compare_post_ids(a, b))
    }
}

/// 社交平台客户端接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// 搜索最近帖子（自动翻页，最多 `MAX_SEARCH_PAGES` 页）
    async fn search_recent(&self, query: &SearchQuery) -> Result<SearchResults>;

    /// 以 `bot` 账号回复帖子，返回回复帖子的 ID
    async fn post_reply(&self, bot: &str, in_reply_to: &str, text: &str) -> Result<String>;

    /// 是否配置了搜索凭证
    fn can_search(&self) -> bool;

    /// 是否配置了该机器人账号的回复凭证
    fn can_reply_as(&self, bot: &str) -> bool;
}

/// 基于 v2 REST API 的客户端实现
pub struct HttpSocialClient {
    http: Client,
    api_base: String,
    app_bearer_token: Option<String>,
    bot_tokens: HashMap<String, String>,
}

impl HttpSocialClient {
    pub fn new(config: &SocialConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DropError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            app_bearer_token: config.app_bearer_token.clone(),
            // 账号名统一小写，配置中写 @DropBot 或 dropbot 都能匹配
            bot_tokens: config
                .bot_tokens
                .iter()
                .map(|(k, v)| (normalize_account(k), v.clone()))
                .collect(),
        })
    }

    fn bot_token(&self, bot: &str) -> Result<&str> {
        self.bot_tokens
            .get(&normalize_account(bot))
            .map(String::as_str)
            .ok_or_else(|| DropError::MissingCredential(format!("回复账号 {} 未配置 token", bot)))
    }
}

fn normalize_account(account: &str) -> String {
    account.trim().trim_start_matches('@').to_lowercase()
}

#[async_trait]
impl SocialClient for HttpSocialClient {
    #[instrument(skip(self), fields(query = %query.query))]
    async fn search_recent(&self, query: &SearchQuery) -> Result<SearchResults> {
        let token = self
            .app_bearer_token
            .as_deref()
            .ok_or_else(|| DropError::MissingCredential("搜索 bearer token 未配置".to_string()))?;

        let url = format!("{}/2/tweets/search/recent", self.api_base);
        let max_results = query.max_results.clamp(10, 100).to_string();
        let mut results = SearchResults::default();
        let mut next_token: Option<String> = None;

        for page in 0..MAX_SEARCH_PAGES {
            let mut params: Vec<(&str, &str)> = vec![
                ("query", query.query.as_str()),
                ("max_results", max_results.as_str()),
                ("tweet.fields", "created_at,author_id,attachments"),
                ("expansions", "author_id,attachments.media_keys"),
                ("user.fields", "username"),
                ("media.fields", "type"),
            ];
            if let Some(since_id) = &query.since_id {
                params.push(("since_id", since_id.as_str()));
            }
            if let Some(until_id) = &query.until_id {
                params.push(("until_id", until_id.as_str()));
            }
            if let Some(cursor) = &next_token {
                params.push(("next_token", cursor.as_str()));
            }

            let response = self
                .http
                .get(&url)
                .bearer_auth(token)
                .query(&params)
                .send()
                .await?;
            let page_body: SearchResponse = check_status(SERVICE, response).await?.json().await?;

            let next = page_body.meta.as_ref().and_then(|m| m.next_token.clone());
            let found = page_body.into_posts();
            debug!(page, count = found.len(), "搜索结果页");
            results.posts.extend(found);

            let Some(cursor) = next else {
                break;
            };
            if page + 1 == MAX_SEARCH_PAGES {
                warn!(pages = MAX_SEARCH_PAGES, "搜索结果达到翻页上限，仍有更早的帖子");
                results.truncated = true;
            }
            next_token = Some(cursor);
        }

        Ok(results)
    }

    #[instrument(skip(self, text), fields(in_reply_to = %in_reply_to))]
    async fn post_reply(&self, bot: &str, in_reply_to: &str, text: &str) -> Result<String> {
        let token = self.bot_token(bot)?;
        let body = CreatePostRequest {
            text,
            reply: ReplyTarget {
                in_reply_to_tweet_id: in_reply_to,
            },
        };

        let response = self
            .http
            .post(format!("{}/2/tweets", self.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let created: CreatePostResponse = check_status(SERVICE, response).await?.json().await?;

        Ok(created.data.id)
    }

    fn can_search(&self) -> bool {
        self.app_bearer_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    fn can_reply_as(&self, bot: &str) -> bool {
        self.bot_token(bot).is_ok_and(|t| !t.is_empty())
    }
}

// ============================================================================
// 线上数据结构
// ============================================================================

#[derive(Debug, Serialize)]
struct CreatePostRequest<'a> {
    text: &'a str,
    reply: ReplyTarget<'a>,
}

#[derive(Debug, Serialize)]
struct ReplyTarget<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatePostResponse {
    data: CreatedPost,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<ApiPost>,
    #[serde(default)]
    includes: Includes,
    meta: Option<SearchMeta>,
}

#[derive(Debug, Deserialize)]
struct ApiPost {
    id: String,
    text: String,
    author_id: String,
    created_at: DateTime<Utc>,
    attachments: Option<Attachments>,
}

#[derive(Debug, Default, Deserialize)]
struct Attachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<ApiUser>,
    #[serde(default)]
    media: Vec<ApiMedia>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct ApiMedia {
    media_key: String,
    #[serde(rename = "type")]
    media_type: String,
}

#[derive(Debug, Deserialize)]
struct SearchMeta {
    next_token: Option<String>,
}

impl SearchResponse {
    /// 通过 includes 关联作者用户名与媒体类型
    fn into_posts(self) -> Vec<SocialPost> {
        let users: HashMap<&str, &str> = self
            .includes
            .users
            .iter()
            .map(|u| (u.id.as_str(), u.username.as_str()))
            .collect();
        let photos: Vec<&str> = self
            .includes
            .media
            .iter()
            .filter(|m| m.media_type == "photo")
            .map(|m| m.media_key.as_str())
            .collect();

        self.data
            .iter()
            .map(|post| {
                let has_photo = post
                    .attachments
                    .as_ref()
                    .is_some_and(|a| a.media_keys.iter().any(|k| photos.contains(&k.as_str())));
                SocialPost {
                    id: post.id.clone(),
                    text: post.text.clone(),
                    author_id: post.author_id.clone(),
                    author_username: users
                        .get(post.author_id.as_str())
                        .map(|u| u.to_string())
                        .unwrap_or_default(),
                    has_photo,
                    created_at: post.created_at,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_bot() -> SocialConfig {
        let mut config = SocialConfig {
            app_bearer_token: Some("app-token".to_string()),
            ..Default::default()
        };
        config
            .bot_tokens
            .insert("@DropBot".to_string(), "bot-token".to_string());
        config
    }

    #[test]
    fn test_credentials_lookup() {
        let client = HttpSocialClient::new(&config_with_bot()).unwrap();
        assert!(client.can_search());
        assert!(client.can_reply_as("dropbot"));
        assert!(client.can_reply_as("@DROPBOT"));
        assert!(!client.can_reply_as("otherbot"));

        let err = client.bot_token("otherbot").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_search_token() {
        let client = HttpSocialClient::new(&SocialConfig::default()).unwrap();
        assert!(!client.can_search());
    }

    #[test]
    fn test_search_response_joins_includes() {
        let raw = r##"{
            "data": [
                {"id": "101", "text": "claim #drop AB3K9", "author_id": "u1",
                 "created_at": "2026-03-01T10:00:00.000Z",
                 "attachments": {"media_keys": ["m1"]}},
                {"id": "102", "text": "#drop no image", "author_id": "u2",
                 "created_at": "2026-03-01T10:00:05.000Z"},
                {"id": "103", "text": "#drop video only", "author_id": "u2",
                 "created_at": "2026-03-01T10:00:06.000Z",
                 "attachments": {"media_keys": ["m2"]}}
            ],
            "includes": {
                "users": [{"id": "u1", "username": "alice"}, {"id": "u2", "username": "bob"}],
                "media": [{"media_key": "m1", "type": "photo"}, {"media_key": "m2", "type": "video"}]
            },
            "meta": {"result_count": 3, "newest_id": "103"}
        }"##;

        let response: SearchResponse = serde_json::from_str(raw).unwrap();
        let posts = response.into_posts();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].author_username, "alice");
        assert!(posts[0].has_photo);
        assert!(!posts[1].has_photo);
        assert!(!posts[2].has_photo);
        assert_eq!(posts[1].author_username, "bob");
    }

    #[test]
    fn test_oldest_id_compares_numerically() {
        let results = SearchResults {
            posts: vec![
                crate::models::post::sample_post("1000", "#drop", false),
                crate::models::post::sample_post("999", "#drop", false),
                crate::models::post::sample_post("1001", "#drop", false),
            ],
            truncated: true,
        };
        assert_eq!(results.oldest_id(), Some("999"));
        assert_eq!(SearchResults::default().oldest_id(), None);
    }

    #[test]
    fn test_empty_search_response() {
        let response: SearchResponse =
            serde_json::from_str(r#"{"meta": {"result_count": 0}}"#).unwrap();
        assert!(response.into_posts().is_empty());
    }
}
