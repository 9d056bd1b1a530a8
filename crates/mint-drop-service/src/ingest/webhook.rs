//! 推送通道
//!
//! 平台对每条提及机器人账号的帖子推送一次事件。签名使用 HMAC-SHA256，
//! 挑战响应与请求签名均为 `sha256=` + base64 格式。

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, error, info, instrument, warn};

use super::verify_reply_credentials;
use crate::clients::SocialClient;
use crate::error::{DropError, Result};
use crate::models::{IngestChannel, SocialPost};
use crate::repository::ProjectStore;
use crate::service::{DeliveryPipeline, RunStats};

type HmacSha256 = Hmac<Sha256>;

/// 签名请求头
pub const SIGNATURE_HEADER: &str = "x-twitter-webhooks-signature";

/// 事件中 created_at 的格式，如 `Wed Oct 10 20:19:24 +0000 2018`
const EVENT_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

// ============================================================================
// 事件负载
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    /// 订阅该事件的机器人账号 ID
    pub for_user_id: Option<String>,
    #[serde(default)]
    pub tweet_create_events: Vec<TweetEvent>,
}

#[derive(Debug, Deserialize)]
pub struct TweetEvent {
    pub id_str: String,
    #[serde(default)]
    pub text: String,
    pub created_at: Option<String>,
    pub user: EventUser,
    pub extended_tweet: Option<ExtendedTweet>,
    pub entities: Option<Entities>,
    pub extended_entities: Option<Entities>,
    pub retweeted_status: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ExtendedTweet {
    pub full_text: String,
    pub entities: Option<Entities>,
    pub extended_entities: Option<Entities>,
}

#[derive(Debug, Deserialize)]
pub struct EventUser {
    pub id_str: String,
    pub screen_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub media: Vec<EventMedia>,
}

#[derive(Debug, Deserialize)]
pub struct EventMedia {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Entities {
    fn has_photo(&self) -> bool {
        self.media.iter().any(|m| m.kind == "photo")
    }
}

impl TweetEvent {
    /// 转换为统一的帖子结构；超长帖子取 extended_tweet 中的全文
    pub fn into_post(self) -> SocialPost {
        let entity_groups = [
            self.entities.as_ref(),
            self.extended_entities.as_ref(),
            self.extended_tweet.as_ref().and_then(|t| t.entities.as_ref()),
            self.extended_tweet
                .as_ref()
                .and_then(|t| t.extended_entities.as_ref()),
        ];
        let has_photo = entity_groups.into_iter().flatten().any(Entities::has_photo);

        let created_at = self
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_str(s, EVENT_TIME_FORMAT).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let text = match self.extended_tweet {
            Some(extended) => extended.full_text,
            None => self.text,
        };

        SocialPost {
            id: self.id_str,
            text,
            author_id: self.user.id_str,
            author_username: self.user.screen_name,
            has_photo,
            created_at,
        }
    }
}

impl WebhookPayload {
    /// 取出需要处理的帖子：跳过转发和机器人自己发出的帖子（包括自身的回复）
    pub fn into_posts(self) -> Vec<SocialPost> {
        let bot_id = self.for_user_id;
        self.tweet_create_events
            .into_iter()
            .filter(|e| e.retweeted_status.is_none())
            .filter(|e| bot_id.as_deref() != Some(e.user.id_str.as_str()))
            .map(TweetEvent::into_post)
            .collect()
    }
}

// ============================================================================
// 签名
// ============================================================================

fn sign(secret: &str, message: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DropError::Internal(e.to_string()))?;
    mac.update(message);
    Ok(format!("sha256={}", BASE64.encode(mac.finalize().into_bytes())))
}

/// 常量时间校验签名头
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    let Some(encoded) = header.trim().strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = BASE64.decode(encoded) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

// ============================================================================
// 处理器
// ============================================================================

/// 推送处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// 在处理预算内完成
    Completed(RunStats),
    /// 超出预算，处理在后台继续
    Deferred,
}

pub struct WebhookProcessor {
    projects: Arc<dyn ProjectStore>,
    social: Arc<dyn SocialClient>,
    pipeline: Arc<DeliveryPipeline>,
    consumer_secret: Option<String>,
    budget: Duration,
}

impl WebhookProcessor {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        social: Arc<dyn SocialClient>,
        pipeline: Arc<DeliveryPipeline>,
        consumer_secret: Option<String>,
        budget: Duration,
    ) -> Self {
        Self {
            projects,
            social,
            pipeline,
            consumer_secret: consumer_secret.filter(|s| !s.is_empty()),
            budget,
        }
    }

    fn secret(&self) -> Result<&str> {
        self.consumer_secret
            .as_deref()
            .ok_or_else(|| DropError::MissingCredential("webhook consumer secret".to_string()))
    }

    /// 挑战响应
    pub fn crc_response(&self, crc_token: &str) -> Result<String> {
        sign(self.secret()?, crc_token.as_bytes())
    }

    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<()> {
        let secret = self.secret()?;
        match header {
            Some(header) if verify_signature(secret, payload, header) => Ok(()),
            Some(_) => Err(DropError::Unauthorized("签名不匹配".to_string())),
            None => Err(DropError::Unauthorized("缺少签名头".to_string())),
        }
    }

    /// 处理一次推送
    ///
    /// 处理在独立任务中执行，超出预算时立即返回 `Deferred`，任务不被取消，
    /// 避免回复认领停留在 sending 状态
    #[instrument(skip(self, payload))]
    pub async fn handle(&self, payload: WebhookPayload) -> Result<WebhookOutcome> {
        let posts = payload.into_posts();
        if posts.is_empty() {
            debug!("推送中没有需要处理的帖子");
            return Ok(WebhookOutcome::Completed(RunStats::default()));
        }

        let projects = self.projects.list_active_projects().await?;
        if projects.is_empty() {
            error!("没有处于激活状态的项目");
            return Err(DropError::NoActiveProject);
        }
        if let Err(e) = verify_reply_credentials(self.social.as_ref(), &projects) {
            error!(error = %e, "回复凭证缺失，推送不做处理");
            return Err(e);
        }

        let pipeline = self.pipeline.clone();
        let task = tokio::spawn(async move {
            let mut stats = RunStats::default();
            for post in &posts {
                let report = pipeline
                    .process_post(post, &projects, IngestChannel::Push)
                    .await?;
                stats.absorb(&report);
            }
            Ok::<_, DropError>(stats)
        });

        match tokio::time::timeout(self.budget, task).await {
            Ok(Ok(result)) => {
                let stats = result?;
                info!(
                    found = stats.found,
                    delivered = stats.delivered,
                    denied = stats.denied,
                    failed = stats.failed,
                    "推送处理完成"
                );
                Ok(WebhookOutcome::Completed(stats))
            }
            Ok(Err(join_err)) => Err(DropError::Internal(join_err.to_string())),
            Err(_) => {
                warn!(budget_secs = self.budget.as_secs(), "推送处理超出预算，转入后台继续");
                Ok(WebhookOutcome::Deferred)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: &str, user_id: &str, text: &str) -> serde_json::Value {
        json!({
            "id_str": id,
            "text": text,
            "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            "user": {"id_str": user_id, "screen_name": format!("user{}", user_id)},
        })
    }

    #[test]
    fn test_crc_signature_format() {
        let signature = sign("secret", b"token").unwrap();
        assert!(signature.starts_with("sha256="));
        assert!(verify_signature("secret", b"token", &signature));
        assert!(!verify_signature("other", b"token", &signature));
        assert!(!verify_signature("secret", b"token", "sha256=not-base64!"));
        assert!(!verify_signature("secret", b"token", "md5=abc"));
    }

    #[test]
    fn test_payload_skips_bot_and_retweets() {
        let mut retweet = event("3", "7", "RT #drop");
        retweet["retweeted_status"] = json!({"id_str": "1"});
        let payload: WebhookPayload = serde_json::from_value(json!({
            "for_user_id": "99",
            "tweet_create_events": [
                event("1", "7", "#drop AB3K9"),
                event("2", "99", "@user7 your link"),
                retweet,
            ]
        }))
        .unwrap();

        let posts = payload.into_posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "1");
        assert_eq!(posts[0].author_username, "user7");
        assert_eq!(posts[0].created_at.to_rfc3339(), "2018-10-10T20:19:24+00:00");
    }

    #[test]
    fn test_extended_tweet_text_and_photo() {
        let mut raw = event("1", "7", "#drop truncated…");
        raw["extended_tweet"] = json!({
            "full_text": "#drop full text AB3K9",
            "extended_entities": {"media": [{"type": "photo"}]}
        });
        let event: TweetEvent = serde_json::from_value(raw).unwrap();
        let post = event.into_post();
        assert_eq!(post.text, "#drop full text AB3K9");
        assert!(post.has_photo);
    }

    #[test]
    fn test_video_is_not_photo() {
        let mut raw = event("1", "7", "#drop");
        raw["entities"] = json!({"media": [{"type": "video"}]});
        let event: TweetEvent = serde_json::from_value(raw).unwrap();
        assert!(!event.into_post().has_photo);
    }
}
