//! 发放管道集成测试
//!
//! 内存存储 + 记录回复的客户端，覆盖完整的判定、发放、回复流程

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use common::{Harness, draft, post, post_at};
use mint_drop::ingest::{WebhookOutcome, WebhookPayload};
use mint_drop::models::{IngestChannel, Outcome, ProjectDraft, ReplyState};
use mint_drop::reply::{MAX_REPLY_CHARS, ReplyResult};
use mint_drop::repository::{CursorStore, DeliveryLedger, ReservationStore};

fn code_and_image_project() -> ProjectDraft {
    ProjectDraft {
        require_secret_code: true,
        require_image: true,
        ..draft("Drop")
    }
}

#[tokio::test]
async fn test_code_and_image_scenario() {
    let h = Harness::new();
    let project = h.project(code_and_image_project(), 1, &["AB3K9"]).await;
    let projects = h.active_projects().await;

    let first = post("100", "alice", "claim #Drop AB3K9", true);
    let report = h
        .pipeline
        .process_post(&first, &projects, IngestChannel::Push)
        .await
        .unwrap();
    assert!(report.only(Outcome::Granted));

    let replies = h.social.replies_to("100");
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains("https://poap.xyz/claim/"));
    assert!(replies[0].text.starts_with("@alice"));

    let stats = h.store.pool_stats(project.id).await.unwrap();
    assert_eq!(stats.links_available, 0);
    assert_eq!(stats.links_reserved, 1);
    assert_eq!(stats.codes_used, 1);

    let delivery = h.store.find_delivery("100", project.id).await.unwrap().unwrap();
    assert_eq!(delivery.reply_state, ReplyState::Sent);
    assert_eq!(delivery.secret_code.as_deref(), Some("AB3K9"));

    // 同一暗号的第二个帖子
    let second = post("101", "bob", "me too #drop ab3k9", true);
    let report = h
        .pipeline
        .process_post(&second, &projects, IngestChannel::Push)
        .await
        .unwrap();
    assert!(report.only(Outcome::CodeAlreadyUsed));
    let replies = h.social.replies_to("101");
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains("doesn't meet the #drop requirements"));

    let stats = h.store.pool_stats(project.id).await.unwrap();
    assert_eq!(stats.links_reserved, 1);
    assert!(h.store.find_delivery("101", project.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_code_and_missing_image() {
    let h = Harness::new();
    h.project(code_and_image_project(), 2, &["AB3K9"]).await;
    let projects = h.active_projects().await;

    let no_code = post("1", "alice", "#drop where is my link", true);
    let report = h
        .pipeline
        .process_post(&no_code, &projects, IngestChannel::Push)
        .await
        .unwrap();
    assert!(report.only(Outcome::MissingCode));

    let no_image = post("2", "bob", "#drop AB3K9", false);
    let report = h
        .pipeline
        .process_post(&no_image, &projects, IngestChannel::Push)
        .await
        .unwrap();
    assert!(report.only(Outcome::MissingImage));

    // 拒绝不消耗暗号
    let ok = post("3", "bob", "#drop AB3K9", true);
    let report = h
        .pipeline
        .process_post(&ok, &projects, IngestChannel::Push)
        .await
        .unwrap();
    assert!(report.only(Outcome::Granted));
    assert_eq!(h.social.replies().len(), 3);
}

#[tokio::test]
async fn test_unrelated_post_is_dropped_silently() {
    let h = Harness::new();
    h.project(draft("drop"), 1, &[]).await;
    let projects = h.active_projects().await;

    let report = h
        .pipeline
        .process_post(&post("1", "alice", "#dropping soon", false), &projects, IngestChannel::Poll)
        .await
        .unwrap();
    assert!(report.only(Outcome::DroppedNoHashtagMatch));
    assert!(h.social.replies().is_empty());
}

#[tokio::test]
async fn test_single_claim_per_user() {
    let h = Harness::new();
    let project = h.project(draft("drop"), 3, &[]).await;
    let projects = h.active_projects().await;

    h.pipeline
        .process_post(&post("1", "alice", "#drop", false), &projects, IngestChannel::Push)
        .await
        .unwrap();
    let report = h
        .pipeline
        .process_post(&post("2", "alice", "#drop again", false), &projects, IngestChannel::Push)
        .await
        .unwrap();
    assert!(report.only(Outcome::UserAlreadyClaimed));
    assert!(h.social.replies_to("2")[0].text.contains("already claimed"));

    let stats = h.store.pool_stats(project.id).await.unwrap();
    assert_eq!(stats.links_available, 2);
}

#[tokio::test]
async fn test_multiple_claims_allowed() {
    let h = Harness::new();
    h.project(
        ProjectDraft {
            allow_multiple_claims: true,
            ..draft("drop")
        },
        2,
        &[],
    )
    .await;
    let projects = h.active_projects().await;

    for id in ["1", "2"] {
        let report = h
            .pipeline
            .process_post(&post(id, "alice", "#drop", false), &projects, IngestChannel::Push)
            .await
            .unwrap();
        assert!(report.only(Outcome::Granted));
    }
}

#[tokio::test]
async fn test_no_links_keeps_code_unused() {
    let h = Harness::new();
    let project = h
        .project(
            ProjectDraft {
                require_secret_code: true,
                ..draft("drop")
            },
            0,
            &["ZZ7Q2"],
        )
        .await;
    let projects = h.active_projects().await;

    let report = h
        .pipeline
        .process_post(&post("1", "alice", "#drop ZZ7Q2", false), &projects, IngestChannel::Push)
        .await
        .unwrap();
    assert!(report.only(Outcome::NoLinksAvailable));
    assert!(h.social.replies_to("1")[0].text.contains("have been claimed"));

    let stats = h.store.pool_stats(project.id).await.unwrap();
    assert_eq!(stats.codes_used, 0);
}

#[tokio::test]
async fn test_shared_hashtag_grants_per_project() {
    let h = Harness::new();
    let a = h.project(draft("drop"), 1, &[]).await;
    let b = h
        .project(
            ProjectDraft {
                name: "Partner".to_string(),
                ..draft("#DROP")
            },
            1,
            &[],
        )
        .await;
    let projects = h.active_projects().await;

    let report = h
        .pipeline
        .process_post(&post("1", "alice", "#drop", false), &projects, IngestChannel::Push)
        .await
        .unwrap();
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.only(Outcome::Granted));

    let replies = h.social.replies_to("1");
    assert_eq!(replies.len(), 2);
    let url_a = h.store.find_delivery("1", a.id).await.unwrap().unwrap().claim_url;
    let url_b = h.store.find_delivery("1", b.id).await.unwrap().unwrap().claim_url;
    assert_ne!(url_a, url_b);
    assert!(replies.iter().any(|r| r.text.contains(&url_a)));
    assert!(replies.iter().any(|r| r.text.contains(&url_b)));
}

#[tokio::test]
async fn test_long_reply_is_truncated() {
    let h = Harness::new();
    h.project(
        ProjectDraft {
            eligible_template: Some(format!("{} {{claim_url}}", "x".repeat(300))),
            ..draft("drop")
        },
        1,
        &[],
    )
    .await;
    let projects = h.active_projects().await;

    h.pipeline
        .process_post(&post("1", "alice", "#drop", false), &projects, IngestChannel::Push)
        .await
        .unwrap();

    let text = &h.social.replies_to("1")[0].text;
    assert_eq!(text.chars().count(), MAX_REPLY_CHARS);
    assert!(text.ends_with("..."));
}

#[tokio::test]
async fn test_push_then_poll_replies_once() {
    let h = Harness::new();
    let project = h.project(draft("drop"), 2, &[]).await;

    let payload: WebhookPayload = serde_json::from_value(json!({
        "for_user_id": "999",
        "tweet_create_events": [{
            "id_str": "500",
            "text": "gimme #drop",
            "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            "user": {"id_str": "uid-alice", "screen_name": "alice"}
        }]
    }))
    .unwrap();
    let outcome = h.webhook.handle(payload).await.unwrap();
    match outcome {
        WebhookOutcome::Completed(stats) => assert_eq!(stats.delivered, 1),
        WebhookOutcome::Deferred => panic!("webhook should complete within budget"),
    }

    // 轮询重新发现同一帖子
    h.social.publish(post("500", "alice", "gimme #drop", false));
    let stats = h.poller.run_once(IngestChannel::Poll).await.unwrap().unwrap();
    assert_eq!(stats.found, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.delivered, 0);

    assert_eq!(h.social.replies_to("500").len(), 1);
    assert_eq!(h.store.list_deliveries(project.id, 10).await.unwrap().len(), 1);
    assert_eq!(
        h.store.get_cursor("hashtag:drop").await.unwrap().as_deref(),
        Some("500")
    );
}

#[tokio::test]
async fn test_failed_reply_is_retried_on_reingest_without_new_reservation() {
    let h = Harness::new();
    let project = h.project(draft("drop"), 2, &[]).await;
    let projects = h.active_projects().await;
    let the_post = post("7", "alice", "#drop", false);

    h.social.fail_next_replies(1);
    let report = h
        .pipeline
        .process_post(&the_post, &projects, IngestChannel::Push)
        .await
        .unwrap();
    assert!(report.only(Outcome::Granted));
    assert!(matches!(
        report.outcomes[0].reply,
        Some(ReplyResult::Failed { retryable: true, .. })
    ));
    let delivery = h.store.find_delivery("7", project.id).await.unwrap().unwrap();
    assert!(delivery.reply_pending());
    let processed = h.store.get_processed("7", project.id).await.unwrap().unwrap();
    assert_eq!(processed.reply_state, ReplyState::Failed);
    assert!(processed.last_error.is_some());

    let report = h
        .pipeline
        .process_post(&the_post, &projects, IngestChannel::Poll)
        .await
        .unwrap();
    assert!(report.only(Outcome::Granted));
    assert!(matches!(report.outcomes[0].reply, Some(ReplyResult::Sent { .. })));

    let replies = h.social.replies_to("7");
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains(&delivery.claim_url));

    // 只预留过一个链接
    let stats = h.store.pool_stats(project.id).await.unwrap();
    assert_eq!(stats.links_reserved, 1);
    assert_eq!(stats.links_available, 1);

    // 第三次采集为终态
    let report = h
        .pipeline
        .process_post(&the_post, &projects, IngestChannel::Poll)
        .await
        .unwrap();
    assert!(report.only(Outcome::AlreadyDelivered));
    assert_eq!(h.social.replies_to("7").len(), 1);
}

#[tokio::test]
async fn test_poll_batch_oldest_post_wins_contested_code() {
    let h = Harness::new();
    let project = h
        .project(
            ProjectDraft {
                require_secret_code: true,
                ..draft("drop")
            },
            2,
            &["AB3K9"],
        )
        .await;

    let now = Utc::now();
    h.social
        .publish(post_at("20", "late", "#drop AB3K9", false, now));
    h.social.publish(post_at(
        "10",
        "early",
        "#drop AB3K9",
        false,
        now - ChronoDuration::minutes(1),
    ));

    let stats = h.poller.run_once(IngestChannel::Poll).await.unwrap().unwrap();
    assert_eq!(stats.found, 2);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.denied, 1);

    let winner = h.store.find_delivery("10", project.id).await.unwrap().unwrap();
    assert_eq!(winner.username, "early");
    assert!(h.store.find_delivery("20", project.id).await.unwrap().is_none());

    let processed = h.store.get_processed("20", project.id).await.unwrap().unwrap();
    assert_eq!(processed.outcome, Outcome::CodeAlreadyUsed);
}

#[tokio::test]
async fn test_code_for_one_project_does_not_draw_refusal_from_another() {
    let h = Harness::new();
    let code_project = |name: &str| ProjectDraft {
        name: name.to_string(),
        require_secret_code: true,
        ..draft("drop")
    };
    let a = h.project(code_project("Alpha"), 1, &["AAAA2"]).await;
    let b = h.project(code_project("Beta"), 1, &["BBBB3"]).await;
    let projects = h.active_projects().await;

    let the_post = post("1", "alice", "#drop AAAA2", false);
    let report = h
        .pipeline
        .process_post(&the_post, &projects, IngestChannel::Push)
        .await
        .unwrap();
    let outcome_of = |id: i64| {
        report
            .outcomes
            .iter()
            .find(|o| o.project_id == Some(id))
            .unwrap()
            .clone()
    };
    assert_eq!(outcome_of(a.id).outcome, Outcome::Granted);
    let beta = outcome_of(b.id);
    assert_eq!(beta.outcome, Outcome::MissingCode);
    assert!(beta.reply.is_none());

    let replies = h.social.replies_to("1");
    assert_eq!(replies.len(), 1);
    assert!(replies[0].text.contains("https://poap.xyz/claim/"));

    let processed = h.store.get_processed("1", b.id).await.unwrap().unwrap();
    assert_eq!(processed.outcome, Outcome::MissingCode);
    assert_eq!(processed.reply_state, ReplyState::None);

    // 重新采集仍然只有一条回复
    let report = h
        .pipeline
        .process_post(&the_post, &projects, IngestChannel::Poll)
        .await
        .unwrap();
    assert!(!report.dispatched_reply());
    assert_eq!(h.social.replies_to("1").len(), 1);
}

#[tokio::test]
async fn test_shared_hashtag_without_any_code_refuses_per_project() {
    let h = Harness::new();
    for (name, code) in [("Alpha", "AAAA2"), ("Beta", "BBBB3")] {
        h.project(
            ProjectDraft {
                name: name.to_string(),
                require_secret_code: true,
                ..draft("drop")
            },
            1,
            &[code],
        )
        .await;
    }
    let projects = h.active_projects().await;

    let report = h
        .pipeline
        .process_post(&post("2", "bob", "#drop please", false), &projects, IngestChannel::Push)
        .await
        .unwrap();
    assert!(report.only(Outcome::MissingCode));
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| matches!(o.reply, Some(ReplyResult::Sent { .. })))
    );
    assert_eq!(h.social.replies_to("2").len(), 2);
}

#[tokio::test]
async fn test_push_without_reply_credential_consumes_nothing() {
    let h = Harness::new();
    let project = h
        .project(
            ProjectDraft {
                require_secret_code: true,
                ..draft("drop")
            },
            1,
            &["AB3K9"],
        )
        .await;
    h.social.deny_bot("dropbot");

    let payload: WebhookPayload = serde_json::from_value(json!({
        "tweet_create_events": [{
            "id_str": "900",
            "text": "#drop AB3K9",
            "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            "user": {"id_str": "uid-alice", "screen_name": "alice"}
        }]
    }))
    .unwrap();
    let err = h.webhook.handle(payload).await.unwrap_err();
    assert!(err.is_configuration());

    let stats = h.store.pool_stats(project.id).await.unwrap();
    assert_eq!(stats.codes_used, 0);
    assert_eq!(stats.links_reserved, 0);
    assert!(h.store.find_delivery("900", project.id).await.unwrap().is_none());
    assert!(h.store.get_processed("900", project.id).await.unwrap().is_none());
    assert!(h.social.replies().is_empty());
}
