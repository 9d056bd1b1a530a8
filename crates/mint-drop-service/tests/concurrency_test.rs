//! 并发发放测试
//!
//! 多个任务同时预留链接、消费暗号、处理同一帖子时，每个资源只发放一次

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;

use common::{Harness, draft, post};
use mint_drop::models::{IngestChannel, Outcome, ProjectDraft};
use mint_drop::repository::{DeliveryLedger, GrantDecision, GrantRequest, ReservationStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_share_a_link() {
    let h = Harness::new();
    let project = h.project(draft("drop"), 5, &[]).await;

    let tasks = (0..20).map(|i| {
        let store = h.store.clone();
        tokio::spawn(async move {
            store
                .reserve_link(project.id, &format!("user-{}", i))
                .await
                .unwrap()
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let reserved: Vec<_> = results.into_iter().flatten().collect();
    assert_eq!(reserved.len(), 5);
    let ids: HashSet<i64> = reserved.iter().map(|l| l.id).collect();
    assert_eq!(ids.len(), 5);

    let stats = h.store.pool_stats(project.id).await.unwrap();
    assert_eq!(stats.links_available, 0);
    assert_eq!(stats.links_reserved, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_code_consumption_succeeds_once() {
    let h = Harness::new();
    let project = h.project(draft("drop"), 0, &["AB3K9"]).await;

    let tasks = (0..10).map(|i| {
        let store = h.store.clone();
        tokio::spawn(async move {
            store
                .consume_code(project.id, "AB3K9", &format!("user-{}", i))
                .await
                .unwrap()
        })
    });
    let successes = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count();
    assert_eq!(successes, 1);

    let codes = h.store.list_codes(project.id).await.unwrap();
    assert!(codes[0].used);
    assert!(codes[0].used_by.is_some());
}

#[tokio::test]
async fn test_links_are_reserved_in_import_order() {
    let h = Harness::new();
    let project = h.project(draft("drop"), 3, &[]).await;

    let mut hashes = Vec::new();
    for user in ["a", "b", "c"] {
        let link = h.store.reserve_link(project.id, user).await.unwrap().unwrap();
        hashes.push(link.qr_hash);
    }
    let expected: Vec<String> = (1..=3).map(|i| format!("p{}h{}", project.id, i)).collect();
    assert_eq!(hashes, expected);
    assert!(h.store.reserve_link(project.id, "d").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_grants_for_one_code() {
    let h = Harness::new();
    let project = h
        .project(
            ProjectDraft {
                require_secret_code: true,
                allow_multiple_claims: true,
                ..draft("drop")
            },
            10,
            &["AB3K9"],
        )
        .await;

    let tasks = (0..8).map(|i| {
        let store = h.store.clone();
        tokio::spawn(async move {
            store
                .grant(&GrantRequest {
                    post_id: format!("post-{}", i),
                    project_id: project.id,
                    user_id: format!("uid-{}", i),
                    username: format!("user{}", i),
                    code: Some("AB3K9".to_string()),
                    single_claim_per_user: false,
                })
                .await
                .unwrap()
        })
    });
    let decisions: Vec<GrantDecision> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let granted = decisions
        .iter()
        .filter(|d| matches!(d, GrantDecision::Granted(_)))
        .count();
    assert_eq!(granted, 1);
    assert!(
        decisions
            .iter()
            .all(|d| matches!(d, GrantDecision::Granted(_) | GrantDecision::CodeAlreadyUsed))
    );

    // 被拒绝的事务不占用链接
    let stats = h.store.pool_stats(project.id).await.unwrap();
    assert_eq!(stats.links_reserved, 1);
    assert_eq!(stats.links_available, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_post_from_both_channels_replies_once() {
    let h = Harness::new();
    let project = h.project(draft("drop"), 3, &[]).await;
    let projects = Arc::new(h.active_projects().await);
    let the_post = Arc::new(post("42", "alice", "#drop please", false));

    let tasks = (0..6).map(|i| {
        let pipeline = h.pipeline.clone();
        let projects = projects.clone();
        let the_post = the_post.clone();
        let channel = if i % 2 == 0 {
            IngestChannel::Push
        } else {
            IngestChannel::Poll
        };
        tokio::spawn(async move {
            pipeline
                .process_post(&the_post, &projects, channel)
                .await
                .unwrap()
        })
    });
    let reports: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let granted = reports.iter().filter(|r| r.only(Outcome::Granted)).count();
    assert_eq!(granted, 1);
    assert!(
        reports
            .iter()
            .all(|r| r.only(Outcome::Granted) || r.only(Outcome::AlreadyDelivered))
    );

    assert_eq!(h.social.replies_to("42").len(), 1);
    assert_eq!(h.store.list_deliveries(project.id, 10).await.unwrap().len(), 1);
    let stats = h.store.pool_stats(project.id).await.unwrap();
    assert_eq!(stats.links_reserved, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_concurrent_posts_single_claim() {
    let h = Harness::new();
    let project = h.project(draft("drop"), 5, &[]).await;
    let projects = Arc::new(h.active_projects().await);

    let tasks = (0..5).map(|i| {
        let pipeline = h.pipeline.clone();
        let projects = projects.clone();
        tokio::spawn(async move {
            let the_post = post(&format!("{}", 100 + i), "alice", "#drop", false);
            pipeline
                .process_post(&the_post, &projects, IngestChannel::Poll)
                .await
                .unwrap()
        })
    });
    let reports: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(reports.iter().filter(|r| r.only(Outcome::Granted)).count(), 1);
    assert_eq!(
        reports
            .iter()
            .filter(|r| r.only(Outcome::UserAlreadyClaimed))
            .count(),
        4
    );
    assert_eq!(h.store.list_deliveries(project.id, 10).await.unwrap().len(), 1);
}
