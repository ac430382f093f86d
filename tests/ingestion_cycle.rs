//! Integration tests for the full ingestion cycle: fetch, dedup, persist,
//! match, deliver.
//!
//! Each test creates its own in-memory SQLite database and wiremock servers
//! for the feed endpoint and the bot API, then drives whole cycles through
//! the pipeline.

use std::sync::Arc;
use std::time::Duration;

use pigeon::cache::QueryCache;
use pigeon::notify::Notifier;
use pigeon::pipeline::{CycleError, Pipeline, PipelineSettings};
use pigeon::storage::{ConfigPatch, Database, NewSubscription, PushStatus};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn test_db() -> Database {
    Database::open(":memory:", Arc::new(QueryCache::new()))
        .await
        .unwrap()
}

fn rss_document(items: &[(&str, &str, &str)]) -> String {
    // items: (link, title, description)
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Forum</title>"#,
    );
    for (link, title, description) in items {
        body.push_str(&format!(
            "<item><title>{title}</title><link>{link}</link>\
             <description>{description}</description>\
             <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate></item>"
        ));
    }
    body.push_str("</channel></rss>");
    body
}

async fn mount_feed(server: &MockServer, body: String) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

async fn mount_telegram_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/bot[^/]+/sendMessage$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "result": {}
        })))
        .mount(server)
        .await;
}

struct Harness {
    db: Database,
    feed: MockServer,
    telegram: MockServer,
    pipeline: Pipeline,
}

async fn harness() -> Harness {
    let db = test_db().await;
    let feed = MockServer::start().await;
    let telegram = MockServer::start().await;

    let client = reqwest::Client::new();
    let notifier = Notifier::new(client.clone(), telegram.uri());
    let pipeline = Pipeline::new(
        db.clone(),
        client,
        notifier,
        PipelineSettings {
            feed_url: format!("{}/feed", feed.uri()),
            post_url_template: "https://forum.example.com/post-{id}-1".to_string(),
            fetch_timeout: Duration::from_secs(5),
        },
    );

    Harness {
        db,
        feed,
        telegram,
        pipeline,
    }
}

async fn init_bot_config(db: &Database) {
    db.create_config("admin", "hunter2", Some("TOKEN"), "12345")
        .await
        .unwrap();
}

// ============================================================================
// Ingestion and dedup
// ============================================================================

#[tokio::test]
async fn test_unconfigured_cycle_aborts_cleanly_and_recovers() {
    let h = harness().await;
    mount_feed(
        &h.feed,
        rss_document(&[("https://forum.example.com/post-50-1", "Early bird", "body")]),
    )
    .await;

    // No config row yet: the cycle aborts before touching the network
    let err = h.pipeline.run_cycle().await.unwrap_err();
    assert!(matches!(err, CycleError::NotInitialized));
    assert!(h.feed.received_requests().await.unwrap().is_empty());

    // Once the management surface creates the row, the next tick just works
    init_bot_config(&h.db).await;
    mount_telegram_ok(&h.telegram).await;
    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.ingested, 1);
}

#[tokio::test]
async fn test_reingestion_is_idempotent() {
    let h = harness().await;
    init_bot_config(&h.db).await;
    mount_feed(
        &h.feed,
        rss_document(&[
            ("https://forum.example.com/post-100-1", "First", "body"),
            ("https://forum.example.com/post-101-1", "Second", "body"),
        ]),
    )
    .await;
    mount_telegram_ok(&h.telegram).await;

    let first = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(first.processed, 2);
    assert_eq!(first.ingested, 2);

    // Same document again: everything deduped, nothing re-evaluated
    mount_feed(
        &h.feed,
        rss_document(&[
            ("https://forum.example.com/post-100-1", "First", "body"),
            ("https://forum.example.com/post-101-1", "Second", "body"),
        ]),
    )
    .await;
    mount_telegram_ok(&h.telegram).await;
    let second = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(second.processed, 2);
    assert_eq!(second.ingested, 0);
    assert_eq!(second.delivered, 0);
    assert_eq!(second.skipped, 0);
}

#[tokio::test]
async fn test_mixed_feed_drops_delivers_and_skips() {
    let h = harness().await;
    init_bot_config(&h.db).await;
    h.db.create_subscription(&NewSubscription {
        keyword1: Some("vps".to_string()),
        ..Default::default()
    })
    .await
    .unwrap();

    // Three entries: one matching, one not, one with no derivable id
    mount_feed(
        &h.feed,
        rss_document(&[
            ("https://forum.example.com/post-100-1", "VPS deal", "body"),
            ("https://forum.example.com/post-101-1", "Lunch", "body"),
            ("https://forum.example.com/about", "No id here", "body"),
        ]),
    )
    .await;
    mount_telegram_ok(&h.telegram).await;

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.skipped, 1);
    // The dropped entry counts against the cycle's error total
    assert_eq!(summary.errors, 1);
    assert!(h.db.get_post(100).await.unwrap().is_some());
}

// ============================================================================
// Matching and delivery
// ============================================================================

#[tokio::test]
async fn test_matched_post_delivered_others_skipped() {
    let h = harness().await;
    init_bot_config(&h.db).await;
    h.db.create_subscription(&NewSubscription {
        keyword1: Some("vps".to_string()),
        ..Default::default()
    })
    .await
    .unwrap();

    mount_feed(
        &h.feed,
        rss_document(&[
            ("https://forum.example.com/post-200-1", "Cheap VPS sale", "body"),
            ("https://forum.example.com/post-201-1", "Lunch thread", "body"),
        ]),
    )
    .await;
    mount_telegram_ok(&h.telegram).await;

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.errors, 0);

    let delivered = h.db.get_post(200).await.unwrap().unwrap();
    assert_eq!(delivered.status, PushStatus::Pushed);
    assert!(delivered.sub_id.is_some());
    assert!(delivered.delivered_at.is_some());

    let skipped = h.db.get_post(201).await.unwrap().unwrap();
    assert_eq!(skipped.status, PushStatus::Skipped);
    assert!(skipped.sub_id.is_none());

    // Exactly one sendMessage call went out
    let requests = h.telegram.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["chat_id"], "12345");
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("Cheap VPS sale"), "{text}");
    assert!(text.contains("https://forum.example.com/post-200-1"), "{text}");
}

#[tokio::test]
async fn test_stop_push_keeps_posts_queued() {
    let h = harness().await;
    init_bot_config(&h.db).await;
    h.db.update_config(&ConfigPatch {
        stop_push: Some(true),
        ..Default::default()
    })
    .await
    .unwrap();
    h.db.create_subscription(&NewSubscription {
        keyword1: Some("vps".to_string()),
        ..Default::default()
    })
    .await
    .unwrap();

    mount_feed(
        &h.feed,
        rss_document(&[("https://forum.example.com/post-300-1", "VPS sale", "body")]),
    )
    .await;

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.ingested, 1);
    assert_eq!(summary.delivered, 0);
    assert_eq!(summary.skipped, 0);

    // Nothing was classified either way, the post waits for push to resume
    let post = h.db.get_post(300).await.unwrap().unwrap();
    assert_eq!(post.status, PushStatus::Unpushed);
    assert!(h.telegram.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unbound_chat_keeps_posts_queued() {
    let h = harness().await;
    // Config exists but has no token and no chat id
    h.db.create_config("admin", "hunter2", None, "").await.unwrap();

    mount_feed(
        &h.feed,
        rss_document(&[("https://forum.example.com/post-310-1", "VPS sale", "body")]),
    )
    .await;

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.ingested, 1);
    assert_eq!(summary.delivered, 0);
    let post = h.db.get_post(310).await.unwrap().unwrap();
    assert_eq!(post.status, PushStatus::Unpushed);
}

#[tokio::test]
async fn test_failed_delivery_leaves_post_unpushed() {
    let h = harness().await;
    init_bot_config(&h.db).await;
    h.db.create_subscription(&NewSubscription {
        keyword1: Some("vps".to_string()),
        ..Default::default()
    })
    .await
    .unwrap();

    mount_feed(
        &h.feed,
        rss_document(&[("https://forum.example.com/post-400-1", "VPS sale", "body")]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/bot[^/]+/sendMessage$"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "ok": false,
            "description": "Bad Request: chat not found"
        })))
        .mount(&h.telegram)
        .await;

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.delivered, 0);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.details.len(), 1);
    assert_eq!(summary.details[0].outcome, "error");

    // Still queued for the next cycle
    let post = h.db.get_post(400).await.unwrap().unwrap();
    assert_eq!(post.status, PushStatus::Unpushed);

    // Next cycle with a healthy endpoint delivers it
    mount_feed(&h.feed, rss_document(&[])).await;
    h.telegram.reset().await;
    mount_telegram_ok(&h.telegram).await;
    let retry = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(retry.delivered, 1);
    let post = h.db.get_post(400).await.unwrap().unwrap();
    assert_eq!(post.status, PushStatus::Pushed);
}

#[tokio::test]
async fn test_newest_subscription_wins() {
    let h = harness().await;
    init_bot_config(&h.db).await;
    let older = h
        .db
        .create_subscription(&NewSubscription {
            keyword1: Some("vps".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    // created_at ties are broken by id, so creating a second one immediately
    // still makes it the newest
    let newer = h
        .db
        .create_subscription(&NewSubscription {
            keyword1: Some("sale".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(newer.id > older.id);

    mount_feed(
        &h.feed,
        rss_document(&[("https://forum.example.com/post-500-1", "VPS sale", "body")]),
    )
    .await;
    mount_telegram_ok(&h.telegram).await;

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.delivered, 1);
    let post = h.db.get_post(500).await.unwrap().unwrap();
    assert_eq!(post.sub_id, Some(newer.id));
}

// ============================================================================
// Config cache behavior across cycles
// ============================================================================

#[tokio::test]
async fn test_config_write_takes_effect_next_cycle() {
    let h = harness().await;
    init_bot_config(&h.db).await;

    // Prime the config cache
    mount_feed(&h.feed, rss_document(&[])).await;
    h.pipeline.run_cycle().await.unwrap();

    // Pause push; the write must invalidate the cached config so the very
    // next cycle observes it
    h.db.update_config(&ConfigPatch {
        stop_push: Some(true),
        ..Default::default()
    })
    .await
    .unwrap();
    h.db.create_subscription(&NewSubscription {
        keyword1: Some("vps".to_string()),
        ..Default::default()
    })
    .await
    .unwrap();

    mount_feed(
        &h.feed,
        rss_document(&[("https://forum.example.com/post-600-1", "VPS sale", "body")]),
    )
    .await;
    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.ingested, 1);
    assert_eq!(summary.delivered, 0);
    assert!(h.telegram.received_requests().await.unwrap().is_empty());
}

// ============================================================================
// Stats over the cycle outcome
// ============================================================================

#[tokio::test]
async fn test_stats_reflect_cycle_outcome() {
    let h = harness().await;
    init_bot_config(&h.db).await;
    h.db.create_subscription(&NewSubscription {
        keyword1: Some("vps".to_string()),
        ..Default::default()
    })
    .await
    .unwrap();

    mount_feed(
        &h.feed,
        rss_document(&[
            ("https://forum.example.com/post-700-1", "VPS sale", "body"),
            ("https://forum.example.com/post-701-1", "Lunch", "body"),
            ("https://forum.example.com/post-702-1", "Dinner", "body"),
        ]),
    )
    .await;
    mount_telegram_ok(&h.telegram).await;
    h.pipeline.run_cycle().await.unwrap();

    let stats = h.db.stats().await.unwrap();
    assert_eq!(stats.total_posts, 3);
    assert_eq!(stats.pushed_posts, 1);
    assert_eq!(stats.skipped_posts, 2);
    assert_eq!(stats.unpushed_posts, 0);
    assert_eq!(stats.total_subscriptions, 1);
    assert_eq!(stats.delivered_today, 1);
}
