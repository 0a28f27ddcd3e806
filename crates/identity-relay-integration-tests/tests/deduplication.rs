//! Integration tests for redelivery suppression
//!
//! Covers the per-subject window, concurrent duplicates, eviction after the
//! window, and the interaction between the window and downstream failures.

mod common;

use axum::http::StatusCode;
use common::{signed_request, user_created, user_event, TestApp};
use identity_relay_api::ServiceConfig;
use std::time::Duration;

#[tokio::test]
async fn test_redelivery_within_window_suppressed() {
    let app = TestApp::new();

    let first = app.deliver("msg_1", &user_created("user_1")).await;
    let second = app.deliver("msg_1", &user_created("user_1")).await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(app.synchronizer.call_count(), 1);
    assert_eq!(app.metrics.webhook_duplicates_suppressed_total.get(), 1);
}

/// The window is keyed by subject id, not by delivery id.
#[tokio::test]
async fn test_window_keyed_by_subject_not_delivery() {
    let app = TestApp::new();

    app.deliver("msg_1", &user_created("user_1")).await;
    app.deliver(
        "msg_2",
        &user_event("user.updated", "user_1", Some("Ada"), Some("King")),
    )
    .await;
    app.deliver("msg_3", &user_created("user_2")).await;

    let ids: Vec<String> = app
        .synchronizer
        .calls()
        .into_iter()
        .map(|call| call.id)
        .collect();
    assert_eq!(ids, vec!["user_1".to_string(), "user_2".to_string()]);
}

/// N concurrent identical deliveries produce exactly one synchronizer call,
/// even while the first call is still in flight.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_deliveries_sync_once() {
    let app = TestApp::new();
    app.synchronizer.set_delay(Duration::from_millis(50));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let router = app.router.clone();
        let request = signed_request(&app.verifier, "msg_1", &user_created("user_1"));
        handles.push(tokio::spawn(async move {
            use tower::ServiceExt;
            router.oneshot(request).await.unwrap().status()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(app.synchronizer.call_count(), 1);
    assert_eq!(app.metrics.webhook_duplicates_suppressed_total.get(), 19);
}

/// Distinct subjects arriving together are all synced.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_subjects_all_synced() {
    let app = TestApp::new();

    let mut handles = Vec::new();
    for n in 0..10 {
        let router = app.router.clone();
        let request = signed_request(
            &app.verifier,
            &format!("msg_{}", n),
            &user_created(&format!("user_{}", n)),
        );
        handles.push(tokio::spawn(async move {
            use tower::ServiceExt;
            router.oneshot(request).await.unwrap().status()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(app.synchronizer.call_count(), 10);
}

/// After the window elapses the same subject is processed again.
#[tokio::test(start_paused = true)]
async fn test_processed_again_after_window() {
    let app = TestApp::new();

    app.deliver("msg_1", &user_created("user_1")).await;
    tokio::time::advance(Duration::from_secs(29)).await;
    app.deliver("msg_1", &user_created("user_1")).await;
    assert_eq!(app.synchronizer.call_count(), 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    let response = app.deliver("msg_1", &user_created("user_1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.synchronizer.call_count(), 2);
}

/// The reaper empties the table with no further traffic.
#[tokio::test(start_paused = true)]
async fn test_reaper_evicts_idle_entries() {
    let app = TestApp::new();
    let config = ServiceConfig::default();
    let reaper = app
        .pipeline
        .deduplicator()
        .spawn_reaper(config.webhooks.dedup_reap_interval());

    app.deliver("msg_1", &user_created("user_1")).await;
    app.deliver("msg_2", &user_created("user_2")).await;
    assert_eq!(app.pipeline.deduplicator().tracked_count(), 2);

    tokio::time::sleep(Duration::from_secs(31)).await;
    tokio::task::yield_now().await;

    assert_eq!(app.pipeline.deduplicator().tracked_count(), 0);
    reaper.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_configured_ttl_honoured() {
    let mut config = ServiceConfig::default();
    config.webhooks.dedup_ttl_seconds = 5;
    let app = TestApp::with_config(config);

    app.deliver("msg_1", &user_created("user_1")).await;
    tokio::time::advance(Duration::from_secs(5)).await;
    app.deliver("msg_1", &user_created("user_1")).await;

    assert_eq!(app.synchronizer.call_count(), 2);
}

/// A failed sync still occupies the window: the provider's redelivery inside
/// the window is acknowledged with 200 and the synchronizer is not retried.
/// Only after the window does a redelivery reach the synchronizer again.
#[tokio::test(start_paused = true)]
async fn test_failed_sync_suppresses_redelivery_until_window_expires() {
    let app = TestApp::new();
    app.synchronizer.set_failing(true);

    let failed = app.deliver("msg_1", &user_created("user_1")).await;
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.synchronizer.call_count(), 1);

    app.synchronizer.set_failing(false);
    tokio::time::advance(Duration::from_secs(5)).await;

    let redelivered = app.deliver("msg_1", &user_created("user_1")).await;
    assert_eq!(redelivered.status(), StatusCode::OK);
    assert_eq!(
        app.synchronizer.call_count(),
        1,
        "redelivery inside the window must not reach the synchronizer"
    );

    tokio::time::advance(Duration::from_secs(25)).await;

    let after_window = app.deliver("msg_1", &user_created("user_1")).await;
    assert_eq!(after_window.status(), StatusCode::OK);
    assert_eq!(app.synchronizer.call_count(), 2);
}

/// Rejected deliveries never enter the window.
#[tokio::test]
async fn test_rejected_delivery_does_not_occupy_window() {
    let app = TestApp::new();
    let mut forged = signed_request(&app.verifier, "msg_1", &user_created("user_1"));
    forged.headers_mut().insert(
        "svix-signature",
        "v1,Ceo5qEr07ixe2NLpvHk3FH9bwy/WavXrAFQ/9tdO6mc=".parse().unwrap(),
    );

    let rejected = app.send(forged).await;
    let genuine = app.deliver("msg_1", &user_created("user_1")).await;

    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    assert_eq!(genuine.status(), StatusCode::OK);
    assert_eq!(app.synchronizer.call_count(), 1);
}
