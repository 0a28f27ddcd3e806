//! Integration tests for the health and metrics endpoints

mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use common::{body_json, body_text, user_created, TestApp};

#[tokio::test]
async fn test_health_reports_dedup_occupancy() {
    let app = TestApp::new();
    app.deliver("msg_1", &user_created("user_1")).await;
    app.deliver("msg_2", &user_created("user_2")).await;

    let response = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["tracked_subjects"], 2);
}

#[tokio::test]
async fn test_metrics_track_every_outcome() {
    let app = TestApp::new();

    app.deliver("msg_1", &user_created("user_1")).await;
    app.deliver("msg_1", &user_created("user_1")).await;
    app.synchronizer.set_failing(true);
    app.deliver("msg_2", &user_created("user_2")).await;
    app.send(
        Request::post(common::WEBHOOK_PATH)
            .body(Body::from("{}"))
            .unwrap(),
    )
    .await;

    let response = app
        .send(Request::get("/metrics").body(Body::empty()).unwrap())
        .await;
    let text = body_text(response).await;

    assert!(text.contains("webhook_requests_total 4"), "{}", text);
    assert!(text.contains("webhook_users_synced_total 1"), "{}", text);
    assert!(text.contains("webhook_duplicates_suppressed_total 1"), "{}", text);
    assert!(text.contains("webhook_synchronizer_failures_total 1"), "{}", text);
    assert!(text.contains("webhook_missing_headers_total 1"), "{}", text);
    assert!(text.contains("webhook_verification_failures_total 0"), "{}", text);
    assert!(text.contains("dedup_tracked_subjects 2"), "{}", text);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = TestApp::new();

    let response = app
        .send(Request::get("/admin").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
